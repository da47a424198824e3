//! Counter store with actions and lifecycle hooks

use dharma::{Store, StoreConfig};
use serde_json::{json, Value};

struct CounterActions {
    increment: Box<dyn Fn() + Send + Sync>,
    decrement: Box<dyn Fn() + Send + Sync>,
    reset: Box<dyn Fn() + Send + Sync>,
}

fn count(state: &Value) -> i64 {
    state["count"].as_i64().unwrap_or_default()
}

fn main() {
    println!("=== Counter Store Example ===\n");

    println!("1. Creating a store with actions and hooks");
    let store = Store::new(
        StoreConfig::new(json!({ "count": 0, "history": [] }))
            .actions(|state| {
                let down = state.clone();
                let reset = state.clone();
                CounterActions {
                    increment: Box::new(move || {
                        state.update(|s| json!({ "count": count(s) + 1 }));
                    }),
                    decrement: Box::new(move || {
                        down.update(|s| json!({ "count": count(s) - 1 }));
                    }),
                    reset: Box::new(move || {
                        reset.reset();
                    }),
                }
            })
            .on_load(|_| println!("   -> on_load"))
            .on_attach(|_| println!("   -> on_attach (first subscriber)"))
            .on_detach(|_| println!("   -> on_detach (last subscriber gone)"))
            .on_change(|ctx| {
                // Record every count in the history; this write does not re-enter on_change
                let mut history = ctx.state()["history"].as_array().cloned().unwrap_or_default();
                history.push(ctx.state()["count"].clone());
                ctx.set(json!({ "history": history }));
            }),
    );
    println!("   state = {}\n", store.get());

    println!("2. Subscribing");
    let subscription = store.subscribe(|state: &Value| {
        println!("   -> state = {}", state);
    });

    println!("\n3. Dispatching actions");
    (store.actions().increment)();
    (store.actions().increment)();
    (store.actions().decrement)();

    println!("\n4. Resetting");
    (store.actions().reset)();

    println!("\n5. Unsubscribing");
    subscription.unsubscribe();

    println!("\n✓ Example complete!");
}
