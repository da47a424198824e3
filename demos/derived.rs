//! Derived values, selections and effects

use dharma::{create_effect_with_deps, derive, derive_with_deps, Selection, Store};
use serde_json::{json, Value};

fn main() {
    println!("=== Derived Values Example ===\n");

    let store = Store::from_state(json!({
        "items": [3, 1, 4, 1, 5],
        "filter": "all",
    }));

    println!("1. A derived total, recomputed only when items change");
    let total = derive_with_deps(
        &store,
        |state: &Value| {
            println!("   (computing total)");
            state["items"]
                .as_array()
                .map(|items| items.iter().filter_map(Value::as_i64).sum::<i64>())
                .unwrap_or_default()
        },
        |state: &Value| vec![state["items"].clone()],
    );
    let _total_sub = total.subscribe(|total: &i64| println!("   -> total = {}", total));

    println!("\n2. Changing an unrelated key");
    store.set(json!({ "filter": "odd" }));

    println!("\n3. Changing items");
    store.set(json!({ "items": [2, 7] }));

    println!("\n4. Chaining derived values");
    let label = derive(&total, |total: &i64| format!("{} in total", total));
    println!("   label = {}", label.get());

    println!("\n5. An effect on the filter");
    let effect = create_effect_with_deps(
        &store,
        |state: &Value| println!("   -> filter is now {}", state["filter"]),
        |state: &Value| vec![state["filter"].clone()],
    );
    effect.mount();
    store.set(json!({ "items": [1] }));
    store.set(json!({ "filter": "even" }));
    effect.unmount();

    println!("\n6. A stable selection");
    let selection = Selection::new(&store, |state: &Value| state["items"].clone());
    let first = selection.get_snapshot();
    store.set(json!({ "filter": "all" }));
    println!("   unchanged snapshot: {}", first == selection.get_snapshot());

    println!("\n✓ Example complete!");
}
