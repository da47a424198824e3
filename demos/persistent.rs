//! Persisting a store to a blocking and an async backend

use dharma::{
    AsyncMemoryStorage, Merge, MemoryStorage, PersistConfig, Storage, Store, StoreConfig,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Settings {
    theme: String,
    font_size: u32,
}

impl Merge for Settings {
    type Patch = Settings;

    fn merge(&self, patch: Settings) -> Settings {
        patch
    }
}

fn settings_store(storage: &MemoryStorage) -> Store<BTreeMap<String, serde_json::Value>> {
    let mut initial = BTreeMap::new();
    initial.insert("theme".to_string(), serde_json::json!("light"));
    initial.insert("font_size".to_string(), serde_json::json!(14));

    Store::new(
        StoreConfig::new(initial).persist(
            PersistConfig::new("settings")
                .storage(storage.clone())
                .on_storage_load(|event| println!("   -> loaded {:?}", event.state))
                .on_storage_change(|event| println!("   -> wrote key '{}'", event.key)),
        ),
    )
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    println!("=== Persistent Store Example ===\n");

    println!("1. Blocking backend");
    let storage = MemoryStorage::new();
    {
        let store = settings_store(&storage);
        let _sub = store.subscribe(|_| {});

        let mut patch = BTreeMap::new();
        patch.insert("theme".to_string(), serde_json::json!("dark"));
        store.set(patch);
    }
    println!(
        "   stored: {:?}\n",
        storage.get_item("settings").ok().flatten()
    );

    println!("2. A new store with the same key picks up the stored value");
    let store = settings_store(&storage);
    let _sub = store.subscribe(|state| println!("   -> state = {:?}", state));

    println!("\n3. Async backend");
    let async_storage = AsyncMemoryStorage::new();
    let store = Store::new(
        StoreConfig::new(Settings {
            theme: "light".to_string(),
            font_size: 14,
        })
        .persist(PersistConfig::new("typed").async_storage(async_storage.clone())),
    );
    store.set(Settings {
        theme: "solarized".to_string(),
        font_size: 16,
    });
    store.flush().await;
    println!(
        "   stored: {:?}",
        async_storage.blocking().get_item("typed").ok().flatten()
    );

    println!("\n✓ Example complete!");
}
