//! # Dharma
//!
//! Observable state stores for Rust, with optional persistence, derived
//! values and effects.
//!
//! ## Store
//!
//! - [`Store<S, A>`] - a thread-safe state container. Updates are merged
//!   into the current state (shallowly for record-like states) and every
//!   change is dispatched synchronously: persistence write-back, the
//!   `on_change` hook, then every listener once.
//! - [`StoreConfig`] - initial state, actions, lifecycle hooks
//!   (`on_load`, `on_attach`, `on_detach`, `on_change`, `on_subscribe`,
//!   `on_unsubscribe`) and persistence.
//! - [`StoreContext`] - one store shape, many instances, with a scoped
//!   "current instance" lookup.
//!
//! ## Persistence
//!
//! - [`PersistConfig`] - mirrors a store into a [`Storage`] or
//!   [`AsyncStorage`] backend under `key`, with an `init_{key}` fingerprint
//!   that discards persisted values when the initial state changes.
//! - Backend failures never reach the caller: they are logged with
//!   `tracing` and the store keeps working in memory.
//!
//! ## Derived values and effects
//!
//! - [`Derived<T>`] - a lazily computed, memoized value of a store (or of
//!   another derived value).
//! - [`Effect`] - a side effect run on changes while mounted.
//!
//! ```
//! use dharma::{derive, Store, StoreConfig};
//! use serde_json::{json, Value};
//!
//! let store = Store::new(StoreConfig::new(json!({ "count": 0 })));
//! let doubled = derive(&store, |state: &Value| state["count"].as_i64().unwrap_or(0) * 2);
//!
//! store.update(|state| json!({ "count": state["count"].as_i64().unwrap_or(0) + 1 }));
//! assert_eq!(doubled.get(), 2);
//! ```

pub mod effect;
pub mod equality;
pub mod error;
pub mod memo;
pub mod observable;
pub mod persist;
pub mod store;

// Re-export main types for convenience
pub use effect::{create_effect, create_effect_with_deps, Effect};
pub use equality::{deeply_equals, DeepEq};
pub use error::{PersistError, Result};
pub use memo::{derive, derive_with_deps, Derived};
pub use observable::{Listener, Observable, Subscription};
pub use persist::{
    AsyncMemoryStorage, AsyncStorage, JsonSerializer, MemoryStorage, PersistConfig, PersistPhase,
    ResyncRegistration, ResyncTrigger, Serializer, Storage, StorageCallback, StorageEvent,
};
pub use store::{
    create_store, merge, HookContext, Merge, Modifier, Selection, State, StateHandler, Store,
    StoreConfig, StoreContext,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_works() {
        // Basic smoke test
        let store = Store::from_state(0_i32);
        assert_eq!(store.get(), 0);
        store.set(42);
        assert_eq!(store.get(), 42);
    }
}
