//! The store engine.
//!
//! A [`Store`] holds one value, merges updates into it, runs lifecycle hooks
//! and notifies listeners synchronously. Persistence, actions and hooks are
//! configured through [`StoreConfig`].

mod config;
mod context;
mod merge;
mod selector;
mod store;

pub use config::{Hook, StoreConfig};
pub use context::StoreContext;
pub use merge::{merge, Merge, Modifier, State};
pub use selector::Selection;
pub use store::{create_store, HookContext, StateHandler, Store};
