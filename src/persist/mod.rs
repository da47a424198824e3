//! Mirroring store state into key-value backends.

mod adapter;
mod config;
mod resync;
mod serializer;
mod storage;

pub(crate) use adapter::{PersistenceAdapter, StateSlot};
pub use adapter::PersistPhase;
pub use config::{PersistConfig, StorageCallback, StorageEvent};
pub use resync::{ResyncRegistration, ResyncTrigger};
pub use serializer::{JsonSerializer, Serializer};
pub use storage::{AsyncMemoryStorage, AsyncStorage, MemoryStorage, Storage};
