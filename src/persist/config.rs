use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::runtime::Handle;

use crate::error::PersistError;
use crate::persist::adapter::PersistPhase;
use crate::persist::resync::ResyncTrigger;
use crate::persist::serializer::{JsonSerializer, Serializer};
use crate::persist::storage::{AsyncStorage, Storage};

/// Payload of the storage event callbacks.
pub struct StorageEvent<'a, S> {
    /// The persistence key of the store.
    pub key: &'a str,
    /// The store state when the event fired.
    pub state: &'a S,
    /// Which persistence step produced the event.
    pub phase: PersistPhase,
    /// The failure, for `on_storage_error`.
    pub error: Option<&'a PersistError>,
}

pub type StorageCallback<S> = Arc<dyn Fn(&StorageEvent<'_, S>) + Send + Sync>;

pub(crate) struct StorageEvents<S> {
    pub(crate) on_load: Option<StorageCallback<S>>,
    pub(crate) on_sync: Option<StorageCallback<S>>,
    pub(crate) on_change: Option<StorageCallback<S>>,
    pub(crate) on_error: Option<StorageCallback<S>>,
}

impl<S> Default for StorageEvents<S> {
    fn default() -> Self {
        Self {
            on_load: None,
            on_sync: None,
            on_change: None,
            on_error: None,
        }
    }
}

pub(crate) enum StorageBackend {
    None,
    Blocking(Arc<dyn Storage>),
    Async(Arc<dyn AsyncStorage>),
}

/// Persistence settings for a store.
///
/// Two entries are kept in the backend: `key` holds the serialized state and
/// `init_{key}` a fingerprint of the initial state. When the fingerprint no
/// longer matches, the persisted state is discarded.
///
/// # Examples
///
/// ```
/// use dharma::{MemoryStorage, PersistConfig, Store, StoreConfig};
/// use serde_json::json;
///
/// let storage = MemoryStorage::new();
/// let store = Store::new(
///     StoreConfig::new(json!({ "count": 0 }))
///         .persist(PersistConfig::new("count").storage(storage.clone())),
/// );
///
/// store.set(json!({ "count": 1 }));
/// assert!(storage.contains_key("count"));
/// assert!(storage.contains_key("init_count"));
/// ```
pub struct PersistConfig<S> {
    pub(crate) key: String,
    pub(crate) backend: StorageBackend,
    pub(crate) runtime: Option<Handle>,
    pub(crate) serializer: Arc<dyn Serializer<S>>,
    pub(crate) resync: Option<ResyncTrigger>,
    pub(crate) events: StorageEvents<S>,
}

impl<S: Serialize + DeserializeOwned + 'static> PersistConfig<S> {
    /// Persist under `key` using JSON.
    pub fn new(key: impl Into<String>) -> Self {
        Self::with_serializer(key, JsonSerializer)
    }
}

impl<S: 'static> PersistConfig<S> {
    /// Persist under `key` using a custom serializer.
    pub fn with_serializer(key: impl Into<String>, serializer: impl Serializer<S> + 'static) -> Self {
        Self {
            key: key.into(),
            backend: StorageBackend::None,
            runtime: None,
            serializer: Arc::new(serializer),
            resync: None,
            events: StorageEvents::default(),
        }
    }

    /// The persistence key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Use a synchronous backend.
    pub fn storage(self, storage: impl Storage + 'static) -> Self {
        self.shared_storage(Arc::new(storage))
    }

    /// Use a synchronous backend shared with other stores.
    pub fn shared_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.backend = StorageBackend::Blocking(storage);
        self
    }

    /// Use an asynchronous backend. Reads and writes are spawned on the
    /// configured runtime, or on the runtime current at store construction.
    pub fn async_storage(mut self, storage: impl AsyncStorage + 'static) -> Self {
        self.backend = StorageBackend::Async(Arc::new(storage));
        self
    }

    /// Runtime driving an asynchronous backend.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Replace the serializer.
    pub fn serializer(mut self, serializer: impl Serializer<S> + 'static) -> Self {
        self.serializer = Arc::new(serializer);
        self
    }

    /// Re-read storage whenever `trigger` fires while the store is attached.
    pub fn resync_on(mut self, trigger: &ResyncTrigger) -> Self {
        self.resync = Some(trigger.clone());
        self
    }

    /// Invoked after the initial-state fingerprint has been checked.
    pub fn on_storage_load<F>(mut self, callback: F) -> Self
    where
        F: Fn(&StorageEvent<'_, S>) + Send + Sync + 'static,
    {
        self.events.on_load = Some(Arc::new(callback));
        self
    }

    /// Invoked after every read of the persisted value.
    pub fn on_storage_sync<F>(mut self, callback: F) -> Self
    where
        F: Fn(&StorageEvent<'_, S>) + Send + Sync + 'static,
    {
        self.events.on_sync = Some(Arc::new(callback));
        self
    }

    /// Invoked after every write-back of a changed state.
    pub fn on_storage_change<F>(mut self, callback: F) -> Self
    where
        F: Fn(&StorageEvent<'_, S>) + Send + Sync + 'static,
    {
        self.events.on_change = Some(Arc::new(callback));
        self
    }

    /// Invoked whenever a persistence step fails.
    pub fn on_storage_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&StorageEvent<'_, S>) + Send + Sync + 'static,
    {
        self.events.on_error = Some(Arc::new(callback));
        self
    }
}

impl<S> fmt::Debug for PersistConfig<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let backend = match self.backend {
            StorageBackend::None => "none",
            StorageBackend::Blocking(_) => "blocking",
            StorageBackend::Async(_) => "async",
        };
        f.debug_struct("PersistConfig")
            .field("key", &self.key)
            .field("backend", &backend)
            .field("resync", &self.resync.is_some())
            .finish()
    }
}
