use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, OnceCell};
use tracing::{debug, warn};

use crate::error::{PersistError, Result};
use crate::persist::config::{
    PersistConfig, StorageBackend, StorageCallback, StorageEvent, StorageEvents,
};
use crate::persist::resync::{ResyncRegistration, ResyncTrigger};
use crate::persist::serializer::Serializer;
use crate::persist::storage::{AsyncStorage, Storage};

/// The persistence step a storage event or failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PersistPhase {
    /// Checking the `init_{key}` fingerprint at construction.
    Initialize,
    /// Reading `key` back into the store.
    Sync,
    /// Writing a changed state to `key`.
    Write,
}

impl PersistPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            PersistPhase::Initialize => "initialize",
            PersistPhase::Sync => "sync",
            PersistPhase::Write => "write",
        }
    }

    fn failure_message(&self) -> &'static str {
        match self {
            PersistPhase::Initialize => "failed to initialize persisted snapshots",
            PersistPhase::Sync => "failed to update state from persisted snapshot",
            PersistPhase::Write => "failed to update persisted snapshot",
        }
    }
}

impl fmt::Display for PersistPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The store side of the adapter: where loaded values go.
pub(crate) trait StateSlot<S>: Send + Sync {
    fn snapshot(&self) -> S;

    /// Replace the state and run the full dispatch.
    fn replace(&self, state: S);
}

enum WriterMessage<S> {
    Write(S),
    Flush(oneshot::Sender<()>),
}

enum Backend<S> {
    Blocking(Arc<dyn Storage>),
    Async {
        storage: Arc<dyn AsyncStorage>,
        runtime: Handle,
        writer: mpsc::UnboundedSender<WriterMessage<S>>,
        initialized: OnceCell<()>,
    },
}

/// Clears the in-flight flag when a load sequence ends, however it ends.
struct LoadingGuard(Arc<AtomicBool>);

impl LoadingGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| LoadingGuard(Arc::clone(flag)))
    }
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Mirrors a store's state into a storage backend.
///
/// Every failure is caught here, logged with `warn!` and forwarded to the
/// `on_storage_error` callback. Nothing is ever propagated to the store.
pub(crate) struct PersistenceAdapter<S> {
    key: String,
    init_key: String,
    backend: Backend<S>,
    serializer: Arc<dyn Serializer<S>>,
    initial_state: S,
    slot: Weak<dyn StateSlot<S>>,
    events: StorageEvents<S>,
    resync: Option<ResyncTrigger>,
    registration: Mutex<Option<ResyncRegistration>>,
    loading: Arc<AtomicBool>,
    writes_queued: AtomicU64,
    writes_done: AtomicU64,
}

impl<S> PersistenceAdapter<S>
where
    S: Clone + Send + Sync + 'static,
{
    /// Build the adapter, or `None` (with a warning) when the configuration
    /// cannot persist anything.
    pub(crate) fn new(
        config: PersistConfig<S>,
        initial_state: S,
        slot: Weak<dyn StateSlot<S>>,
    ) -> Option<Arc<Self>> {
        let PersistConfig {
            key,
            backend,
            runtime,
            serializer,
            resync,
            events,
        } = config;

        let (backend, receiver) = match backend {
            StorageBackend::None => {
                warn!(
                    key = %key,
                    error = %PersistError::NoStorage,
                    "persistence disabled, the store will not be persisted"
                );
                return None;
            }
            StorageBackend::Blocking(storage) => (Backend::Blocking(storage), None),
            StorageBackend::Async(storage) => {
                let Some(runtime) = runtime.or_else(|| Handle::try_current().ok()) else {
                    warn!(
                        key = %key,
                        error = %PersistError::NoRuntime,
                        "persistence disabled, the store will not be persisted"
                    );
                    return None;
                };
                let (writer, receiver) = mpsc::unbounded_channel();
                let backend = Backend::Async {
                    storage,
                    runtime,
                    writer,
                    initialized: OnceCell::new(),
                };
                (backend, Some(receiver))
            }
        };

        let adapter = Arc::new(Self {
            init_key: format!("init_{key}"),
            key,
            backend,
            serializer,
            initial_state,
            slot,
            events,
            resync,
            registration: Mutex::new(None),
            loading: Arc::new(AtomicBool::new(false)),
            writes_queued: AtomicU64::new(0),
            writes_done: AtomicU64::new(0),
        });

        if let (Backend::Async { runtime, .. }, Some(receiver)) = (&adapter.backend, receiver) {
            runtime.spawn(run_writer(Arc::downgrade(&adapter), receiver));
        }

        Some(adapter)
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    /// Check the `init_{key}` fingerprint. Runs inline for blocking backends
    /// and is spawned for async ones.
    pub(crate) fn load(self: &Arc<Self>) {
        match &self.backend {
            Backend::Blocking(storage) => {
                let result = self.initialize_blocking(storage.as_ref());
                self.finish(PersistPhase::Initialize, result, &self.current_state());
            }
            Backend::Async { runtime, .. } => {
                let adapter = Arc::downgrade(self);
                runtime.spawn(async move {
                    if let Some(adapter) = adapter.upgrade() {
                        adapter.ensure_initialized().await;
                    }
                });
            }
        }
    }

    /// First listener arrived: read the stored value and start listening for
    /// resync requests.
    pub(crate) fn attach(self: &Arc<Self>) {
        self.sync();

        if let Some(trigger) = &self.resync {
            let adapter = Arc::downgrade(self);
            let registration = trigger.register(move || {
                if let Some(adapter) = adapter.upgrade() {
                    debug!(key = %adapter.key, "resync requested");
                    adapter.sync();
                }
            });
            *self.registration.lock() = Some(registration);
        }
    }

    /// Last listener left: stop listening for resync requests.
    pub(crate) fn detach(&self) {
        let registration = self.registration.lock().take();
        drop(registration);
    }

    /// Load the stored value into the store if it differs from the current
    /// state. Overlapping loads are dropped, and an async load is discarded
    /// when a write-back was pending or queued around its read.
    pub(crate) fn sync(self: &Arc<Self>) {
        let Some(guard) = LoadingGuard::acquire(&self.loading) else {
            debug!(key = %self.key, "load already in flight, skipping");
            return;
        };

        match &self.backend {
            Backend::Blocking(storage) => {
                let result = storage
                    .get_item(&self.key)
                    .and_then(|stored| self.apply_stored(stored));
                drop(guard);
                self.finish(PersistPhase::Sync, result, &self.current_state());
            }
            Backend::Async {
                storage, runtime, ..
            } => {
                let adapter = Arc::downgrade(self);
                let storage = Arc::clone(storage);
                runtime.spawn(async move {
                    let _guard = guard;
                    let Some(adapter) = adapter.upgrade() else {
                        return;
                    };
                    adapter.ensure_initialized().await;
                    let queued = adapter.writes_queued.load(Ordering::Acquire);
                    let settled = adapter.writes_done.load(Ordering::Acquire) == queued;
                    let result = match storage.get_item(&adapter.key).await {
                        Ok(_) if !settled
                            || adapter.writes_queued.load(Ordering::Acquire) != queued =>
                        {
                            debug!(key = %adapter.key, "local write pending, keeping in-memory state");
                            Ok(())
                        }
                        Ok(stored) => adapter.apply_stored(stored),
                        Err(err) => Err(err),
                    };
                    adapter.finish(PersistPhase::Sync, result, &adapter.current_state());
                });
            }
        }
    }

    /// Mirror a freshly dispatched state. Queued for async backends.
    pub(crate) fn write_back(&self, state: &S) {
        match &self.backend {
            Backend::Blocking(storage) => {
                let result = self.write_blocking(storage.as_ref(), state);
                self.finish(PersistPhase::Write, result, state);
            }
            Backend::Async { writer, .. } => {
                self.writes_queued.fetch_add(1, Ordering::AcqRel);
                if writer.send(WriterMessage::Write(state.clone())).is_err() {
                    debug!(key = %self.key, "persistence writer stopped, dropping write");
                }
            }
        }
    }

    /// Wait until initialization, any in-flight load and every write queued
    /// so far have settled.
    pub(crate) async fn flush(&self) {
        let Backend::Async { writer, .. } = &self.backend else {
            return;
        };

        self.ensure_initialized().await;
        while self.loading.load(Ordering::Acquire) {
            tokio::task::yield_now().await;
        }

        let (done, barrier) = oneshot::channel();
        if writer.send(WriterMessage::Flush(done)).is_ok() {
            let _ = barrier.await;
        }
    }

    fn initialize_blocking(&self, storage: &dyn Storage) -> Result<()> {
        let stored = storage.get_item(&self.init_key)?;
        let fingerprint = self.serializer.stringify(&self.initial_state)?;

        if stored.as_deref() != Some(fingerprint.as_str()) {
            debug!(key = %self.key, "initial state changed, discarding persisted value");
            storage.set_item(&self.init_key, &fingerprint)?;
            storage.remove_item(&self.key)?;
        }
        Ok(())
    }

    async fn initialize_async(&self, storage: &dyn AsyncStorage) -> Result<()> {
        let stored = storage.get_item(&self.init_key).await?;
        let fingerprint = self.serializer.stringify(&self.initial_state)?;

        if stored.as_deref() != Some(fingerprint.as_str()) {
            debug!(key = %self.key, "initial state changed, discarding persisted value");
            storage.set_item(&self.init_key, &fingerprint).await?;
            storage.remove_item(&self.key).await?;
        }
        Ok(())
    }

    async fn ensure_initialized(&self) {
        let Backend::Async {
            storage,
            initialized,
            ..
        } = &self.backend
        else {
            return;
        };

        initialized
            .get_or_init(|| async {
                let result = self.initialize_async(storage.as_ref()).await;
                self.finish(PersistPhase::Initialize, result, &self.current_state());
            })
            .await;
    }

    fn write_blocking(&self, storage: &dyn Storage, state: &S) -> Result<()> {
        let stored = storage.get_item(&self.key)?;
        let serialized = self.serializer.stringify(state)?;

        if stored.as_deref() != Some(serialized.as_str()) {
            storage.set_item(&self.key, &serialized)?;
        }
        Ok(())
    }

    async fn write_async(&self, storage: &dyn AsyncStorage, state: &S) -> Result<()> {
        let stored = storage.get_item(&self.key).await?;
        let serialized = self.serializer.stringify(state)?;

        if stored.as_deref() != Some(serialized.as_str()) {
            storage.set_item(&self.key, &serialized).await?;
        }
        Ok(())
    }

    fn apply_stored(&self, stored: Option<String>) -> Result<()> {
        let Some(raw) = stored else {
            return Ok(());
        };
        // The store is gone; nothing to apply to.
        let Some(slot) = self.slot.upgrade() else {
            return Ok(());
        };

        let current = self.serializer.stringify(&slot.snapshot())?;
        if raw != current {
            let loaded = self.serializer.parse(&raw)?;
            debug!(key = %self.key, "applying persisted state");
            slot.replace(loaded);
        }
        Ok(())
    }

    fn current_state(&self) -> S {
        match self.slot.upgrade() {
            Some(slot) => slot.snapshot(),
            None => self.initial_state.clone(),
        }
    }

    fn finish(&self, phase: PersistPhase, result: Result<()>, state: &S) {
        match result {
            Ok(()) => {
                let callback = match phase {
                    PersistPhase::Initialize => &self.events.on_load,
                    PersistPhase::Sync => &self.events.on_sync,
                    PersistPhase::Write => &self.events.on_change,
                };
                self.emit(callback.as_ref(), phase, state, None);
            }
            Err(err) => {
                warn!(
                    key = %self.key,
                    phase = %phase,
                    error = %err,
                    "{}",
                    phase.failure_message()
                );
                self.emit(self.events.on_error.as_ref(), phase, state, Some(&err));
            }
        }
    }

    fn emit(
        &self,
        callback: Option<&StorageCallback<S>>,
        phase: PersistPhase,
        state: &S,
        error: Option<&PersistError>,
    ) {
        if let Some(callback) = callback {
            callback(&StorageEvent {
                key: &self.key,
                state,
                phase,
                error,
            });
        }
    }
}

/// Applies queued writes in order so async write-backs never overtake each
/// other.
async fn run_writer<S>(
    adapter: Weak<PersistenceAdapter<S>>,
    mut receiver: mpsc::UnboundedReceiver<WriterMessage<S>>,
) where
    S: Clone + Send + Sync + 'static,
{
    while let Some(message) = receiver.recv().await {
        match message {
            WriterMessage::Write(state) => {
                let Some(adapter) = adapter.upgrade() else {
                    break;
                };
                let Backend::Async { storage, .. } = &adapter.backend else {
                    break;
                };
                adapter.ensure_initialized().await;
                let result = adapter.write_async(storage.as_ref(), &state).await;
                adapter.writes_done.fetch_add(1, Ordering::AcqRel);
                adapter.finish(PersistPhase::Write, result, &state);
            }
            WriterMessage::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

impl<S> fmt::Debug for PersistenceAdapter<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistenceAdapter")
            .field("key", &self.key)
            .field("loading", &self.loading.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::storage::MemoryStorage;
    use serde_json::{json, Value};
    use std::sync::atomic::AtomicUsize;

    struct TestSlot {
        state: Mutex<Value>,
        replaced: AtomicUsize,
    }

    impl StateSlot<Value> for TestSlot {
        fn snapshot(&self) -> Value {
            self.state.lock().clone()
        }

        fn replace(&self, state: Value) {
            *self.state.lock() = state;
            self.replaced.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn slot(state: Value) -> Arc<TestSlot> {
        Arc::new(TestSlot {
            state: Mutex::new(state),
            replaced: AtomicUsize::new(0),
        })
    }

    fn adapter(storage: &MemoryStorage, slot: &Arc<TestSlot>) -> Arc<PersistenceAdapter<Value>> {
        let initial = slot.snapshot();
        let slot: Arc<dyn StateSlot<Value>> = slot.clone();
        PersistenceAdapter::new(
            PersistConfig::new("k").storage(storage.clone()),
            initial,
            Arc::downgrade(&slot),
        )
        .unwrap()
    }

    #[test]
    fn phase_display() {
        assert_eq!(PersistPhase::Initialize.to_string(), "initialize");
        assert_eq!(PersistPhase::Sync.to_string(), "sync");
        assert_eq!(PersistPhase::Write.to_string(), "write");
    }

    #[test]
    fn missing_backend_disables_persistence() {
        let slot: Arc<dyn StateSlot<Value>> = slot(json!(0));
        let weak = Arc::downgrade(&slot);
        assert!(PersistenceAdapter::new(PersistConfig::<Value>::new("k"), json!(0), weak).is_none());
    }

    #[test]
    fn async_backend_without_runtime_disables_persistence() {
        let slot: Arc<dyn StateSlot<Value>> = slot(json!(0));
        let weak = Arc::downgrade(&slot);
        let config = PersistConfig::new("k")
            .async_storage(crate::persist::storage::AsyncMemoryStorage::new());
        assert!(PersistenceAdapter::new(config, json!(0), weak).is_none());
    }

    #[test]
    fn initialize_purges_stale_value() {
        let storage = MemoryStorage::new();
        storage.set_item("init_k", r#"{"count":1}"#).unwrap();
        storage.set_item("k", r#"{"count":99}"#).unwrap();

        let slot = slot(json!({ "count": 0 }));
        adapter(&storage, &slot).load();

        assert_eq!(storage.get_item("init_k").unwrap().as_deref(), Some(r#"{"count":0}"#));
        assert!(!storage.contains_key("k"));
    }

    #[test]
    fn initialize_keeps_value_when_fingerprint_matches() {
        let storage = MemoryStorage::new();
        storage.set_item("init_k", r#"{"count":0}"#).unwrap();
        storage.set_item("k", r#"{"count":5}"#).unwrap();

        let slot = slot(json!({ "count": 0 }));
        adapter(&storage, &slot).load();

        assert_eq!(storage.get_item("k").unwrap().as_deref(), Some(r#"{"count":5}"#));
    }

    #[test]
    fn sync_replaces_only_when_stored_value_differs() {
        let storage = MemoryStorage::new();
        let slot = slot(json!({ "count": 0 }));
        let adapter = adapter(&storage, &slot);
        adapter.load();

        adapter.sync();
        assert_eq!(slot.replaced.load(Ordering::SeqCst), 0);

        storage.set_item("k", r#"{"count":0}"#).unwrap();
        adapter.sync();
        assert_eq!(slot.replaced.load(Ordering::SeqCst), 0);

        storage.set_item("k", r#"{"count":3}"#).unwrap();
        adapter.sync();
        assert_eq!(slot.replaced.load(Ordering::SeqCst), 1);
        assert_eq!(slot.snapshot(), json!({ "count": 3 }));
    }

    #[test]
    fn overlapping_sync_is_dropped() {
        let storage = MemoryStorage::new();
        storage.set_item("k", r#"{"count":3}"#).unwrap();
        let slot = slot(json!({ "count": 0 }));
        let adapter = adapter(&storage, &slot);

        let held = LoadingGuard::acquire(&adapter.loading).unwrap();
        adapter.sync();
        assert_eq!(slot.replaced.load(Ordering::SeqCst), 0);

        drop(held);
        adapter.sync();
        assert_eq!(slot.replaced.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn write_back_skips_identical_snapshot() {
        let storage = MemoryStorage::new();
        let slot = slot(json!({ "count": 0 }));
        let writes = Arc::new(AtomicUsize::new(0));
        let writes_clone = writes.clone();

        let initial = slot.snapshot();
        let dyn_slot: Arc<dyn StateSlot<Value>> = slot.clone();
        let adapter = PersistenceAdapter::new(
            PersistConfig::new("k")
                .storage(storage.clone())
                .on_storage_change(move |_| {
                    writes_clone.fetch_add(1, Ordering::SeqCst);
                }),
            initial,
            Arc::downgrade(&dyn_slot),
        )
        .unwrap();

        adapter.write_back(&json!({ "count": 1 }));
        adapter.write_back(&json!({ "count": 1 }));

        assert_eq!(storage.get_item("k").unwrap().as_deref(), Some(r#"{"count":1}"#));
        assert_eq!(writes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn resync_registration_follows_attach_and_detach() {
        let storage = MemoryStorage::new();
        let trigger = ResyncTrigger::new();
        let slot = slot(json!({ "count": 0 }));
        let initial = slot.snapshot();
        let dyn_slot: Arc<dyn StateSlot<Value>> = slot.clone();
        let adapter = PersistenceAdapter::new(
            PersistConfig::new("k")
                .storage(storage.clone())
                .resync_on(&trigger),
            initial,
            Arc::downgrade(&dyn_slot),
        )
        .unwrap();

        adapter.attach();
        assert_eq!(trigger.registered(), 1);

        storage.set_item("k", r#"{"count":8}"#).unwrap();
        trigger.notify();
        assert_eq!(slot.snapshot(), json!({ "count": 8 }));

        adapter.detach();
        assert_eq!(trigger.registered(), 0);
    }
}
