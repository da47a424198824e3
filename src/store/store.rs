use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex, RwLock};
use tracing::debug;

use crate::observable::{Listener, Observable, Subscription};
use crate::persist::{PersistenceAdapter, StateSlot};
use crate::store::config::{Hook, Hooks, StoreConfig};
use crate::store::merge::{merge, Modifier, State};

pub(crate) struct StoreInner<S> {
    // Held across merge and dispatch, and across the attach/detach edges.
    // Reentrant so hooks and listeners may mutate the store they observe.
    gate: ReentrantMutex<()>,
    state: RwLock<S>,
    initial_state: S,
    listeners: Mutex<Vec<(u64, Listener<S>)>>,
    next_listener: AtomicU64,
    hooks: Hooks<S>,
    persistence: Option<Arc<PersistenceAdapter<S>>>,
}

impl<S: State> StoreInner<S> {
    fn get(&self) -> S {
        self.state.read().clone()
    }

    /// Merge without notifying anyone.
    fn set_silently(&self, modifier: Modifier<'_, S>) -> S {
        let current = self.get();
        let next = merge(&current, modifier);
        *self.state.write() = next.clone();
        next
    }

    fn set(&self, modifier: Modifier<'_, S>) -> S {
        let _gate = self.gate.lock();
        self.set_silently(modifier);
        self.dispatch();
        self.get()
    }

    fn replace_silently(&self, state: S) -> S {
        *self.state.write() = state.clone();
        state
    }

    fn reset_silently(&self) -> S {
        self.replace_silently(self.initial_state.clone())
    }

    fn reset(&self) -> S {
        let _gate = self.gate.lock();
        self.reset_silently();
        self.dispatch();
        self.get()
    }

    /// Persistence write, then `on_change`, then every listener once.
    fn dispatch(&self) {
        if let Some(persistence) = &self.persistence {
            persistence.write_back(&self.get());
        }

        self.run_hook(self.hooks.on_change.as_ref(), true);

        let state = self.get();
        let listeners: Vec<Listener<S>> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            listener(&state);
        }
    }

    fn subscribe(self: &Arc<Self>, listener: Listener<S>) -> Subscription {
        let _gate = self.gate.lock();
        if self.listeners.lock().is_empty() {
            debug!("store attached");
            if let Some(persistence) = &self.persistence {
                persistence.attach();
            }
            self.run_hook(self.hooks.on_attach.as_ref(), false);
        }

        self.run_hook(self.hooks.on_subscribe.as_ref(), false);

        listener(&self.get());

        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, listener));

        let inner = Arc::downgrade(self);
        Subscription::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.unsubscribe(id);
            }
        })
    }

    fn unsubscribe(&self, id: u64) {
        let _gate = self.gate.lock();
        let (removed, detached) = {
            let mut listeners = self.listeners.lock();
            let removed = listeners
                .iter()
                .position(|(listener_id, _)| *listener_id == id)
                .map(|index| listeners.remove(index));
            (removed, listeners.is_empty())
        };

        if removed.is_none() {
            return;
        }
        drop(removed);

        self.run_hook(self.hooks.on_unsubscribe.as_ref(), false);

        if detached {
            debug!("store detached");
            if let Some(persistence) = &self.persistence {
                persistence.detach();
            }
            self.run_hook(self.hooks.on_detach.as_ref(), false);
        }
    }

    fn run_hook(&self, hook: Option<&Hook<S>>, silent: bool) {
        if let Some(hook) = hook {
            hook(&HookContext {
                inner: self,
                state: self.get(),
                silent,
            });
        }
    }
}

impl<S: State> StateSlot<S> for StoreInner<S> {
    fn snapshot(&self) -> S {
        self.get()
    }

    fn replace(&self, state: S) {
        let _gate = self.gate.lock();
        self.replace_silently(state);
        self.dispatch();
    }
}

/// A thread-safe observable state container.
///
/// State is replaced as a whole on every change, never mutated in place.
/// Every `set`, `update` and `reset` runs the same dispatch: persistence
/// write-back, the `on_change` hook, then every listener exactly once with
/// the final state.
///
/// Clones share the same state. Mutations and attach/detach transitions
/// from different threads are serialized: each `set` merges against the
/// state left by the previous one and completes its dispatch before the
/// next begins. Hooks and listeners may call back into the store on the
/// same thread.
///
/// # Examples
///
/// ```
/// use dharma::{Store, StoreConfig};
/// use serde_json::{json, Value};
///
/// let store = Store::new(StoreConfig::new(json!({ "a": 1, "b": 2 })));
///
/// let sub = store.subscribe(|state: &Value| println!("{state}"));
/// store.set(json!({ "b": 3 }));
///
/// assert_eq!(store.get(), json!({ "a": 1, "b": 3 }));
/// drop(sub);
/// ```
pub struct Store<S, A = ()> {
    inner: Arc<StoreInner<S>>,
    actions: Arc<A>,
}

impl<S: State, A> Store<S, A> {
    /// Build a store. Actions are defined, the persisted initial-state
    /// fingerprint is checked and `on_load` runs, in that order.
    pub fn new(config: StoreConfig<S, A>) -> Self {
        let StoreConfig {
            initial_state,
            define_actions,
            hooks,
            persist,
        } = config;

        let inner = Arc::new_cyclic(|weak: &Weak<StoreInner<S>>| {
            let slot: Weak<dyn StateSlot<S>> = weak.clone();
            let persistence = persist.and_then(|config| {
                PersistenceAdapter::new(config, initial_state.clone(), slot)
            });

            StoreInner {
                gate: ReentrantMutex::new(()),
                state: RwLock::new(initial_state.clone()),
                initial_state,
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(0),
                hooks,
                persistence,
            }
        });

        let actions = define_actions(StateHandler {
            inner: Arc::clone(&inner),
        });

        if let Some(persistence) = &inner.persistence {
            persistence.load();
        }
        inner.run_hook(inner.hooks.on_load.as_ref(), false);

        Self {
            inner,
            actions: Arc::new(actions),
        }
    }

    /// A clone of the current state.
    pub fn get(&self) -> S {
        self.inner.get()
    }

    /// Read the state in place without cloning it.
    ///
    /// The state is locked for reading while `f` runs; `f` must not mutate
    /// the store.
    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&S) -> R,
    {
        f(&self.inner.state.read())
    }

    /// Merge `patch` into the state and dispatch. Returns the final state.
    pub fn set(&self, patch: S::Patch) -> S {
        self.inner.set(Modifier::Patch(patch))
    }

    /// Compute a patch from the current state, merge it and dispatch.
    pub fn update<F>(&self, f: F) -> S
    where
        F: FnOnce(&S) -> S::Patch,
    {
        self.inner.set(Modifier::update(f))
    }

    /// Apply any [`Modifier`] and dispatch.
    pub fn modify(&self, modifier: Modifier<'_, S>) -> S {
        self.inner.set(modifier)
    }

    /// Restore the initial state and dispatch.
    pub fn reset(&self) -> S {
        self.inner.reset()
    }

    /// Register a listener.
    ///
    /// The first listener attaches the store: the persisted value is loaded
    /// and `on_attach` runs. `on_subscribe` runs on every call, then the
    /// listener receives the current state once. Dropping the returned
    /// [`Subscription`] removes it.
    ///
    /// With an async backend the persisted value arrives later. It is not
    /// applied if a write-back was pending when the read started or was
    /// queued while it ran: local changes win over an older stored value.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&S) + Send + Sync + 'static,
    {
        self.inner.subscribe(Arc::new(listener))
    }

    /// The actions built at construction.
    pub fn actions(&self) -> &A {
        &self.actions
    }

    pub fn initial_state(&self) -> &S {
        &self.inner.initial_state
    }

    /// Number of active listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    /// Whether the store mirrors its state into a backend.
    pub fn is_persistent(&self) -> bool {
        self.inner.persistence.is_some()
    }

    /// Wait for pending asynchronous persistence work to settle.
    ///
    /// Returns immediately for non-persistent stores and blocking backends.
    pub async fn flush(&self) {
        if let Some(persistence) = &self.inner.persistence {
            persistence.flush().await;
        }
    }
}

impl<S: State> Store<S> {
    /// A store with no actions, hooks or persistence.
    pub fn from_state(initial_state: S) -> Self {
        Self::new(StoreConfig::new(initial_state))
    }
}

/// Build a store from its configuration.
pub fn create_store<S: State, A>(config: StoreConfig<S, A>) -> Store<S, A> {
    Store::new(config)
}

impl<S, A> Clone for Store<S, A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            actions: Arc::clone(&self.actions),
        }
    }
}

impl<S, A> Observable<S> for Store<S, A>
where
    S: State,
    A: Send + Sync + 'static,
{
    fn get(&self) -> S {
        self.inner.get()
    }

    fn observe(&self, listener: Listener<S>) -> Subscription {
        self.inner.subscribe(listener)
    }
}

impl<S: State + fmt::Debug, A> fmt::Debug for Store<S, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Store");
        debug
            .field("state", &*self.inner.state.read())
            .field("listeners", &self.listener_count());
        if let Some(persistence) = &self.inner.persistence {
            debug.field("persist_key", &persistence.key());
        }
        debug.finish()
    }
}

/// What a lifecycle hook sees: the state when the hook fired plus the
/// store's mutation primitives.
///
/// Inside `on_change` the context is silent: `set`, `update` and `reset` only
/// merge, and the dispatch already in progress delivers the result.
pub struct HookContext<'a, S> {
    inner: &'a StoreInner<S>,
    state: S,
    silent: bool,
}

impl<S: State> HookContext<'_, S> {
    /// The state when the hook fired.
    pub fn state(&self) -> &S {
        &self.state
    }

    /// The live state, including changes made by this hook.
    pub fn get(&self) -> S {
        self.inner.get()
    }

    pub fn initial_state(&self) -> &S {
        &self.inner.initial_state
    }

    pub fn is_silent(&self) -> bool {
        self.silent
    }

    pub fn set(&self, patch: S::Patch) -> S {
        self.modify(Modifier::Patch(patch))
    }

    pub fn update<F>(&self, f: F) -> S
    where
        F: FnOnce(&S) -> S::Patch,
    {
        self.modify(Modifier::update(f))
    }

    pub fn modify(&self, modifier: Modifier<'_, S>) -> S {
        if self.silent {
            self.inner.set_silently(modifier)
        } else {
            self.inner.set(modifier)
        }
    }

    pub fn reset(&self) -> S {
        if self.silent {
            self.inner.reset_silently()
        } else {
            self.inner.reset()
        }
    }
}

/// The handle passed to an action-definition function.
///
/// Holds the store's mutation primitives; every mutation dispatches.
pub struct StateHandler<S> {
    inner: Arc<StoreInner<S>>,
}

impl<S: State> StateHandler<S> {
    pub fn get(&self) -> S {
        self.inner.get()
    }

    pub fn set(&self, patch: S::Patch) -> S {
        self.inner.set(Modifier::Patch(patch))
    }

    pub fn update<F>(&self, f: F) -> S
    where
        F: FnOnce(&S) -> S::Patch,
    {
        self.inner.set(Modifier::update(f))
    }

    pub fn modify(&self, modifier: Modifier<'_, S>) -> S {
        self.inner.set(modifier)
    }

    pub fn reset(&self) -> S {
        self.inner.reset()
    }

    pub fn initial_state(&self) -> &S {
        &self.inner.initial_state
    }
}

impl<S> Clone for StateHandler<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> fmt::Debug for StateHandler<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateHandler").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        (count, move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn store_get_set() {
        let store = Store::from_state(json!({ "count": 0, "name": "test" }));
        assert_eq!(store.get(), json!({ "count": 0, "name": "test" }));

        let next = store.set(json!({ "count": 42 }));
        assert_eq!(next, json!({ "count": 42, "name": "test" }));
        assert_eq!(store.get(), next);
    }

    #[test]
    fn store_update() {
        let store = Store::from_state(10_i32);
        assert_eq!(store.update(|n| n + 5), 15);
        assert_eq!(store.get(), 15);
    }

    #[test]
    fn store_read_does_not_clone() {
        let store = Store::from_state(vec![1, 2, 3]);
        assert_eq!(store.read(|v| v.len()), 3);
    }

    #[test]
    fn subscribe_delivers_initial_state() {
        let store = Store::from_state(7_i32);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        let _sub = store.subscribe(move |n: &i32| seen_clone.lock().push(*n));
        store.set(8);

        assert_eq!(*seen.lock(), vec![7, 8]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let store = Store::from_state(0_i32);
        let (calls, bump) = counter();

        let sub = store.subscribe(move |_: &i32| bump());
        store.set(1);
        sub.unsubscribe();
        store.set(2);

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.listener_count(), 0);
    }

    #[test]
    fn on_change_mutations_are_silent() {
        let (changes, bump) = counter();
        let store = Store::new(StoreConfig::new(json!({ "value": 0, "doubled": 0 })).on_change(
            move |ctx| {
                bump();
                let value = ctx.state()["value"].as_i64().unwrap_or_default();
                assert!(ctx.is_silent());
                ctx.set(json!({ "doubled": value * 2 }));
            },
        ));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let _sub = store.subscribe(move |state: &Value| seen_clone.lock().push(state.clone()));

        store.set(json!({ "value": 4 }));

        assert_eq!(changes.load(Ordering::SeqCst), 1);
        assert_eq!(
            seen.lock().last().cloned(),
            Some(json!({ "value": 4, "doubled": 8 }))
        );
        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn reset_replaces_state() {
        let store = Store::from_state(json!({ "a": 1 }));
        store.set(json!({ "b": 2 }));
        assert_eq!(store.reset(), json!({ "a": 1 }));
    }

    #[test]
    fn hooks_may_mutate_with_full_dispatch() {
        let store = Store::new(StoreConfig::new(0_i32).on_attach(|ctx| {
            assert!(!ctx.is_silent());
            ctx.set(100);
        }));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let _sub = store.subscribe(move |n: &i32| seen_clone.lock().push(*n));

        assert_eq!(*seen.lock(), vec![100]);
    }

    #[test]
    fn on_load_runs_once_at_construction() {
        let (loads, bump) = counter();
        let store = Store::new(StoreConfig::new(0_i32).on_load(move |_| bump()));
        let _sub = store.subscribe(|_: &i32| {});
        store.set(1);
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clones_share_state() {
        let store = Store::from_state(0_i32);
        let other = store.clone();
        other.set(3);
        assert_eq!(store.get(), 3);
    }

    #[test]
    fn listener_may_unsubscribe_during_dispatch() {
        let store = Store::from_state(0_i32);
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let slot_clone = slot.clone();

        let sub = store.subscribe(move |n: &i32| {
            if *n > 0 {
                slot_clone.lock().take();
            }
        });
        *slot.lock() = Some(sub);

        store.set(1);
        assert_eq!(store.listener_count(), 0);
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let store = Store::from_state(0_usize);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..2_000 {
                        store.update(|n| n + 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.get(), 16_000);
    }

    #[test]
    fn concurrent_first_subscribers_attach_once() {
        for _ in 0..50 {
            let (attached, on_attach) = counter();
            let (detached, on_detach) = counter();
            let store = Store::new(
                StoreConfig::new(0_i32)
                    .on_attach(move |_| on_attach())
                    .on_detach(move |_| on_detach()),
            );
            let barrier = Arc::new(std::sync::Barrier::new(4));

            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let store = store.clone();
                    let barrier = barrier.clone();
                    std::thread::spawn(move || {
                        barrier.wait();
                        store.subscribe(|_: &i32| {})
                    })
                })
                .collect();
            let subscriptions: Vec<_> = handles
                .into_iter()
                .map(|handle| handle.join().unwrap())
                .collect();

            assert_eq!(attached.load(Ordering::SeqCst), 1);
            assert_eq!(store.listener_count(), 4);

            drop(subscriptions);
            assert_eq!(detached.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn hooks_and_listeners_may_mutate_the_store() {
        let store = Store::new(StoreConfig::new(0_i32).on_attach(|ctx| {
            ctx.set(10);
        }));
        let inner = store.clone();

        let _sub = store.subscribe(move |n: &i32| {
            if *n == 11 {
                inner.set(12);
            }
        });
        assert_eq!(store.get(), 10);

        store.set(11);
        assert_eq!(store.get(), 12);
    }
}
