use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};

use crate::equality::{DeepEq, DependencySnapshot, DependencyTracker};
use crate::observable::{Listener, Observable, Subscription};

struct MemoState<S, T> {
    value: Option<T>,
    stale: bool,
    dependencies: Option<Box<dyn DependencyTracker<S>>>,
}

trait DerivedNode<T>: Send + Sync {
    fn get(&self) -> T;
    fn subscribe(self: Arc<Self>, listener: Listener<T>) -> Subscription;
    fn mount(self: Arc<Self>);
    fn unmount(&self);
    fn is_mounted(&self) -> bool;
}

struct DerivedInner<S, T> {
    source: Arc<dyn Observable<S>>,
    derive_fn: Box<dyn Fn(&S) -> T + Send + Sync>,
    memo: Mutex<MemoState<S, T>>,
    listeners: Mutex<Vec<(u64, Listener<T>)>>,
    next_listener: AtomicU64,
    source_subscription: Mutex<Option<Subscription>>,
    // Held across the mount/unmount edges of the listener set.
    gate: ReentrantMutex<()>,
}

impl<S, T> DerivedInner<S, T>
where
    S: 'static,
    T: Clone + Send + Sync + 'static,
{
    fn on_source_change(&self) {
        self.memo.lock().stale = true;

        let listeners: Vec<Listener<T>> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        if listeners.is_empty() {
            return;
        }

        let value = self.get();
        for listener in listeners {
            listener(&value);
        }
    }

    fn unsubscribe(&self, id: u64) {
        let _gate = self.gate.lock();
        let (removed, empty) = {
            let mut listeners = self.listeners.lock();
            let removed = listeners
                .iter()
                .position(|(listener_id, _)| *listener_id == id)
                .map(|index| listeners.remove(index));
            (removed, listeners.is_empty())
        };

        if removed.is_some() && empty {
            self.unmount();
        }
    }
}

impl<S, T> DerivedNode<T> for DerivedInner<S, T>
where
    S: 'static,
    T: Clone + Send + Sync + 'static,
{
    fn get(&self) -> T {
        let (mut dependencies, cached) = {
            let mut memo = self.memo.lock();
            if !memo.stale {
                if let Some(value) = &memo.value {
                    return value.clone();
                }
            }
            (memo.dependencies.take(), memo.value.take())
        };

        let state = self.source.get();
        let changed = dependencies
            .as_mut()
            .map_or(true, |dependencies| dependencies.changed(&state));

        let value = match cached {
            Some(value) if !changed => value,
            _ => (self.derive_fn)(&state),
        };

        let mut memo = self.memo.lock();
        memo.value = Some(value.clone());
        memo.dependencies = dependencies;
        memo.stale = false;
        value
    }

    fn subscribe(self: Arc<Self>, listener: Listener<T>) -> Subscription {
        let _gate = self.gate.lock();
        if self.listeners.lock().is_empty() {
            Arc::clone(&self).mount();
        }

        listener(&self.get());

        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, listener));

        let node = Arc::downgrade(&self);
        Subscription::new(move || {
            if let Some(node) = node.upgrade() {
                node.unsubscribe(id);
            }
        })
    }

    fn mount(self: Arc<Self>) {
        let _gate = self.gate.lock();
        if self.is_mounted() {
            return;
        }

        let node = Arc::downgrade(&self);
        let subscription = self.source.observe(Arc::new(move |_: &S| {
            if let Some(node) = node.upgrade() {
                node.on_source_change();
            }
        }));

        let previous = self.source_subscription.lock().replace(subscription);
        drop(previous);
    }

    fn unmount(&self) {
        let _gate = self.gate.lock();
        let subscription = self.source_subscription.lock().take();
        drop(subscription);
    }

    fn is_mounted(&self) -> bool {
        self.source_subscription.lock().is_some()
    }
}

/// A read-only value computed from another observable.
///
/// Construction is free: nothing is computed and the source is not
/// subscribed to. The derive function runs on the first [`get`](Derived::get)
/// and then only when the memo is stale. The memo goes stale whenever the
/// source notifies, which only happens while the derived value is mounted
/// (explicitly, or because it has listeners). With a dependency function,
/// a stale memo is only recomputed if the selected dependencies changed.
///
/// An unmounted derived value keeps returning its last memo.
///
/// # Examples
///
/// ```
/// use dharma::{derive, Store};
/// use serde_json::{json, Value};
///
/// let store = Store::from_state(json!({ "count": 2 }));
/// let doubled = derive(&store, |state: &Value| state["count"].as_i64().unwrap_or(0) * 2);
///
/// let _sub = doubled.subscribe(|value: &i64| println!("doubled: {value}"));
/// store.set(json!({ "count": 5 }));
/// assert_eq!(doubled.get(), 10);
/// ```
pub struct Derived<T> {
    node: Arc<dyn DerivedNode<T>>,
}

impl<T: Clone + Send + Sync + 'static> Derived<T> {
    /// The memoized value, recomputed first if stale.
    pub fn get(&self) -> T {
        self.node.get()
    }

    /// Register a listener. The first listener mounts the derived value;
    /// dropping the last subscription unmounts it.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        Arc::clone(&self.node).subscribe(Arc::new(listener))
    }

    /// Subscribe to the source without registering a listener. No-op when
    /// already mounted.
    pub fn mount(&self) {
        Arc::clone(&self.node).mount();
    }

    /// Drop the source subscription. Existing listeners stay registered but
    /// are not notified until the value is mounted again.
    pub fn unmount(&self) {
        self.node.unmount();
    }

    pub fn is_mounted(&self) -> bool {
        self.node.is_mounted()
    }
}

impl<T> Clone for Derived<T> {
    fn clone(&self) -> Self {
        Self {
            node: Arc::clone(&self.node),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Observable<T> for Derived<T> {
    fn get(&self) -> T {
        self.node.get()
    }

    fn observe(&self, listener: Listener<T>) -> Subscription {
        Arc::clone(&self.node).subscribe(listener)
    }
}

impl<T> fmt::Debug for Derived<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Derived")
            .field("mounted", &self.node.is_mounted())
            .finish()
    }
}

fn build<S, T, O, F>(
    source: &O,
    derive_fn: F,
    dependencies: Option<Box<dyn DependencyTracker<S>>>,
) -> Derived<T>
where
    S: 'static,
    T: Clone + Send + Sync + 'static,
    O: Observable<S> + Clone + 'static,
    F: Fn(&S) -> T + Send + Sync + 'static,
{
    let inner = DerivedInner {
        source: Arc::new(source.clone()),
        derive_fn: Box::new(derive_fn),
        memo: Mutex::new(MemoState {
            value: None,
            stale: true,
            dependencies,
        }),
        listeners: Mutex::new(Vec::new()),
        next_listener: AtomicU64::new(0),
        source_subscription: Mutex::new(None),
        gate: ReentrantMutex::new(()),
    };

    Derived {
        node: Arc::new(inner),
    }
}

/// Derive a value from `source`, recomputed whenever the source changed.
pub fn derive<S, T, O, F>(source: &O, derive_fn: F) -> Derived<T>
where
    S: 'static,
    T: Clone + Send + Sync + 'static,
    O: Observable<S> + Clone + 'static,
    F: Fn(&S) -> T + Send + Sync + 'static,
{
    build(source, derive_fn, None)
}

/// Derive a value from `source`, recomputed only when `dependency_fn`
/// selects something not deeply equal to its previous selection.
///
/// # Examples
///
/// ```
/// use dharma::{derive_with_deps, Store};
/// use serde_json::{json, Value};
/// use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
///
/// let store = Store::from_state(json!({ "count": 1, "other": "a" }));
/// let runs = Arc::new(AtomicUsize::new(0));
/// let runs_clone = runs.clone();
///
/// let doubled = derive_with_deps(
///     &store,
///     move |state: &Value| {
///         runs_clone.fetch_add(1, Ordering::SeqCst);
///         state["count"].as_i64().unwrap_or(0) * 2
///     },
///     |state: &Value| vec![state["count"].clone()],
/// );
/// doubled.mount();
///
/// assert_eq!(doubled.get(), 2);
/// store.set(json!({ "other": "b" }));
/// assert_eq!(doubled.get(), 2);
/// assert_eq!(runs.load(Ordering::SeqCst), 1);
/// ```
pub fn derive_with_deps<S, T, D, O, F, G>(source: &O, derive_fn: F, dependency_fn: G) -> Derived<T>
where
    S: 'static,
    T: Clone + Send + Sync + 'static,
    D: DeepEq + Send + 'static,
    O: Observable<S> + Clone + 'static,
    F: Fn(&S) -> T + Send + Sync + 'static,
    G: Fn(&S) -> D + Send + Sync + 'static,
{
    build(
        source,
        derive_fn,
        Some(Box::new(DependencySnapshot::new(dependency_fn))),
    )
}
