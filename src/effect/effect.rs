use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};

use crate::equality::{DeepEq, DependencySnapshot, DependencyTracker};
use crate::observable::{Observable, Subscription};

trait EffectNode: Send + Sync {
    fn mount(self: Arc<Self>);
    fn unmount(&self);
    fn is_mounted(&self) -> bool;
}

struct EffectInner<S> {
    source: Arc<dyn Observable<S>>,
    effect_fn: Box<dyn Fn(&S) + Send + Sync>,
    dependencies: Mutex<Option<Box<dyn DependencyTracker<S>>>>,
    subscription: Mutex<Option<Subscription>>,
    // Serializes mount and unmount.
    gate: ReentrantMutex<()>,
}

impl<S: 'static> EffectInner<S> {
    fn run(&self, state: &S) {
        // Taken out so the dependency function runs unlocked. A nested run
        // that finds it missing counts as a change.
        let mut dependencies = self.dependencies.lock().take();
        let changed = dependencies
            .as_mut()
            .map_or(true, |dependencies| dependencies.changed(state));
        if let Some(dependencies) = dependencies {
            *self.dependencies.lock() = Some(dependencies);
        }

        if changed {
            (self.effect_fn)(state);
        }
    }
}

impl<S: 'static> EffectNode for EffectInner<S> {
    fn mount(self: Arc<Self>) {
        let _gate = self.gate.lock();
        if self.is_mounted() {
            return;
        }

        let node = Arc::downgrade(&self);
        let subscription = self.source.observe(Arc::new(move |state: &S| {
            if let Some(node) = node.upgrade() {
                node.run(state);
            }
        }));

        let previous = self.subscription.lock().replace(subscription);
        drop(previous);
    }

    fn unmount(&self) {
        let _gate = self.gate.lock();
        let subscription = self.subscription.lock().take();
        drop(subscription);

        if let Some(dependencies) = self.dependencies.lock().as_mut() {
            dependencies.clear();
        }
    }

    fn is_mounted(&self) -> bool {
        self.subscription.lock().is_some()
    }
}

/// A side effect bound to an observable.
///
/// Nothing happens until [`mount`](Effect::mount): the effect then subscribes
/// to its source, runs once with the current state and again on every
/// change (or, with a dependency function, on every change of the selected
/// dependencies). Dropping the effect unmounts it.
///
/// # Examples
///
/// ```
/// use dharma::{create_effect, Store};
/// use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
///
/// let store = Store::from_state(0_i32);
/// let runs = Arc::new(AtomicUsize::new(0));
/// let runs_clone = runs.clone();
///
/// let effect = create_effect(&store, move |_: &i32| {
///     runs_clone.fetch_add(1, Ordering::SeqCst);
/// });
///
/// effect.mount();
/// assert_eq!(runs.load(Ordering::SeqCst), 1);
///
/// store.set(1);
/// assert_eq!(runs.load(Ordering::SeqCst), 2);
///
/// effect.unmount();
/// store.set(2);
/// assert_eq!(runs.load(Ordering::SeqCst), 2);
/// ```
pub struct Effect {
    node: Arc<dyn EffectNode>,
}

impl Effect {
    /// Subscribe and run once. No-op when already mounted.
    pub fn mount(&self) {
        Arc::clone(&self.node).mount();
    }

    /// Unsubscribe. No-op when not mounted. The next `mount` runs the
    /// effect again immediately.
    pub fn unmount(&self) {
        self.node.unmount();
    }

    pub fn is_mounted(&self) -> bool {
        self.node.is_mounted()
    }
}

impl Drop for Effect {
    fn drop(&mut self) {
        self.node.unmount();
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("mounted", &self.node.is_mounted())
            .finish()
    }
}

fn build<S, O, F>(
    source: &O,
    effect_fn: F,
    dependencies: Option<Box<dyn DependencyTracker<S>>>,
) -> Effect
where
    S: 'static,
    O: Observable<S> + Clone + 'static,
    F: Fn(&S) + Send + Sync + 'static,
{
    Effect {
        node: Arc::new(EffectInner {
            source: Arc::new(source.clone()),
            effect_fn: Box::new(effect_fn),
            dependencies: Mutex::new(dependencies),
            subscription: Mutex::new(None),
            gate: ReentrantMutex::new(()),
        }),
    }
}

/// Run `effect_fn` on every change of `source` while mounted.
pub fn create_effect<S, O, F>(source: &O, effect_fn: F) -> Effect
where
    S: 'static,
    O: Observable<S> + Clone + 'static,
    F: Fn(&S) + Send + Sync + 'static,
{
    build(source, effect_fn, None)
}

/// Run `effect_fn` while mounted, whenever `dependency_fn` selects
/// something not deeply equal to its previous selection.
pub fn create_effect_with_deps<S, D, O, F, G>(source: &O, effect_fn: F, dependency_fn: G) -> Effect
where
    S: 'static,
    D: DeepEq + Send + 'static,
    O: Observable<S> + Clone + 'static,
    F: Fn(&S) + Send + Sync + 'static,
    G: Fn(&S) -> D + Send + Sync + 'static,
{
    build(
        source,
        effect_fn,
        Some(Box::new(DependencySnapshot::new(dependency_fn))),
    )
}
