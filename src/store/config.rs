use std::fmt;
use std::sync::Arc;

use crate::persist::PersistConfig;
use crate::store::merge::State;
use crate::store::store::{HookContext, StateHandler};

/// A lifecycle hook.
pub type Hook<S> = Arc<dyn Fn(&HookContext<'_, S>) + Send + Sync>;

pub(crate) struct Hooks<S> {
    pub(crate) on_load: Option<Hook<S>>,
    pub(crate) on_attach: Option<Hook<S>>,
    pub(crate) on_detach: Option<Hook<S>>,
    pub(crate) on_change: Option<Hook<S>>,
    pub(crate) on_subscribe: Option<Hook<S>>,
    pub(crate) on_unsubscribe: Option<Hook<S>>,
}

impl<S> Default for Hooks<S> {
    fn default() -> Self {
        Self {
            on_load: None,
            on_attach: None,
            on_detach: None,
            on_change: None,
            on_subscribe: None,
            on_unsubscribe: None,
        }
    }
}

pub(crate) type DefineActions<S, A> = Box<dyn FnOnce(StateHandler<S>) -> A>;

/// Everything needed to build a [`Store`](crate::Store).
///
/// # Examples
///
/// ```
/// use dharma::{Store, StoreConfig};
///
/// struct Counter {
///     increment: Box<dyn Fn() -> i32 + Send + Sync>,
/// }
///
/// let store = Store::new(StoreConfig::new(0_i32).actions(|state| Counter {
///     increment: Box::new(move || state.update(|n: &i32| n + 1)),
/// }));
///
/// (store.actions().increment)();
/// assert_eq!(store.get(), 1);
/// ```
pub struct StoreConfig<S: State, A = ()> {
    pub(crate) initial_state: S,
    pub(crate) define_actions: DefineActions<S, A>,
    pub(crate) hooks: Hooks<S>,
    pub(crate) persist: Option<PersistConfig<S>>,
}

impl<S: State> StoreConfig<S> {
    pub fn new(initial_state: S) -> Self {
        Self {
            initial_state,
            define_actions: Box::new(|_| ()),
            hooks: Hooks::default(),
            persist: None,
        }
    }
}

impl<S: State, A> StoreConfig<S, A> {
    /// Define the store's actions. `define` runs once, at construction, with
    /// a handle to the store's mutation primitives.
    pub fn actions<B, F>(self, define: F) -> StoreConfig<S, B>
    where
        F: FnOnce(StateHandler<S>) -> B + 'static,
    {
        StoreConfig {
            initial_state: self.initial_state,
            define_actions: Box::new(define),
            hooks: self.hooks,
            persist: self.persist,
        }
    }

    /// Runs once when the store is constructed.
    pub fn on_load<F>(mut self, hook: F) -> Self
    where
        F: Fn(&HookContext<'_, S>) + Send + Sync + 'static,
    {
        self.hooks.on_load = Some(Arc::new(hook));
        self
    }

    /// Runs when the first listener subscribes.
    pub fn on_attach<F>(mut self, hook: F) -> Self
    where
        F: Fn(&HookContext<'_, S>) + Send + Sync + 'static,
    {
        self.hooks.on_attach = Some(Arc::new(hook));
        self
    }

    /// Runs when the last listener unsubscribes.
    pub fn on_detach<F>(mut self, hook: F) -> Self
    where
        F: Fn(&HookContext<'_, S>) + Send + Sync + 'static,
    {
        self.hooks.on_detach = Some(Arc::new(hook));
        self
    }

    /// Runs after every state change, before listeners are notified.
    ///
    /// Mutations made through the context are silent: they merge into the
    /// state the listeners are about to receive without dispatching again.
    pub fn on_change<F>(mut self, hook: F) -> Self
    where
        F: Fn(&HookContext<'_, S>) + Send + Sync + 'static,
    {
        self.hooks.on_change = Some(Arc::new(hook));
        self
    }

    /// Runs on every subscribe call.
    pub fn on_subscribe<F>(mut self, hook: F) -> Self
    where
        F: Fn(&HookContext<'_, S>) + Send + Sync + 'static,
    {
        self.hooks.on_subscribe = Some(Arc::new(hook));
        self
    }

    /// Runs on every unsubscribe.
    pub fn on_unsubscribe<F>(mut self, hook: F) -> Self
    where
        F: Fn(&HookContext<'_, S>) + Send + Sync + 'static,
    {
        self.hooks.on_unsubscribe = Some(Arc::new(hook));
        self
    }

    /// Mirror the state into a storage backend.
    pub fn persist(mut self, config: PersistConfig<S>) -> Self {
        self.persist = Some(config);
        self
    }
}

impl<S: State, A> fmt::Debug for StoreConfig<S, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("persist", &self.persist)
            .finish_non_exhaustive()
    }
}
