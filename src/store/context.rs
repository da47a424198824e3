use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::store::merge::State;
use crate::store::store::Store;

static NEXT_CONTEXT_ID: AtomicUsize = AtomicUsize::new(0);

// Thread-local stack of provided stores, tagged with the owning context id.
thread_local! {
    static CONTEXT_STACK: RefCell<Vec<(usize, Box<dyn Any>)>> = const { RefCell::new(Vec::new()) };
}

/// One store shape, many instances.
///
/// A context owns a factory that builds a fresh store per call, plus a
/// thread-local scope in which one instance is "the current one". Rendering
/// bindings provide an instance around a subtree and look it up with
/// [`current`](StoreContext::current).
///
/// # Examples
///
/// ```
/// use dharma::{Store, StoreConfig, StoreContext};
///
/// let counters = StoreContext::new(|start: i32| Store::new(StoreConfig::new(start)));
///
/// let first = counters.create(1);
/// let second = counters.create(10);
///
/// counters.provide(&first, || {
///     assert_eq!(counters.current().map(|store| store.get()), Some(1));
///
///     counters.provide(&second, || {
///         assert_eq!(counters.current().map(|store| store.get()), Some(10));
///     });
/// });
///
/// assert!(counters.current().is_none());
/// ```
pub struct StoreContext<Args, S, A = ()> {
    id: usize,
    factory: Arc<dyn Fn(Args) -> Store<S, A> + Send + Sync>,
}

impl<Args, S, A> StoreContext<Args, S, A>
where
    S: State,
    A: 'static,
{
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(Args) -> Store<S, A> + Send + Sync + 'static,
    {
        Self {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            factory: Arc::new(factory),
        }
    }

    /// Build a new, independent store instance.
    pub fn create(&self, args: Args) -> Store<S, A> {
        (self.factory)(args)
    }

    /// Run `f` with `store` as this context's current instance on this
    /// thread. Scopes nest; the innermost provided store wins.
    pub fn provide<F, R>(&self, store: &Store<S, A>, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().push((self.id, Box::new(store.clone())));
        });

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));

        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });

        match result {
            Ok(r) => r,
            Err(e) => std::panic::resume_unwind(e),
        }
    }

    /// The innermost store provided for this context, if any.
    pub fn current(&self) -> Option<Store<S, A>> {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .iter()
                .rev()
                .find(|(id, _)| *id == self.id)
                .and_then(|(_, store)| store.downcast_ref::<Store<S, A>>())
                .cloned()
        })
    }
}

impl<Args, S, A> Clone for StoreContext<Args, S, A> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            factory: Arc::clone(&self.factory),
        }
    }
}

impl<Args, S, A> fmt::Debug for StoreContext<Args, S, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreContext").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::config::StoreConfig;

    fn counters() -> StoreContext<i32, i32> {
        StoreContext::new(|start: i32| Store::new(StoreConfig::new(start)))
    }

    #[test]
    fn instances_are_independent() {
        let context = counters();
        let a = context.create(0);
        let b = context.create(0);

        a.set(5);
        assert_eq!(a.get(), 5);
        assert_eq!(b.get(), 0);
    }

    #[test]
    fn contexts_do_not_see_each_other() {
        let first = counters();
        let second = counters();
        let store = first.create(3);

        first.provide(&store, || {
            assert!(first.current().is_some());
            assert!(second.current().is_none());
        });
    }

    #[test]
    fn provided_store_is_shared() {
        let context = counters();
        let store = context.create(0);

        context.provide(&store, || {
            if let Some(current) = context.current() {
                current.set(7);
            }
        });

        assert_eq!(store.get(), 7);
    }

    #[test]
    fn scope_is_popped_after_panic() {
        let context = counters();
        let store = context.create(0);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            context.provide(&store, || panic!("boom"));
        }));

        assert!(result.is_err());
        assert!(context.current().is_none());
    }
}
