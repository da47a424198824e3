use std::fmt;
use std::sync::Arc;

/// A callback invoked with the latest value on every change.
pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// The surface rendering bindings consume: a synchronous snapshot accessor
/// and a way to register a change listener.
///
/// Implemented by [`Store`](crate::Store) and [`Derived`](crate::Derived), so
/// derived values and effects can be layered on either.
pub trait Observable<T>: Send + Sync {
    /// Current value.
    fn get(&self) -> T;

    /// Register `listener`. It is invoked once immediately with the current
    /// value, then on every change until the returned subscription is dropped.
    fn observe(&self, listener: Listener<T>) -> Subscription;
}

/// RAII guard for a registered listener.
///
/// Dropping the guard (or calling [`unsubscribe`](Subscription::unsubscribe))
/// removes the listener.
#[must_use = "dropping a Subscription removes the listener immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub(crate) fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Remove the listener now.
    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}
