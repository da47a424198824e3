use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

type Callback = Arc<dyn Fn() + Send + Sync>;

struct ResyncInner {
    next_id: AtomicU64,
    callbacks: Mutex<Vec<(u64, Callback)>>,
}

/// Host-level "regained focus" signal.
///
/// Persistent stores register a callback on their first listener and remove
/// it on their last, re-reading storage whenever the host calls
/// [`notify`](ResyncTrigger::notify). Use it to pick up values written by
/// another process sharing the same backend.
///
/// # Examples
///
/// ```
/// use dharma::ResyncTrigger;
/// use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
///
/// let focus = ResyncTrigger::new();
/// let hits = Arc::new(AtomicUsize::new(0));
/// let hits_clone = hits.clone();
///
/// let registration = focus.register(move || {
///     hits_clone.fetch_add(1, Ordering::SeqCst);
/// });
/// focus.notify();
/// drop(registration);
/// focus.notify();
///
/// assert_eq!(hits.load(Ordering::SeqCst), 1);
/// ```
#[derive(Clone)]
pub struct ResyncTrigger {
    inner: Arc<ResyncInner>,
}

impl ResyncTrigger {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ResyncInner {
                next_id: AtomicU64::new(0),
                callbacks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register a callback. It stays registered until the returned guard
    /// is dropped.
    pub fn register<F>(&self, callback: F) -> ResyncRegistration
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.callbacks.lock().push((id, Arc::new(callback)));

        ResyncRegistration {
            id,
            trigger: Arc::downgrade(&self.inner),
        }
    }

    /// Run every registered callback.
    pub fn notify(&self) {
        let callbacks: Vec<Callback> = self
            .inner
            .callbacks
            .lock()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        for callback in callbacks {
            callback();
        }
    }

    /// Number of live registrations.
    pub fn registered(&self) -> usize {
        self.inner.callbacks.lock().len()
    }
}

impl Default for ResyncTrigger {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ResyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResyncTrigger")
            .field("registered", &self.registered())
            .finish()
    }
}

/// RAII guard for a resync callback.
pub struct ResyncRegistration {
    id: u64,
    trigger: Weak<ResyncInner>,
}

impl Drop for ResyncRegistration {
    fn drop(&mut self) {
        if let Some(trigger) = self.trigger.upgrade() {
            let removed = {
                let mut callbacks = trigger.callbacks.lock();
                callbacks
                    .iter()
                    .position(|(id, _)| *id == self.id)
                    .map(|index| callbacks.remove(index))
            };
            drop(removed);
        }
    }
}

impl fmt::Debug for ResyncRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResyncRegistration")
            .field("id", &self.id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn registrations_are_removed_on_drop() {
        let trigger = ResyncTrigger::new();
        let first = trigger.register(|| {});
        let second = trigger.register(|| {});
        assert_eq!(trigger.registered(), 2);

        drop(first);
        assert_eq!(trigger.registered(), 1);
        drop(second);
        assert_eq!(trigger.registered(), 0);
    }

    #[test]
    fn callbacks_may_register_during_notify() {
        let trigger = ResyncTrigger::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let slot: Arc<Mutex<Vec<ResyncRegistration>>> = Arc::new(Mutex::new(Vec::new()));

        let trigger_clone = trigger.clone();
        let slot_clone = slot.clone();
        let counter_clone = counter.clone();
        let _registration = trigger.register(move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            slot_clone.lock().push(trigger_clone.register(|| {}));
        });

        trigger.notify();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(trigger.registered(), 2);
    }
}
