use std::sync::Arc;

use parking_lot::Mutex;

use crate::equality::{deeply_equals, DeepEq};
use crate::observable::{Observable, Subscription};

/// A projection of an observable, stabilized for render-skip checks.
///
/// [`get_snapshot`](Selection::get_snapshot) hands back the previous
/// snapshot whenever the newly selected value is deeply equal to it, so a
/// binding comparing snapshots by identity only re-renders on real changes.
///
/// # Examples
///
/// ```
/// use dharma::{Selection, Store};
/// use serde_json::{json, Value};
/// use std::sync::Arc;
///
/// let store = Store::from_state(json!({ "todos": ["a"], "filter": "all" }));
/// let todos = Selection::new(&store, |state: &Value| Arc::new(state["todos"].clone()));
///
/// let before = todos.get_snapshot();
/// store.set(json!({ "filter": "done" }));
/// let after = todos.get_snapshot();
///
/// assert!(Arc::ptr_eq(&before, &after));
/// ```
pub struct Selection<S, T> {
    source: Arc<dyn Observable<S>>,
    select: Box<dyn Fn(&S) -> T + Send + Sync>,
    snapshot: Mutex<Option<T>>,
}

impl<S, T> Selection<S, T>
where
    S: 'static,
    T: DeepEq + Clone,
{
    pub fn new<O, F>(source: &O, select: F) -> Self
    where
        O: Observable<S> + Clone + 'static,
        F: Fn(&S) -> T + Send + Sync + 'static,
    {
        Self {
            source: Arc::new(source.clone()),
            select: Box::new(select),
            snapshot: Mutex::new(None),
        }
    }

    /// The selected value, or the previous snapshot if nothing changed.
    pub fn get_snapshot(&self) -> T {
        let next = (self.select)(&self.source.get());
        let mut snapshot = self.snapshot.lock();

        match snapshot.as_ref() {
            Some(previous) if deeply_equals(previous, &next) => previous.clone(),
            _ => {
                *snapshot = Some(next.clone());
                next
            }
        }
    }

    /// Call `on_change` on every change of the source, and once immediately.
    pub fn subscribe<F>(&self, on_change: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.source.observe(Arc::new(move |_: &S| on_change()))
    }
}
