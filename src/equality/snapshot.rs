use super::deep_eq::{deeply_equals, DeepEq};

/// Records the last observed dependency list of a derived value or effect.
pub(crate) trait DependencyTracker<S>: Send {
    /// Select the dependencies of `state` and report whether they differ
    /// from the recorded snapshot. A change (or a first observation) is
    /// recorded; an unchanged selection leaves the snapshot alone.
    fn changed(&mut self, state: &S) -> bool;

    /// Forget the recorded snapshot so the next observation counts as a change.
    fn clear(&mut self);
}

pub(crate) struct DependencySnapshot<S, D> {
    select: Box<dyn Fn(&S) -> D + Send + Sync>,
    last: Option<D>,
}

impl<S, D> DependencySnapshot<S, D> {
    pub(crate) fn new<F>(select: F) -> Self
    where
        F: Fn(&S) -> D + Send + Sync + 'static,
    {
        Self {
            select: Box::new(select),
            last: None,
        }
    }
}

impl<S, D: DeepEq + Send> DependencyTracker<S> for DependencySnapshot<S, D> {
    fn changed(&mut self, state: &S) -> bool {
        let next = (self.select)(state);
        match &self.last {
            Some(prev) if deeply_equals(prev, &next) => false,
            _ => {
                self.last = Some(next);
                true
            }
        }
    }

    fn clear(&mut self) {
        self.last = None;
    }
}
