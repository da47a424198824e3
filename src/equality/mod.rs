//! Structural equality for memoization.
//!
//! Derived values, effects and selections compare dependency snapshots with
//! [`deeply_equals`] to decide whether anything relevant changed.

mod deep_eq;
mod snapshot;

pub use deep_eq::{deeply_equals, DeepEq};
pub(crate) use snapshot::{DependencySnapshot, DependencyTracker};
