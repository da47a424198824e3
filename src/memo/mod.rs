//! Lazily computed, memoized values derived from an observable.

mod derive;

pub use derive::{derive, derive_with_deps, Derived};
