//! Side effects bound to an observable, with explicit mount/unmount.

mod effect;

pub use effect::{create_effect, create_effect_with_deps, Effect};
