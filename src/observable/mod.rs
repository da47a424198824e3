//! Observation primitives shared by stores and derived values.

mod observable;

pub use observable::{Listener, Observable, Subscription};
