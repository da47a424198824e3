//! Error types for persistence operations.
//!
//! Only infrastructure failures are represented here. Panics raised by
//! caller-supplied closures (actions, hooks, derive and effect functions)
//! are never caught and unwind straight to the caller.

use thiserror::Error;

/// Errors raised by storage backends, serializers and persistence setup.
#[derive(Debug, Error)]
pub enum PersistError {
    /// The storage backend failed to read, write or remove an entry.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// The state could not be turned into its stored text form.
    #[error("serialization error: {0}")]
    Serialize(String),

    /// A stored entry could not be turned back into a state value.
    #[error("deserialization error: {0}")]
    Deserialize(String),

    /// Persistence was requested but no storage backend was configured.
    #[error("no storage provider configured")]
    NoStorage,

    /// An async backend was configured without a tokio runtime to drive it.
    #[error("no async runtime available to drive the storage backend")]
    NoRuntime,
}

/// Result type alias for persistence operations.
pub type Result<T> = std::result::Result<T, PersistError>;

impl PersistError {
    /// Wrap any displayable backend failure.
    pub fn backend(err: impl std::fmt::Display) -> Self {
        PersistError::Backend(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = PersistError::backend("disk full");
        assert_eq!(err.to_string(), "storage backend error: disk full");
    }
}
