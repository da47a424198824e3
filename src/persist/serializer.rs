use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{PersistError, Result};

/// Converts a state to and from its stored text form.
pub trait Serializer<S>: Send + Sync {
    fn stringify(&self, value: &S) -> Result<String>;
    fn parse(&self, raw: &str) -> Result<S>;
}

/// The default serializer, backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl<S: Serialize + DeserializeOwned> Serializer<S> for JsonSerializer {
    fn stringify(&self, value: &S) -> Result<String> {
        serde_json::to_string(value).map_err(|e| PersistError::Serialize(e.to_string()))
    }

    fn parse(&self, raw: &str) -> Result<S> {
        serde_json::from_str(raw).map_err(|e| PersistError::Deserialize(e.to_string()))
    }
}
