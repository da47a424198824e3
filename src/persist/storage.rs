use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::Result;

/// A synchronous string key-value backend.
pub trait Storage: Send + Sync {
    /// Read an entry. Returns `None` if the key does not exist.
    fn get_item(&self, key: &str) -> Result<Option<String>>;

    /// Create or overwrite an entry.
    fn set_item(&self, key: &str, value: &str) -> Result<()>;

    /// Delete an entry. Deleting a missing key is not an error.
    fn remove_item(&self, key: &str) -> Result<()>;
}

/// An asynchronous string key-value backend.
///
/// Operations are driven on a tokio runtime and never block the store.
#[async_trait]
pub trait AsyncStorage: Send + Sync {
    /// Read an entry. Returns `None` if the key does not exist.
    async fn get_item(&self, key: &str) -> Result<Option<String>>;

    /// Create or overwrite an entry.
    async fn set_item(&self, key: &str, value: &str) -> Result<()>;

    /// Delete an entry. Deleting a missing key is not an error.
    async fn remove_item(&self, key: &str) -> Result<()>;
}

/// In-memory storage backend.
///
/// Clones share the same entries, so a test can keep a handle and inspect
/// what a store persisted. Data is lost on process exit.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    data: Arc<RwLock<BTreeMap<String, String>>>,
}

impl MemoryStorage {
    /// Create a new empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of entries.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Check if the storage is empty.
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Check if an entry exists.
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.read().contains_key(key)
    }

    /// Clear all entries.
    pub fn clear(&self) {
        self.data.write().clear();
    }
}

impl Storage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.data.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        self.data.write().remove(key);
        Ok(())
    }
}

/// Asynchronous view over a [`MemoryStorage`].
///
/// Every operation yields to the runtime once before touching the data, so
/// completion order behaves like a real async backend.
#[derive(Debug, Clone, Default)]
pub struct AsyncMemoryStorage {
    inner: MemoryStorage,
}

impl AsyncMemoryStorage {
    /// Create a new empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// The synchronous storage sharing these entries.
    pub fn blocking(&self) -> &MemoryStorage {
        &self.inner
    }
}

impl From<MemoryStorage> for AsyncMemoryStorage {
    fn from(inner: MemoryStorage) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl AsyncStorage for AsyncMemoryStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        tokio::task::yield_now().await;
        self.inner.get_item(key)
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        tokio::task::yield_now().await;
        self.inner.set_item(key, value)
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        tokio::task::yield_now().await;
        self.inner.remove_item(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_storage_basic() {
        let storage = MemoryStorage::new();
        assert!(storage.is_empty());

        storage.set_item("k", "v").unwrap();
        assert_eq!(storage.get_item("k").unwrap().as_deref(), Some("v"));
        assert_eq!(storage.len(), 1);

        storage.remove_item("k").unwrap();
        assert_eq!(storage.get_item("k").unwrap(), None);
        storage.remove_item("missing").unwrap();
    }

    #[test]
    fn clones_share_entries() {
        let storage = MemoryStorage::new();
        let other = storage.clone();
        storage.set_item("shared", "1").unwrap();
        assert!(other.contains_key("shared"));
    }

    #[tokio::test]
    async fn async_memory_storage_basic() {
        let storage = AsyncMemoryStorage::new();
        storage.set_item("k", "v").await.unwrap();
        assert_eq!(storage.get_item("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(storage.blocking().get_item("k").unwrap().as_deref(), Some("v"));

        storage.remove_item("k").await.unwrap();
        assert!(storage.blocking().is_empty());
    }
}
