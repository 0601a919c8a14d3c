//! In-memory storage: useful for testing and ephemeral sessions.

use async_trait::async_trait;
use beacon_core::{DurableStorage, StorageError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A storage backend that keeps values in a HashMap.
/// Nothing survives the process; useful where persistence isn't needed.
pub struct InMemoryStorage {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DurableStorage for InMemoryStorage {
    fn name(&self) -> &str {
        "memory"
    }

    async fn initialize(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.entries.write().await.clear();
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }

    async fn size(&self) -> Result<usize, StorageError> {
        Ok(self.entries.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_and_get() {
        let storage = InMemoryStorage::new();
        storage.set("a", "1".into()).await.unwrap();
        assert_eq!(storage.get("a").await.unwrap().as_deref(), Some("1"));
        assert!(storage.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_replaces_existing() {
        let storage = InMemoryStorage::new();
        storage.set("a", "1".into()).await.unwrap();
        storage.set("a", "2".into()).await.unwrap();
        assert_eq!(storage.get("a").await.unwrap().as_deref(), Some("2"));
        assert_eq!(storage.size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_entry() {
        let storage = InMemoryStorage::new();
        storage.set("a", "1".into()).await.unwrap();
        assert!(storage.delete("a").await.unwrap());
        assert!(!storage.delete("a").await.unwrap());
        assert_eq!(storage.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn clear_all() {
        let storage = InMemoryStorage::new();
        storage.set("a", "1".into()).await.unwrap();
        storage.set("b", "2".into()).await.unwrap();
        let mut keys = storage.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a", "b"]);

        storage.clear().await.unwrap();
        assert_eq!(storage.size().await.unwrap(), 0);
    }
}
