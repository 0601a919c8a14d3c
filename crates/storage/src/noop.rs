//! No-op storage: disables the durable cache tier entirely.

use async_trait::async_trait;
use beacon_core::{DurableStorage, StorageError};

/// A storage backend that stores nothing.
pub struct NoopStorage;

#[async_trait]
impl DurableStorage for NoopStorage {
    fn name(&self) -> &str {
        "none"
    }

    async fn initialize(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: String) -> Result<(), StorageError> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<bool, StorageError> {
        Ok(false)
    }

    async fn clear(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(Vec::new())
    }

    async fn size(&self) -> Result<usize, StorageError> {
        Ok(0)
    }
}
