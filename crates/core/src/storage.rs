//! Durable storage trait: the key-value collaborator behind the durable
//! cache tier.
//!
//! Values are opaque strings; callers (the cache) own serialization.
//! Implementations: in-memory, JSON file, SQLite, none (no-op).

use async_trait::async_trait;

use crate::error::StorageError;

/// The core DurableStorage trait.
///
/// Every method may suspend. Raw I/O failures must be wrapped into
/// [`StorageError`] before they leave an implementation.
#[async_trait]
pub trait DurableStorage: Send + Sync {
    /// The backend name (e.g., "memory", "file", "sqlite", "none").
    fn name(&self) -> &str;

    /// Prepare the backend (open files, run migrations). Idempotent.
    async fn initialize(&self) -> std::result::Result<(), StorageError>;

    /// Read a value.
    async fn get(&self, key: &str) -> std::result::Result<Option<String>, StorageError>;

    /// Write a value, replacing any existing one.
    async fn set(&self, key: &str, value: String) -> std::result::Result<(), StorageError>;

    /// Delete a value. Returns whether it existed.
    async fn delete(&self, key: &str) -> std::result::Result<bool, StorageError>;

    /// Remove every value.
    async fn clear(&self) -> std::result::Result<(), StorageError>;

    /// List all keys.
    async fn keys(&self) -> std::result::Result<Vec<String>, StorageError>;

    /// Number of stored values.
    async fn size(&self) -> std::result::Result<usize, StorageError>;
}
