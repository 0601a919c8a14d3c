//! Durable storage implementations for Beacon.
//!
//! Each backend implements [`beacon_core::DurableStorage`] and is selected by
//! `storage.backend` in the configuration.

pub mod file_backend;
pub mod in_memory;
pub mod noop;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use file_backend::FileStorage;
pub use in_memory::InMemoryStorage;
pub use noop::NoopStorage;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;

use beacon_config::StorageConfig;
use beacon_core::{DurableStorage, StorageError};
use std::path::PathBuf;
use std::sync::Arc;

/// Build the storage backend named in the configuration.
///
/// The backend is returned uninitialized; the cache calls
/// [`DurableStorage::initialize`] itself.
pub async fn from_config(config: &StorageConfig) -> Result<Arc<dyn DurableStorage>, StorageError> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(InMemoryStorage::new())),
        "none" => Ok(Arc::new(NoopStorage)),
        "file" => {
            let path = config
                .path
                .as_ref()
                .map(PathBuf::from)
                .unwrap_or_else(FileStorage::default_path);
            Ok(Arc::new(FileStorage::new(path)))
        }
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            let path = config.path.as_deref().unwrap_or("sqlite://beacon-cache.db");
            Ok(Arc::new(SqliteStorage::new(path).await?))
        }
        other => Err(StorageError::Backend(format!(
            "Unsupported storage backend: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builds_configured_backend() {
        let memory = from_config(&StorageConfig::default()).await.unwrap();
        assert_eq!(memory.name(), "memory");

        let none = from_config(&StorageConfig {
            backend: "none".into(),
            path: None,
        })
        .await
        .unwrap();
        assert_eq!(none.name(), "none");
    }

    #[tokio::test]
    async fn file_backend_uses_configured_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.jsonl");
        let storage = from_config(&StorageConfig {
            backend: "file".into(),
            path: Some(path.display().to_string()),
        })
        .await
        .unwrap();
        storage.initialize().await.unwrap();
        storage.set("k", "v".into()).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn unknown_backend_is_an_error() {
        let result = from_config(&StorageConfig {
            backend: "redis".into(),
            path: None,
        })
        .await;
        assert!(matches!(result, Err(StorageError::Backend(_))));
    }
}
