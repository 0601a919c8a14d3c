//! File-based storage: persistent JSON-lines key-value store.
//!
//! Each line is a JSON object `{"key": ..., "value": ...}`. The whole map is
//! held in memory after `initialize()` and rewritten on every mutation
//! (write to a temp file, then rename), which gives fast reads with durable
//! writes. A mutation only becomes visible once its flush has succeeded.
//!
//! Storage location: `~/.beacon/cache/durable.jsonl`

use async_trait::async_trait;
use beacon_core::{DurableStorage, StorageError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Serialize, Deserialize)]
struct Line {
    key: String,
    value: String,
}

/// A file-backed key-value store using JSONL (one JSON object per line).
pub struct FileStorage {
    path: PathBuf,
    entries: Arc<RwLock<HashMap<String, String>>>,
    initialized: AtomicBool,
}

impl FileStorage {
    /// Create a file-based backend at the given path.
    ///
    /// Nothing is read until [`DurableStorage::initialize`] is called. A
    /// missing file starts empty (the file is created on first write).
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            entries: Arc::new(RwLock::new(HashMap::new())),
            initialized: AtomicBool::new(false),
        }
    }

    /// Default path: `~/.beacon/cache/durable.jsonl`
    pub fn default_path() -> PathBuf {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home)
            .join(".beacon")
            .join("cache")
            .join("durable.jsonl")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_initialized(&self) -> Result<(), StorageError> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StorageError::NotInitialized(self.path.display().to_string()))
        }
    }

    /// Load entries from a JSONL file, skipping corrupted lines.
    async fn load_from_disk(path: &Path) -> Result<HashMap<String, String>, StorageError> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(e.into()),
        };

        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<Line>(line) {
                Ok(entry) => Some((entry.key, entry.value)),
                Err(e) => {
                    warn!(error = %e, "Skipping corrupted storage line");
                    None
                }
            })
            .collect())
    }

    /// Flush all entries to disk as JSONL.
    async fn flush(&self, entries: &HashMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut content = String::new();
        for (key, value) in entries {
            let line = serde_json::to_string(&Line {
                key: key.clone(),
                value: value.clone(),
            })
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
            content.push_str(&line);
            content.push('\n');
        }

        let tmp = self.path.with_extension("jsonl.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl DurableStorage for FileStorage {
    fn name(&self) -> &str {
        "file"
    }

    async fn initialize(&self) -> Result<(), StorageError> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        let loaded = Self::load_from_disk(&self.path).await?;
        debug!(path = %self.path.display(), count = loaded.len(), "File storage loaded");
        *self.entries.write().await = loaded;
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.ensure_initialized()?;
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        self.ensure_initialized()?;
        let mut entries = self.entries.write().await;
        let mut next = entries.clone();
        next.insert(key.to_string(), value);
        self.flush(&next).await?;
        *entries = next;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        self.ensure_initialized()?;
        let mut entries = self.entries.write().await;
        if !entries.contains_key(key) {
            return Ok(false);
        }
        let mut next = entries.clone();
        next.remove(key);
        self.flush(&next).await?;
        *entries = next;
        Ok(true)
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.ensure_initialized()?;
        let mut entries = self.entries.write().await;
        self.flush(&HashMap::new()).await?;
        entries.clear();
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        self.ensure_initialized()?;
        Ok(self.entries.read().await.keys().cloned().collect())
    }

    async fn size(&self) -> Result<usize, StorageError> {
        self.ensure_initialized()?;
        Ok(self.entries.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    async fn open(path: &Path) -> FileStorage {
        let storage = FileStorage::new(path.to_path_buf());
        storage.initialize().await.unwrap();
        storage
    }

    #[tokio::test]
    async fn set_and_get_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("durable.jsonl");

        let storage = open(&path).await;
        storage.set("ctx:form", r#"{"errors":[]}"#.into()).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("ctx:form"));

        // Reload from disk; the entry must still be there
        let reopened = open(&path).await;
        assert_eq!(
            reopened.get("ctx:form").await.unwrap().as_deref(),
            Some(r#"{"errors":[]}"#)
        );
    }

    #[tokio::test]
    async fn delete_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("durable.jsonl");

        let storage = open(&path).await;
        storage.set("a", "1".into()).await.unwrap();
        assert!(storage.delete("a").await.unwrap());

        let reopened = open(&path).await;
        assert!(reopened.get("a").await.unwrap().is_none());
        assert_eq!(reopened.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn clear_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("durable.jsonl");

        let storage = open(&path).await;
        storage.set("a", "1".into()).await.unwrap();
        storage.set("b", "2".into()).await.unwrap();
        storage.clear().await.unwrap();

        let reopened = open(&path).await;
        assert_eq!(reopened.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn handles_missing_file_gracefully() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open(&dir.path().join("nested").join("none.jsonl")).await;
        assert_eq!(storage.size().await.unwrap(), 0);
        assert!(storage.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn handles_corrupted_lines() {
        let mut tmp = NamedTempFile::new().unwrap();
        writeln!(tmp, r#"{{"key":"a","value":"1"}}"#).unwrap();
        writeln!(tmp, "this is not json").unwrap();
        writeln!(tmp, r#"{{"key":"b","value":"2"}}"#).unwrap();

        let storage = open(tmp.path()).await;
        assert_eq!(storage.size().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn failed_write_leaves_entries_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let parent = dir.path().join("cache");
        let storage = open(&parent.join("durable.jsonl")).await;
        storage.set("kept", "1".into()).await.unwrap();

        // A plain file where the directory should be makes every flush fail.
        std::fs::remove_dir_all(&parent).unwrap();
        std::fs::write(&parent, "not a directory").unwrap();

        assert!(storage.set("lost", "2".into()).await.is_err());
        assert!(storage.get("lost").await.unwrap().is_none());

        assert!(storage.delete("kept").await.is_err());
        assert!(storage.clear().await.is_err());
        assert_eq!(storage.get("kept").await.unwrap().as_deref(), Some("1"));
        assert_eq!(storage.size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn use_before_initialize_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("x.jsonl"));
        assert!(matches!(
            storage.get("a").await,
            Err(StorageError::NotInitialized(_))
        ));
    }
}
