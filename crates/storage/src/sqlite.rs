//! SQLite storage backend.
//!
//! A single `kv_store` table keyed by cache key. `updated_at` is kept for
//! inspection only; TTL bookkeeping lives in the serialized value, which the
//! cache owns.

use async_trait::async_trait;
use beacon_core::{DurableStorage, StorageError};
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::info;

/// A SQLite-backed key-value store.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a database at the given path and run migrations.
    pub async fn new(path: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StorageError::Backend(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to open SQLite: {e}")))?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        info!("SQLite storage initialized at {path}");
        Ok(storage)
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StorageError> {
        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key        TEXT PRIMARY KEY NOT NULL,
                value      TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(format!("kv_store table: {e}")))?;
        Ok(())
    }
}

fn backend_err(op: &str) -> impl FnOnce(sqlx::Error) -> StorageError + '_ {
    move |e| StorageError::Backend(format!("{op} failed: {e}"))
}

#[async_trait]
impl DurableStorage for SqliteStorage {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn initialize(&self) -> Result<(), StorageError> {
        self.run_migrations().await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let row = sqlx::query("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err("get"))?;

        row.map(|r| r.try_get::<String, _>("value"))
            .transpose()
            .map_err(backend_err("get"))
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(backend_err("set"))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM kv_store WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(backend_err("delete"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear(&self) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM kv_store")
            .execute(&self.pool)
            .await
            .map_err(backend_err("clear"))?;
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        let rows = sqlx::query("SELECT key FROM kv_store ORDER BY key")
            .fetch_all(&self.pool)
            .await
            .map_err(backend_err("keys"))?;
        rows.iter()
            .map(|r| r.try_get::<String, _>("key"))
            .collect::<Result<Vec<_>, _>>()
            .map_err(backend_err("keys"))
    }

    async fn size(&self) -> Result<usize, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM kv_store")
            .fetch_one(&self.pool)
            .await
            .map_err(backend_err("size"))?;
        let n: i64 = row.try_get("n").map_err(backend_err("size"))?;
        Ok(n as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_storage(dir: &tempfile::TempDir) -> SqliteStorage {
        let path = format!("sqlite://{}", dir.path().join("kv.db").display());
        SqliteStorage::new(&path).await.unwrap()
    }

    #[tokio::test]
    async fn set_get_and_upsert() {
        let dir = tempfile::tempdir().unwrap();
        let storage = test_storage(&dir).await;

        storage.set("a", "1".into()).await.unwrap();
        storage.set("a", "2".into()).await.unwrap();
        assert_eq!(storage.get("a").await.unwrap().as_deref(), Some("2"));
        assert_eq!(storage.size().await.unwrap(), 1);
        assert!(storage.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let storage = test_storage(&dir).await;

        storage.set("a", "1".into()).await.unwrap();
        storage.set("b", "2".into()).await.unwrap();
        assert_eq!(storage.keys().await.unwrap(), vec!["a", "b"]);

        assert!(storage.delete("a").await.unwrap());
        assert!(!storage.delete("a").await.unwrap());

        storage.clear().await.unwrap();
        assert_eq!(storage.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = test_storage(&dir).await;
            storage.set("persisted", "yes".into()).await.unwrap();
        }
        let storage = test_storage(&dir).await;
        storage.initialize().await.unwrap();
        assert_eq!(storage.get("persisted").await.unwrap().as_deref(), Some("yes"));
    }
}
