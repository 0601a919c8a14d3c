//! Cache entries and their durable-tier envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which tier an entry was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    Fast,
    Durable,
}

/// A cached value plus its bookkeeping. Owned exclusively by the cache.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
    pub tier: CacheTier,
    /// Estimated footprint (serialized value + key)
    pub size_bytes: usize,
    /// Insertion order within the fast tier, used by FIFO and as a tie-break
    pub(crate) insert_seq: u64,
}

impl<T> CacheEntry<T> {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// What the durable tier stores for each key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredEntry<T> {
    pub value: T,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    #[serde(default)]
    pub access_count: u64,
}

impl<T> StoredEntry<T> {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl<T: Clone> From<&CacheEntry<T>> for StoredEntry<T> {
    fn from(entry: &CacheEntry<T>) -> Self {
        Self {
            value: entry.value.clone(),
            created_at: entry.created_at,
            expires_at: entry.expires_at,
            last_accessed: entry.last_accessed,
            access_count: entry.access_count,
        }
    }
}

impl<T> StoredEntry<T> {
    pub fn into_fast_entry(self, size_bytes: usize, insert_seq: u64) -> CacheEntry<T> {
        CacheEntry {
            value: self.value,
            created_at: self.created_at,
            expires_at: self.expires_at,
            last_accessed: self.last_accessed,
            access_count: self.access_count,
            tier: CacheTier::Fast,
            size_bytes,
            insert_seq,
        }
    }
}
