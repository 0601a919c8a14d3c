//! The two-tier cache.
//!
//! Writes land in the fast tier and go through to durable storage. Reads try
//! the fast tier, then durable storage; durable hits that reach the
//! promotion threshold are copied back into the fast tier. A periodic sweep
//! removes expired entries from both tiers and demotes idle fast-tier
//! entries.
//!
//! Durable storage failures never surface to callers on their own. The first
//! failure flips the cache into fast-tier-only mode; the next sweep probes
//! storage and, once it answers again, writes the fast tier back through.
//! While in that mode, a write the fast tier cannot hold without evicting is
//! refused with a storage error instead of silently losing data.

use crate::entry::{CacheEntry, CacheTier, StoredEntry};
use crate::eviction::select_victim;
use beacon_config::CacheConfig;
use beacon_core::{Clock, DurableStorage, EventEmitter, StorageError, SubscriptionId, SystemClock};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InvalidationReason {
    /// `invalidate` or `invalidate_prefix`
    Manual,
    /// TTL ran out
    Expired,
    /// `clear`
    Cleared,
}

/// Delivered to invalidation listeners. `key` is `None` for a full clear.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidationEvent {
    pub reason: InvalidationReason,
    pub key: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// hits / (hits + misses), 0 when nothing was looked up yet
    pub hit_rate: f64,
    /// Entries in the fast tier
    pub size: usize,
    /// Entries in durable storage, when it is reachable
    pub durable_size: Option<usize>,
    pub memory_bytes: usize,
    pub memory_usage_mb: f64,
    pub evictions: u64,
    pub promotions: u64,
    pub demotions: u64,
    pub expirations: u64,
    /// Running in fast-tier-only mode
    pub storage_degraded: bool,
}

/// Outcome of one maintenance pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub demoted: usize,
    pub durable_restored: bool,
}

#[derive(Debug, Default)]
struct Counters {
    hits: u64,
    misses: u64,
    evictions: u64,
    promotions: u64,
    demotions: u64,
    expirations: u64,
}

struct FastTier<T> {
    entries: HashMap<String, CacheEntry<T>>,
    memory_bytes: usize,
    next_seq: u64,
    counters: Counters,
}

impl<T> FastTier<T> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            memory_bytes: 0,
            next_seq: 0,
            counters: Counters::default(),
        }
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry<T>> {
        let entry = self.entries.remove(key)?;
        self.memory_bytes = self.memory_bytes.saturating_sub(entry.size_bytes);
        Some(entry)
    }

    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }
}

/// Two-tier cache of serializable values keyed by string.
pub struct ContextCache<T> {
    config: CacheConfig,
    storage: Arc<dyn DurableStorage>,
    clock: Arc<dyn Clock>,
    fast: Mutex<FastTier<T>>,
    durable_available: AtomicBool,
    events: EventEmitter<InvalidationEvent>,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl<T> ContextCache<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new(config: CacheConfig, storage: Arc<dyn DurableStorage>) -> Self {
        let events = EventEmitter::new(config.event_capacity);
        Self {
            config,
            storage,
            clock: Arc::new(SystemClock),
            fast: Mutex::new(FastTier::new()),
            durable_available: AtomicBool::new(true),
            events,
            maintenance: Mutex::new(None),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Initialize durable storage and, if configured, warm the fast tier with
    /// the most frequently accessed durable entries. Returns how many entries
    /// were preloaded.
    pub async fn initialize(&self) -> usize {
        if let Err(e) = self.storage.initialize().await {
            self.durable_failed("initialize", &e);
            return 0;
        }
        self.durable_available.store(true, Ordering::Release);
        debug!(backend = self.storage.name(), "Cache durable tier ready");

        if !self.config.preload_on_start || self.config.preload_count == 0 {
            return 0;
        }
        self.preload().await
    }

    async fn preload(&self) -> usize {
        let keys = match self.storage.keys().await {
            Ok(keys) => keys,
            Err(e) => {
                self.durable_failed("keys", &e);
                return 0;
            }
        };

        let now = self.clock.now();
        let mut candidates = Vec::new();
        for key in keys {
            match self.read_durable(&key).await {
                Some(stored) if stored.is_expired(now) => {
                    self.delete_durable(&key).await;
                }
                Some(stored) => candidates.push((key, stored)),
                None => {}
            }
        }

        candidates.sort_by(|(_, a), (_, b)| {
            b.access_count
                .cmp(&a.access_count)
                .then_with(|| b.last_accessed.cmp(&a.last_accessed))
        });
        candidates.truncate(self.config.preload_count);

        let mut loaded = 0;
        {
            let mut tier = self.fast();
            for (key, stored) in candidates {
                let size = entry_size(&key, &stored.value);
                if tier.memory_bytes + size > self.config.max_memory_bytes {
                    continue;
                }
                let seq = tier.next_seq();
                tier.memory_bytes += size;
                tier.entries.insert(key, stored.into_fast_entry(size, seq));
                loaded += 1;
            }
        }
        info!(loaded, "Preloaded cache fast tier");
        loaded
    }

    /// Look up a value. Expired entries count as a miss and are removed from
    /// both tiers.
    pub async fn get(&self, key: &str) -> Option<T> {
        let now = self.clock.now();

        let fast_state = self.fast().entries.get(key).map(|e| e.is_expired(now));
        match fast_state {
            Some(false) => {
                let mut guard = self.fast();
                let tier = &mut *guard;
                if let Some(entry) = tier.entries.get_mut(key) {
                    entry.access_count += 1;
                    entry.last_accessed = now;
                    tier.counters.hits += 1;
                    return Some(entry.value.clone());
                }
            }
            Some(true) => {
                self.expire(key).await;
                self.fast().counters.misses += 1;
                return None;
            }
            None => {}
        }

        let Some(mut stored) = self.read_durable(key).await else {
            self.fast().counters.misses += 1;
            return None;
        };
        if stored.is_expired(now) {
            self.expire(key).await;
            self.fast().counters.misses += 1;
            return None;
        }

        stored.access_count += 1;
        stored.last_accessed = now;
        self.write_durable(key, &stored).await;

        let value = stored.value.clone();
        if stored.access_count >= self.config.promotion_threshold {
            self.promote(key, stored).await;
        }
        self.fast().counters.hits += 1;
        Some(value)
    }

    async fn promote(&self, key: &str, stored: StoredEntry<T>) {
        let size = entry_size(key, &stored.value);
        let evicted = {
            let mut tier = self.fast();
            // A concurrent set may already have put a newer value here.
            if tier.entries.contains_key(key) {
                return;
            }
            let seq = tier.next_seq();
            let evicted = self.insert_fast(&mut tier, key, stored.into_fast_entry(size, seq));
            if tier.entries.contains_key(key) {
                tier.counters.promotions += 1;
            }
            evicted
        };
        debug!(key, "Promoted entry to fast tier");
        self.persist(evicted).await;
    }

    /// Store a value with the default TTL.
    pub async fn set(&self, key: &str, value: T) -> beacon_core::Result<()> {
        self.set_with_ttl(key, value, self.config.default_ttl()).await
    }

    /// Store a value that expires after `ttl`.
    ///
    /// Serialization failures are reported. So is a write that cannot be kept
    /// while the durable tier is down: an entry over the fast-tier budget, or
    /// one that would force an eviction. Other durable-tier failures degrade
    /// the cache instead.
    pub async fn set_with_ttl(&self, key: &str, value: T, ttl: Duration) -> beacon_core::Result<()> {
        let now = self.clock.now();
        let size = serde_json::to_vec(&value)?.len() + key.len();
        let mut entry = CacheEntry {
            value,
            created_at: now,
            expires_at: expiry(now, ttl),
            last_accessed: now,
            access_count: 0,
            tier: CacheTier::Fast,
            size_bytes: size,
            insert_seq: 0,
        };
        let stored = StoredEntry::from(&entry);

        let evicted = {
            let mut tier = self.fast();
            if !self.is_durable_available() {
                self.fits_fast_only(&tier, key, size)?;
            }
            entry.insert_seq = tier.next_seq();
            self.insert_fast(&mut tier, key, entry)
        };

        self.write_durable(key, &stored).await;
        self.persist(evicted).await;
        Ok(())
    }

    /// Whether a live (unexpired) entry exists in either tier.
    pub async fn has(&self, key: &str) -> bool {
        let now = self.clock.now();
        let fast_state = self.fast().entries.get(key).map(|e| e.is_expired(now));
        match fast_state {
            Some(false) => return true,
            Some(true) => {
                self.expire(key).await;
                return false;
            }
            None => {}
        }

        match self.read_durable(key).await {
            Some(stored) if stored.is_expired(now) => {
                self.expire(key).await;
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Remove a key from both tiers and notify listeners. Returns whether
    /// anything was removed.
    pub async fn invalidate(&self, key: &str) -> bool {
        let in_fast = self.fast().remove(key).is_some();
        let in_durable = self.delete_durable(key).await;
        self.events.emit(InvalidationEvent {
            reason: InvalidationReason::Manual,
            key: Some(key.to_string()),
        });
        debug!(key, removed = in_fast || in_durable, "Cache entry invalidated");
        in_fast || in_durable
    }

    /// Remove every key starting with `prefix` from both tiers. Returns the
    /// number of distinct keys removed.
    pub async fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut keys: BTreeSet<String> = {
            let mut tier = self.fast();
            let matching: Vec<String> = tier
                .entries
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect();
            for key in &matching {
                tier.remove(key);
            }
            matching.into_iter().collect()
        };

        if self.is_durable_available() {
            match self.storage.keys().await {
                Ok(durable) => keys.extend(durable.into_iter().filter(|k| k.starts_with(prefix))),
                Err(e) => self.durable_failed("keys", &e),
            }
        }

        for key in &keys {
            self.delete_durable(key).await;
            self.events.emit(InvalidationEvent {
                reason: InvalidationReason::Manual,
                key: Some(key.clone()),
            });
        }
        debug!(prefix, count = keys.len(), "Cache prefix invalidated");
        keys.len()
    }

    /// Drop everything from both tiers.
    pub async fn clear(&self) {
        {
            let mut tier = self.fast();
            tier.entries.clear();
            tier.memory_bytes = 0;
        }
        if self.is_durable_available() {
            if let Err(e) = self.storage.clear().await {
                self.durable_failed("clear", &e);
            }
        }
        self.events.emit(InvalidationEvent {
            reason: InvalidationReason::Cleared,
            key: None,
        });
        info!("Cache cleared");
    }

    /// One maintenance pass: probe a degraded durable tier, drop expired
    /// entries from both tiers and demote idle fast-tier entries.
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        if !self.is_durable_available() {
            report.durable_restored = self.probe_durable().await;
        }

        let now = self.clock.now();
        let idle = self.config.demotion_idle();
        // Demoting without a durable tier would drop the data.
        let can_demote = self.is_durable_available();

        let (expired, demoted) = {
            let mut tier = self.fast();
            let expired: Vec<String> = tier
                .entries
                .iter()
                .filter(|(_, e)| e.is_expired(now))
                .map(|(k, _)| k.clone())
                .collect();
            for key in &expired {
                tier.remove(key);
            }
            tier.counters.expirations += expired.len() as u64;

            let mut demoted = Vec::new();
            if can_demote {
                let idle_keys: Vec<String> = tier
                    .entries
                    .iter()
                    .filter(|(_, e)| (now - e.last_accessed).to_std().unwrap_or_default() >= idle)
                    .map(|(k, _)| k.clone())
                    .collect();
                for key in idle_keys {
                    if let Some(mut entry) = tier.remove(&key) {
                        entry.tier = CacheTier::Durable;
                        demoted.push((key, entry));
                    }
                }
                tier.counters.demotions += demoted.len() as u64;
            }
            (expired, demoted)
        };

        for key in &expired {
            self.delete_durable(key).await;
            self.emit_expired(key);
        }
        report.demoted = demoted.len();
        self.persist(demoted).await;

        report.expired = expired.len() + self.sweep_durable(now).await;
        if report.expired > 0 || report.demoted > 0 {
            debug!(
                expired = report.expired,
                demoted = report.demoted,
                "Cache sweep finished"
            );
        }
        report
    }

    async fn sweep_durable(&self, now: DateTime<Utc>) -> usize {
        if !self.is_durable_available() {
            return 0;
        }
        let keys = match self.storage.keys().await {
            Ok(keys) => keys,
            Err(e) => {
                self.durable_failed("keys", &e);
                return 0;
            }
        };

        let mut expired = 0;
        for key in keys {
            if self.fast().entries.contains_key(&key) {
                continue;
            }
            if let Some(stored) = self.read_durable(&key).await {
                if stored.is_expired(now) {
                    self.delete_durable(&key).await;
                    self.fast().counters.expirations += 1;
                    self.emit_expired(&key);
                    expired += 1;
                }
            }
        }
        expired
    }

    /// Try the durable tier again; on success write the fast tier back
    /// through so both tiers agree.
    async fn probe_durable(&self) -> bool {
        let healthy = match self.storage.initialize().await {
            Ok(()) => self.storage.size().await.is_ok(),
            Err(_) => false,
        };
        if !healthy {
            debug!(backend = self.storage.name(), "Durable tier still unavailable");
            return false;
        }

        self.durable_available.store(true, Ordering::Release);
        let snapshot: Vec<(String, StoredEntry<T>)> = self
            .fast()
            .entries
            .iter()
            .map(|(k, e)| (k.clone(), StoredEntry::from(e)))
            .collect();
        for (key, stored) in &snapshot {
            self.write_durable(key, stored).await;
        }
        info!(
            backend = self.storage.name(),
            resynced = snapshot.len(),
            "Durable tier available again"
        );
        true
    }

    pub async fn stats(&self) -> CacheStats {
        let mut stats = {
            let tier = self.fast();
            let c = &tier.counters;
            let lookups = c.hits + c.misses;
            CacheStats {
                hits: c.hits,
                misses: c.misses,
                hit_rate: if lookups == 0 {
                    0.0
                } else {
                    c.hits as f64 / lookups as f64
                },
                size: tier.entries.len(),
                durable_size: None,
                memory_bytes: tier.memory_bytes,
                memory_usage_mb: tier.memory_bytes as f64 / (1024.0 * 1024.0),
                evictions: c.evictions,
                promotions: c.promotions,
                demotions: c.demotions,
                expirations: c.expirations,
                storage_degraded: !self.is_durable_available(),
            }
        };
        if self.is_durable_available() {
            stats.durable_size = self.storage.size().await.ok();
        }
        stats
    }

    /// Whether `key` currently lives in the fast tier.
    pub fn in_fast_tier(&self, key: &str) -> bool {
        self.fast().entries.contains_key(key)
    }

    pub fn is_durable_available(&self) -> bool {
        self.durable_available.load(Ordering::Acquire)
    }

    /// Register an invalidation listener.
    pub fn on_invalidate<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&InvalidationEvent) + Send + Sync + 'static,
    {
        self.events.on(listener)
    }

    pub fn off_invalidate(&self, id: SubscriptionId) -> bool {
        self.events.off(id)
    }

    pub fn events(&self) -> &EventEmitter<InvalidationEvent> {
        &self.events
    }

    /// Run [`sweep`](Self::sweep) every `sweep_interval` until
    /// [`shutdown`](Self::shutdown) or the cache is dropped.
    pub fn start_maintenance(self: &Arc<Self>) {
        let period = self.config.sweep_interval().max(Duration::from_secs(1));
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else {
                    break;
                };
                cache.sweep().await;
            }
        });

        if let Some(previous) = self.maintenance_slot().replace(handle) {
            previous.abort();
        }
        debug!(interval_secs = period.as_secs(), "Cache maintenance started");
    }

    /// Stop background maintenance. Idempotent.
    pub fn shutdown(&self) {
        if let Some(handle) = self.maintenance_slot().take() {
            handle.abort();
            debug!("Cache maintenance stopped");
        }
    }

    // ── internals ──────────────────────────────────────────────────────────

    fn fast(&self) -> MutexGuard<'_, FastTier<T>> {
        self.fast.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn maintenance_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.maintenance.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// With no durable tier to fall back on, an entry is only accepted if it
    /// fits without evicting anything.
    fn fits_fast_only(&self, tier: &FastTier<T>, key: &str, size: usize) -> Result<(), StorageError> {
        let budget = self.config.max_memory_bytes;
        let replaced = tier.entries.get(key).map_or(0, |e| e.size_bytes);
        let reason = if size > budget {
            format!("entry '{key}' ({size} bytes) exceeds the {budget} byte fast tier")
        } else if tier.memory_bytes.saturating_sub(replaced) + size > budget {
            format!("fast tier is full, storing '{key}' would evict entries")
        } else {
            return Ok(());
        };
        warn!(key, size, budget, "Cache write refused while durable tier is down");
        Err(StorageError::Backend(format!("{reason} and the durable tier is unavailable")))
    }

    /// Put `entry` into the fast tier, evicting until it fits. Entries larger
    /// than the whole budget stay durable-only. Returns the evicted entries.
    fn insert_fast(
        &self,
        tier: &mut FastTier<T>,
        key: &str,
        entry: CacheEntry<T>,
    ) -> Vec<(String, CacheEntry<T>)> {
        tier.remove(key);
        let budget = self.config.max_memory_bytes;
        if entry.size_bytes > budget {
            debug!(key, size = entry.size_bytes, budget, "Entry exceeds fast-tier budget");
            return Vec::new();
        }

        let mut evicted = Vec::new();
        while tier.memory_bytes + entry.size_bytes > budget {
            let Some(victim) = select_victim(self.config.eviction_policy, &tier.entries) else {
                break;
            };
            if let Some(mut removed) = tier.remove(&victim) {
                removed.tier = CacheTier::Durable;
                tier.counters.evictions += 1;
                evicted.push((victim, removed));
            }
        }

        tier.memory_bytes += entry.size_bytes;
        tier.entries.insert(key.to_string(), entry);
        evicted
    }

    /// Write back bookkeeping (access counts) of entries leaving the fast tier.
    async fn persist(&self, entries: Vec<(String, CacheEntry<T>)>) {
        if entries.is_empty() {
            return;
        }
        if !self.is_durable_available() {
            warn!(count = entries.len(), "Fast-tier entries dropped while durable tier is down");
            return;
        }
        for (key, entry) in &entries {
            self.write_durable(key, &StoredEntry::from(entry)).await;
        }
    }

    async fn expire(&self, key: &str) {
        self.fast().remove(key);
        self.delete_durable(key).await;
        self.fast().counters.expirations += 1;
        self.emit_expired(key);
    }

    fn emit_expired(&self, key: &str) {
        self.events.emit(InvalidationEvent {
            reason: InvalidationReason::Expired,
            key: Some(key.to_string()),
        });
    }

    async fn read_durable(&self, key: &str) -> Option<StoredEntry<T>> {
        if !self.is_durable_available() {
            return None;
        }
        let raw = match self.storage.get(key).await {
            Ok(raw) => raw?,
            Err(e) => {
                self.durable_failed("get", &e);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(stored) => Some(stored),
            Err(e) => {
                warn!(key, error = %e, "Dropping unreadable durable cache entry");
                self.delete_durable(key).await;
                None
            }
        }
    }

    async fn write_durable(&self, key: &str, stored: &StoredEntry<T>) {
        if !self.is_durable_available() {
            return;
        }
        let raw = match serde_json::to_string(stored) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key, error = %e, "Failed to serialize cache entry");
                return;
            }
        };
        if let Err(e) = self.storage.set(key, raw).await {
            self.durable_failed("set", &e);
        }
    }

    async fn delete_durable(&self, key: &str) -> bool {
        if !self.is_durable_available() {
            return false;
        }
        match self.storage.delete(key).await {
            Ok(deleted) => deleted,
            Err(e) => {
                self.durable_failed("delete", &e);
                false
            }
        }
    }

    fn durable_failed(&self, op: &str, error: &StorageError) {
        if self.durable_available.swap(false, Ordering::AcqRel) {
            warn!(
                backend = self.storage.name(),
                op,
                error = %error,
                "Durable tier failed, continuing with fast tier only"
            );
        }
    }
}

impl<T> Drop for ContextCache<T> {
    fn drop(&mut self) {
        if let Some(handle) = self
            .maintenance
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn entry_size<T: Serialize>(key: &str, value: &T) -> usize {
    serde_json::to_vec(value).map(|v| v.len()).unwrap_or(0) + key.len()
}
