//! Fast-tier eviction policies.

use crate::entry::CacheEntry;
use beacon_config::EvictionPolicy;

/// Pick the key to evict next under `policy`, or `None` if there is nothing
/// to evict.
///
/// - `Lru`: oldest `last_accessed`
/// - `Fifo`: oldest insertion
/// - `Lfu`: lowest `access_count`, then least recently used
///
/// Remaining ties go to the earliest insertion so the choice is deterministic.
pub fn select_victim<'a, T: 'a>(
    policy: EvictionPolicy,
    entries: impl IntoIterator<Item = (&'a String, &'a CacheEntry<T>)>,
) -> Option<String> {
    let iter = entries.into_iter();
    let victim = match policy {
        EvictionPolicy::Lru => iter.min_by_key(|(_, e)| (e.last_accessed, e.insert_seq)),
        EvictionPolicy::Fifo => iter.min_by_key(|(_, e)| e.insert_seq),
        EvictionPolicy::Lfu => {
            iter.min_by_key(|(_, e)| (e.access_count, e.last_accessed, e.insert_seq))
        }
    };
    victim.map(|(key, _)| key.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::CacheTier;
    use chrono::{DateTime, Duration, Utc};
    use std::collections::HashMap;

    fn entry(seq: u64, accessed: DateTime<Utc>, count: u64) -> CacheEntry<()> {
        CacheEntry {
            value: (),
            created_at: accessed,
            expires_at: accessed + Duration::minutes(5),
            last_accessed: accessed,
            access_count: count,
            tier: CacheTier::Fast,
            size_bytes: 1,
            insert_seq: seq,
        }
    }

    fn sample() -> HashMap<String, CacheEntry<()>> {
        let t0 = Utc::now();
        HashMap::from([
            // inserted first, used recently, used often
            ("a".to_string(), entry(0, t0 + Duration::seconds(30), 9)),
            // inserted second, least recently used, used a few times
            ("b".to_string(), entry(1, t0, 3)),
            // inserted last, used once
            ("c".to_string(), entry(2, t0 + Duration::seconds(10), 1)),
        ])
    }

    #[test]
    fn lru_picks_least_recently_used() {
        assert_eq!(select_victim(EvictionPolicy::Lru, &sample()), Some("b".into()));
    }

    #[test]
    fn fifo_picks_oldest_insertion() {
        assert_eq!(select_victim(EvictionPolicy::Fifo, &sample()), Some("a".into()));
    }

    #[test]
    fn lfu_picks_least_frequently_used() {
        assert_eq!(select_victim(EvictionPolicy::Lfu, &sample()), Some("c".into()));
    }

    #[test]
    fn empty_tier_has_no_victim() {
        let empty: HashMap<String, CacheEntry<()>> = HashMap::new();
        assert_eq!(select_victim(EvictionPolicy::Lru, &empty), None);
    }
}
