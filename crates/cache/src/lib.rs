//! Two-tier context cache for Beacon.
//!
//! Tier 1 is a bounded in-memory map that every write lands in first;
//! tier 2 is a [`beacon_core::DurableStorage`] that every write goes through
//! to. The fast tier is a pure accelerator: anything in it can be rebuilt
//! from the durable tier, so eviction and demotion never lose data while the
//! durable tier is healthy.

pub mod entry;
pub mod eviction;
pub mod manager;

pub use beacon_config::EvictionPolicy;
pub use entry::{CacheEntry, CacheTier};
pub use eviction::select_victim;
pub use manager::{CacheStats, ContextCache, InvalidationEvent, InvalidationReason, SweepReport};
