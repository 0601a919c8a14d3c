//! Context orchestration for Beacon.
//!
//! The [`ContextManager`] fans out to registered providers, shrinks oversized
//! payloads with the [`ContextCompressor`], ranks them with the
//! [`ContextPrioritizer`], trims the ranked list to a token budget and caches
//! the combined result.

pub mod compressor;
pub mod events;
pub mod manager;
pub mod prioritizer;
pub mod request;
pub mod token;

pub use compressor::{CompressionReport, CompressionStrategy, ContextCompressor};
pub use events::ContextEvent;
pub use manager::{ContextManager, ContextManagerStats};
pub use prioritizer::{ContextPrioritizer, ScoreOptions, ScoredContext};
pub use request::{GatherRequest, GatherResult};
