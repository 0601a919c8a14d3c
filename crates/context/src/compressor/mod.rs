//! Payload reduction pipeline.
//!
//! An ordered list of [`CompressionStrategy`] values is applied left to right
//! while a record is still larger than `target_bytes`. A strategy whose output
//! is not smaller than its input is skipped, so compression never grows a
//! record.

mod essential;
mod redundancy;
mod summarize;

pub use essential::EssentialOnly;
pub use redundancy::RedundancyRemoval;
pub use summarize::VerboseSummarization;

use beacon_config::CompressionConfig;
use beacon_core::ContextRecord;
use serde::Serialize;
use tracing::debug;

/// One reduction step. Implementations are pure.
pub trait CompressionStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, record: &ContextRecord) -> ContextRecord;
}

/// What a compression pass did to one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompressionReport {
    pub source_id: String,
    pub original_bytes: usize,
    pub final_bytes: usize,
    pub strategies_applied: Vec<String>,
}

impl CompressionReport {
    /// final / original, 1.0 for an untouched record
    pub fn ratio(&self) -> f64 {
        if self.original_bytes == 0 {
            1.0
        } else {
            self.final_bytes as f64 / self.original_bytes as f64
        }
    }

    pub fn was_compressed(&self) -> bool {
        !self.strategies_applied.is_empty()
    }
}

pub struct ContextCompressor {
    enabled: bool,
    target_bytes: usize,
    strategies: Vec<Box<dyn CompressionStrategy>>,
}

impl ContextCompressor {
    /// The default pipeline: redundancy removal, verbose summarization, then
    /// essential-only projection as a last resort.
    pub fn new(config: &CompressionConfig) -> Self {
        let strategies: Vec<Box<dyn CompressionStrategy>> = vec![
            Box::new(RedundancyRemoval),
            Box::new(VerboseSummarization::from_config(config)),
            Box::new(EssentialOnly::from_config(config)),
        ];
        Self::with_strategies(config, strategies)
    }

    pub fn with_strategies(
        config: &CompressionConfig,
        strategies: Vec<Box<dyn CompressionStrategy>>,
    ) -> Self {
        Self {
            enabled: config.enabled,
            target_bytes: config.target_bytes,
            strategies,
        }
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn compress(&self, record: &ContextRecord) -> ContextRecord {
        self.compress_with_report(record).0
    }

    pub fn compress_with_report(&self, record: &ContextRecord) -> (ContextRecord, CompressionReport) {
        let original_bytes = record.payload_bytes();
        let mut current = record.clone();
        let mut size = original_bytes;
        let mut applied = Vec::new();

        if self.enabled {
            for strategy in &self.strategies {
                if size <= self.target_bytes {
                    break;
                }
                let candidate = strategy.apply(&current);
                let candidate_size = candidate.payload_bytes();
                if candidate_size < size {
                    current = candidate;
                    size = candidate_size;
                    applied.push(strategy.name().to_string());
                } else {
                    debug!(
                        source = %record.source_id,
                        strategy = strategy.name(),
                        "Compression step did not shrink payload, skipped"
                    );
                }
            }
        }

        let report = CompressionReport {
            source_id: record.source_id.clone(),
            original_bytes,
            final_bytes: size,
            strategies_applied: applied,
        };
        if report.was_compressed() {
            debug!(
                source = %report.source_id,
                original_bytes = report.original_bytes,
                final_bytes = report.final_bytes,
                strategies = ?report.strategies_applied,
                "Compressed context"
            );
        }
        (current, report)
    }
}

/// Case-insensitive substring match against the essential key patterns.
pub(crate) fn is_essential_key(key: &str, patterns: &[String]) -> bool {
    let key = key.to_lowercase();
    patterns.iter().any(|p| key.contains(&p.to_lowercase()))
}
