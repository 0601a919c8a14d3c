//! Relevance scoring for gathered context.
//!
//! ```text
//! relevance = clamp(base_weight × recency × size_penalty × trigger_boost
//!                   [× over_budget_penalty], 0, 1)
//! ```
//!
//! Scoring is a pure function of the records, the options and the
//! [`PrioritizerConfig`] tables: the same inputs always produce the same
//! ordering and values. The current time is passed in through
//! [`ScoreOptions`] rather than read from a clock.

use crate::token;
use beacon_config::PrioritizerConfig;
use beacon_core::{ContextRecord, TriggerKind};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// A record plus its derived relevance.
///
/// Only the prioritizer (and the manager, for cache hits) can build one, so
/// relevance is never set by hand.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredContext {
    record: ContextRecord,
    relevance: f64,
    source: String,
}

impl ScoredContext {
    pub(crate) fn new(record: ContextRecord, relevance: f64) -> Self {
        let source = record.source_id.clone();
        Self::with_source(record, relevance, source)
    }

    pub(crate) fn with_source(record: ContextRecord, relevance: f64, source: impl Into<String>) -> Self {
        Self {
            record,
            relevance: relevance.clamp(0.0, 1.0),
            source: source.into(),
        }
    }

    pub fn record(&self) -> &ContextRecord {
        &self.record
    }

    pub fn relevance(&self) -> f64 {
        self.relevance
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn estimated_tokens(&self) -> usize {
        token::estimate_record_tokens(&self.record)
    }

    pub fn into_record(self) -> ContextRecord {
        self.record
    }
}

/// Inputs to a scoring pass besides the records themselves.
#[derive(Debug, Clone, Copy)]
pub struct ScoreOptions {
    pub trigger: TriggerKind,
    /// Reference time for recency
    pub now: DateTime<Utc>,
    /// Budget hint; records that alone exceed it are penalized
    pub token_budget: Option<usize>,
}

impl ScoreOptions {
    pub fn new(trigger: TriggerKind, now: DateTime<Utc>) -> Self {
        Self {
            trigger,
            now,
            token_budget: None,
        }
    }

    pub fn with_token_budget(mut self, budget: usize) -> Self {
        self.token_budget = Some(budget);
        self
    }
}

pub struct ContextPrioritizer {
    config: PrioritizerConfig,
}

impl ContextPrioritizer {
    pub fn new(config: PrioritizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PrioritizerConfig {
        &self.config
    }

    /// Score every record and sort by descending relevance. Ties keep input
    /// order.
    pub fn score(&self, records: &[ContextRecord], options: &ScoreOptions) -> Vec<ScoredContext> {
        let mut scored: Vec<ScoredContext> = records
            .iter()
            .map(|r| ScoredContext::new(r.clone(), self.relevance(r, options)))
            .collect();
        // sort_by is stable
        scored.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
        scored
    }

    /// Relevance of a single record in [0, 1].
    pub fn relevance(&self, record: &ContextRecord, options: &ScoreOptions) -> f64 {
        let mut score = self.base_weight(&record.source_id)
            * self.recency(record, options.now)
            * self.size_penalty(record)
            * self.trigger_boost(&record.source_id, options.trigger);

        if let Some(budget) = options.token_budget {
            if token::estimate_record_tokens(record) > budget {
                score *= self.config.over_budget_penalty;
            }
        }

        if score.is_nan() {
            return 0.0;
        }
        score.clamp(0.0, 1.0)
    }

    fn base_weight(&self, source: &str) -> f64 {
        self.config
            .source_weights
            .get(source)
            .copied()
            .unwrap_or(self.config.default_weight)
    }

    fn recency(&self, record: &ContextRecord, now: DateTime<Utc>) -> f64 {
        // Timestamps from the future count as fresh.
        let age = (now - record.captured_at).to_std().unwrap_or_default();
        if age <= self.config.recency_window() {
            self.config.recency_boost
        } else if age > self.config.stale_after() {
            self.config.stale_penalty
        } else {
            1.0
        }
    }

    fn size_penalty(&self, record: &ContextRecord) -> f64 {
        let size = record.payload_bytes();
        let threshold = self.config.size_threshold_bytes;
        if size <= threshold {
            return 1.0;
        }
        (threshold as f64 / size as f64).max(self.config.min_size_factor)
    }

    fn trigger_boost(&self, source: &str, trigger: TriggerKind) -> f64 {
        self.config
            .trigger_boosts
            .get(trigger.as_str())
            .and_then(|boosts| boosts.get(source))
            .copied()
            .unwrap_or(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn prioritizer() -> ContextPrioritizer {
        ContextPrioritizer::new(PrioritizerConfig::default())
    }

    fn record(source: &str, captured_at: DateTime<Utc>) -> ContextRecord {
        ContextRecord::new(source, captured_at, json!({"k": "v"}))
    }

    #[test]
    fn scoring_is_idempotent() {
        let now = Utc::now();
        let records = vec![
            record("dom", now),
            record("form", now - Duration::seconds(30)),
            record("performance", now - Duration::minutes(10)),
            record("custom", now),
        ];
        let options = ScoreOptions::new(TriggerKind::Proactive, now).with_token_budget(100);

        let p = prioritizer();
        assert_eq!(p.score(&records, &options), p.score(&records, &options));
    }

    #[test]
    fn higher_weight_sources_rank_first() {
        let now = Utc::now();
        let records = vec![
            record("performance", now),
            record("dom", now),
            record("form", now),
        ];
        let scored = prioritizer().score(&records, &ScoreOptions::new(TriggerKind::Manual, now));
        let order: Vec<&str> = scored.iter().map(|s| s.source()).collect();
        assert_eq!(order, vec!["form", "dom", "performance"]);
    }

    #[test]
    fn ties_keep_input_order() {
        let now = Utc::now();
        let records = vec![record("x", now), record("y", now), record("z", now)];
        let scored = prioritizer().score(&records, &ScoreOptions::new(TriggerKind::Manual, now));
        let order: Vec<&str> = scored.iter().map(|s| s.source()).collect();
        assert_eq!(order, vec!["x", "y", "z"]);
    }

    #[test]
    fn recency_boosts_fresh_and_penalizes_stale() {
        let now = Utc::now();
        let p = prioritizer();
        let options = ScoreOptions::new(TriggerKind::Manual, now);

        let fresh = p.relevance(&record("dom", now - Duration::seconds(2)), &options);
        let middling = p.relevance(&record("dom", now - Duration::seconds(60)), &options);
        let stale = p.relevance(&record("dom", now - Duration::minutes(10)), &options);

        assert!((fresh - 0.5 * 1.2).abs() < 1e-9);
        assert!((middling - 0.5).abs() < 1e-9);
        assert!((stale - 0.5 * 0.8).abs() < 1e-9);
    }

    #[test]
    fn large_payloads_are_penalized_down_to_the_floor() {
        let now = Utc::now() - Duration::seconds(60);
        let p = prioritizer();
        let options = ScoreOptions::new(TriggerKind::Manual, Utc::now());

        let big = ContextRecord::new("dom", now, json!("x".repeat(4094)));
        // 4096 serialized bytes, twice the threshold
        assert!((p.relevance(&big, &options) - 0.25).abs() < 1e-9);

        let huge = ContextRecord::new("dom", now, json!("x".repeat(100_000)));
        assert!((p.relevance(&huge, &options) - 0.5 * 0.2).abs() < 1e-9);
    }

    #[test]
    fn trigger_boost_applies_per_source() {
        let now = Utc::now() - Duration::seconds(60);
        let p = prioritizer();
        let r = record("navigation", now);

        let manual = p.relevance(&r, &ScoreOptions::new(TriggerKind::Manual, Utc::now()));
        let proactive = p.relevance(&r, &ScoreOptions::new(TriggerKind::Proactive, Utc::now()));
        assert!((proactive - manual * 1.1).abs() < 1e-9);
    }

    #[test]
    fn over_budget_records_are_penalized() {
        let now = Utc::now() - Duration::seconds(60);
        let p = prioritizer();
        let r = ContextRecord::new("dom", now, json!("x".repeat(400)));

        let unbounded = p.relevance(&r, &ScoreOptions::new(TriggerKind::Manual, Utc::now()));
        let bounded = p.relevance(
            &r,
            &ScoreOptions::new(TriggerKind::Manual, Utc::now()).with_token_budget(10),
        );
        assert!((bounded - unbounded * 0.5).abs() < 1e-9);
    }

    #[test]
    fn relevance_is_clamped_to_one() {
        let now = Utc::now();
        let r = record("form", now);
        // 0.9 × 1.2 × 1.3 > 1
        let relevance = prioritizer().relevance(&r, &ScoreOptions::new(TriggerKind::UserAction, now));
        assert_eq!(relevance, 1.0);
    }
}
