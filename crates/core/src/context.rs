//! Context provider trait: the abstraction over situational data sources.
//!
//! A provider supplies one slice of what the user is doing right now: form
//! state, page performance, navigation, application state, and so on. The
//! embedding application owns the providers; the context manager only calls
//! them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ProviderError;

/// One timestamped payload from a single data source.
///
/// Immutable once produced; identity is `source_id` plus `captured_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextRecord {
    /// Name of the provider (and source type) that produced this record
    pub source_id: String,

    /// When the data was captured
    pub captured_at: DateTime<Utc>,

    /// Opaque structured data
    pub payload: serde_json::Value,
}

impl ContextRecord {
    pub fn new(source_id: impl Into<String>, captured_at: DateTime<Utc>, payload: serde_json::Value) -> Self {
        Self {
            source_id: source_id.into(),
            captured_at,
            payload,
        }
    }

    /// Capture a record stamped with the current wall-clock time.
    pub fn now(source_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::new(source_id, Utc::now(), payload)
    }

    /// Size of the serialized payload in bytes.
    pub fn payload_bytes(&self) -> usize {
        serde_json::to_string(&self.payload).map(|s| s.len()).unwrap_or(0)
    }

    /// Return a copy of this record carrying a different payload.
    pub fn with_payload(&self, payload: serde_json::Value) -> Self {
        Self {
            source_id: self.source_id.clone(),
            captured_at: self.captured_at,
            payload,
        }
    }
}

/// What caused a gather.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerKind {
    /// The user just did something (typed, clicked, submitted)
    UserAction,
    /// The assistant decided on its own to look around
    Proactive,
    /// Explicitly requested by the user or the host application
    #[default]
    Manual,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserAction => "user-action",
            Self::Proactive => "proactive",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The core ContextProvider trait.
///
/// The manager only calls `gather()` on providers whose `is_enabled()`
/// returns true and whose `should_include()` accepts the current trigger.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    /// Unique provider name, also used as the source type for scoring
    /// (e.g., "form", "performance", "dom").
    fn name(&self) -> &str;

    /// Disabled providers are skipped entirely.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Capture the current state of this source.
    async fn gather(&self) -> std::result::Result<ContextRecord, ProviderError>;

    /// Whether this provider is relevant for the given trigger.
    fn should_include(&self, _trigger: TriggerKind) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn trigger_kind_uses_kebab_case() {
        let json = serde_json::to_string(&TriggerKind::UserAction).unwrap();
        assert_eq!(json, "\"user-action\"");
        let parsed: TriggerKind = serde_json::from_str("\"proactive\"").unwrap();
        assert_eq!(parsed, TriggerKind::Proactive);
        assert_eq!(TriggerKind::default(), TriggerKind::Manual);
    }

    #[test]
    fn payload_bytes_matches_serialized_length() {
        let record = ContextRecord::now("form", json!({"errors": []}));
        assert_eq!(record.payload_bytes(), r#"{"errors":[]}"#.len());
    }

    #[test]
    fn with_payload_keeps_identity() {
        let record = ContextRecord::now("form", json!({"a": 1}));
        let reduced = record.with_payload(json!({}));
        assert_eq!(reduced.source_id, record.source_id);
        assert_eq!(reduced.captured_at, record.captured_at);
        assert_eq!(reduced.payload, json!({}));
    }
}
