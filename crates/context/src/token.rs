//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~4 characters per token, applied to the
//! serialized JSON of a payload. Budgets are enforced against this estimate,
//! so it only needs to be consistent, not exact.

use beacon_core::ContextRecord;
use serde_json::Value;

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 characters. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Estimate tokens for a JSON value as it would be serialized.
pub fn estimate_value_tokens(value: &Value) -> usize {
    estimate_tokens(&value.to_string())
}

/// Estimate tokens for a record's payload.
pub fn estimate_record_tokens(record: &ContextRecord) -> usize {
    estimate_value_tokens(&record.payload)
}
