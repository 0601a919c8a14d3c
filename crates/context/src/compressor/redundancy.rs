use super::CompressionStrategy;
use beacon_core::ContextRecord;
use serde_json::{Map, Value};

/// Strips nulls, empty strings, empty arrays and empty objects, and collapses
/// runs of identical array items.
pub struct RedundancyRemoval;

impl CompressionStrategy for RedundancyRemoval {
    fn name(&self) -> &str {
        "redundancy-removal"
    }

    fn apply(&self, record: &ContextRecord) -> ContextRecord {
        record.with_payload(prune(&record.payload).unwrap_or(Value::Null))
    }
}

/// `None` means the value carries nothing and should be dropped.
fn prune(value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::Array(items) => {
            let mut out: Vec<Value> = Vec::with_capacity(items.len());
            for item in items.iter().filter_map(prune) {
                if out.last() != Some(&item) {
                    out.push(item);
                }
            }
            (!out.is_empty()).then_some(Value::Array(out))
        }
        Value::Object(map) => {
            let out: Map<String, Value> = map
                .iter()
                .filter_map(|(k, v)| prune(v).map(|v| (k.clone(), v)))
                .collect();
            (!out.is_empty()).then_some(Value::Object(out))
        }
        other => Some(other.clone()),
    }
}
