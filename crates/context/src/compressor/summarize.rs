use super::{CompressionStrategy, is_essential_key};
use beacon_config::CompressionConfig;
use beacon_core::ContextRecord;
use serde_json::{Map, Value};

/// Marker key added to objects that lost keys.
const TRUNCATED_KEY: &str = "_truncated";

/// Truncates long strings, arrays and objects, leaving a count of what was
/// cut. Values under essential keys are kept verbatim.
pub struct VerboseSummarization {
    max_string_len: usize,
    max_array_items: usize,
    max_object_keys: usize,
    essential_patterns: Vec<String>,
}

impl VerboseSummarization {
    pub fn from_config(config: &CompressionConfig) -> Self {
        Self {
            max_string_len: config.max_string_len,
            max_array_items: config.max_array_items,
            max_object_keys: config.max_object_keys,
            essential_patterns: config.essential_patterns.clone(),
        }
    }

    fn summarize(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => {
                let chars = s.chars().count();
                if chars <= self.max_string_len {
                    return value.clone();
                }
                let kept: String = s.chars().take(self.max_string_len).collect();
                Value::String(format!("{kept}…[+{} chars]", chars - self.max_string_len))
            }
            Value::Array(items) => {
                let mut out: Vec<Value> = items
                    .iter()
                    .take(self.max_array_items)
                    .map(|v| self.summarize(v))
                    .collect();
                if items.len() > self.max_array_items {
                    out.push(Value::String(format!(
                        "[+{} more items]",
                        items.len() - self.max_array_items
                    )));
                }
                Value::Array(out)
            }
            Value::Object(map) => {
                let mut out = Map::new();
                let mut kept = 0;
                let mut dropped = 0;
                for (key, v) in map {
                    if is_essential_key(key, &self.essential_patterns) {
                        out.insert(key.clone(), v.clone());
                    } else if kept < self.max_object_keys {
                        out.insert(key.clone(), self.summarize(v));
                        kept += 1;
                    } else {
                        dropped += 1;
                    }
                }
                if dropped > 0 {
                    out.insert(TRUNCATED_KEY.to_string(), Value::String(format!("+{dropped} keys")));
                }
                Value::Object(out)
            }
            other => other.clone(),
        }
    }
}

impl CompressionStrategy for VerboseSummarization {
    fn name(&self) -> &str {
        "verbose-summarization"
    }

    fn apply(&self, record: &ContextRecord) -> ContextRecord {
        record.with_payload(self.summarize(&record.payload))
    }
}
