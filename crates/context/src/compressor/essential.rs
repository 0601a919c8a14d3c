use super::{CompressionStrategy, is_essential_key};
use beacon_config::CompressionConfig;
use beacon_core::ContextRecord;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Keeps only the fields that matter for each source type. Sources without a
/// field list keep the keys matching the essential patterns.
pub struct EssentialOnly {
    fields: HashMap<String, Vec<String>>,
    patterns: Vec<String>,
}

impl EssentialOnly {
    pub fn from_config(config: &CompressionConfig) -> Self {
        Self {
            fields: config.essential_fields.clone(),
            patterns: config.essential_patterns.clone(),
        }
    }
}

impl CompressionStrategy for EssentialOnly {
    fn name(&self) -> &str {
        "essential-only"
    }

    fn apply(&self, record: &ContextRecord) -> ContextRecord {
        let Value::Object(map) = &record.payload else {
            return record.clone();
        };

        let projected: Map<String, Value> = match self.fields.get(&record.source_id) {
            Some(fields) => map
                .iter()
                .filter(|(k, _)| fields.iter().any(|f| f == *k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            None => map
                .iter()
                .filter(|(k, _)| is_essential_key(k, &self.patterns))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };
        record.with_payload(Value::Object(projected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn strategy() -> EssentialOnly {
        EssentialOnly::from_config(&CompressionConfig::default())
    }

    #[test]
    fn projects_known_sources_to_their_fields() {
        let record = ContextRecord::now(
            "performance",
            json!({"vitals": {"lcp": 1200}, "memory": 48, "resources": [1, 2, 3]}),
        );
        let out = strategy().apply(&record);
        assert_eq!(out.payload, json!({"vitals": {"lcp": 1200}, "memory": 48}));
    }

    #[test]
    fn unknown_sources_keep_essential_pattern_keys() {
        let record = ContextRecord::now(
            "widget",
            json!({"lastError": "boom", "currentStep": 3, "palette": ["red"]}),
        );
        let out = strategy().apply(&record);
        assert_eq!(out.payload, json!({"lastError": "boom", "currentStep": 3}));
    }

    #[test]
    fn non_object_payloads_are_untouched() {
        let record = ContextRecord::now("form", json!([1, 2, 3]));
        assert_eq!(strategy().apply(&record), record);
    }
}
