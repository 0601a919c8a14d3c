use serde::Serialize;

/// Notifications emitted by the [`ContextManager`](crate::ContextManager).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ContextEvent {
    ContextGathered {
        contexts: usize,
        cached: bool,
        elapsed_ms: u64,
        error_count: usize,
    },
    CacheHit {
        key: String,
    },
    CacheMiss {
        key: String,
    },
    ProviderError {
        provider: String,
        error: String,
    },
}

impl ContextEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ContextGathered { .. } => "context-gathered",
            Self::CacheHit { .. } => "cache-hit",
            Self::CacheMiss { .. } => "cache-miss",
            Self::ProviderError { .. } => "provider-error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_kebab_case_tag() {
        let event = ContextEvent::CacheHit { key: "page".into() };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "cache-hit");
        assert_eq!(json["type"], event.name());
    }
}
