//! Per-call request and result values for [`ContextManager::gather_context`].
//!
//! [`ContextManager::gather_context`]: crate::ContextManager::gather_context

use crate::prioritizer::ScoredContext;
use beacon_core::TriggerKind;
use serde::Serialize;

/// What to gather and how much of it to keep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GatherRequest {
    pub trigger: TriggerKind,
    /// Read from / write to the cache under this key
    pub cache_key: Option<String>,
    /// Upper bound on the summed token estimate of the result
    pub token_budget: Option<usize>,
    /// Falls back to the manager's configured minimum when unset
    pub min_relevance: Option<f64>,
    /// Skip the cache read (the result is still written)
    pub force_refresh: bool,
    /// Only ask these providers
    pub providers: Option<Vec<String>>,
}

impl GatherRequest {
    pub fn new(trigger: TriggerKind) -> Self {
        Self {
            trigger,
            ..Self::default()
        }
    }

    pub fn with_cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    pub fn with_token_budget(mut self, budget: usize) -> Self {
        self.token_budget = Some(budget);
        self
    }

    pub fn with_min_relevance(mut self, min: f64) -> Self {
        self.min_relevance = Some(min);
        self
    }

    pub fn force_refresh(mut self) -> Self {
        self.force_refresh = true;
        self
    }

    pub fn only_providers<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.providers = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub(crate) fn allows(&self, provider: &str) -> bool {
        self.providers
            .as_ref()
            .is_none_or(|names| names.iter().any(|n| n == provider))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatherResult {
    pub contexts: Vec<ScoredContext>,
    pub cached: bool,
    pub elapsed_ms: u64,
    pub total_tokens_estimate: usize,
    /// Providers that failed or timed out
    pub error_count: usize,
}

impl GatherResult {
    pub fn sources(&self) -> Vec<&str> {
        self.contexts.iter().map(|c| c.source()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_every_field() {
        let request = GatherRequest::new(TriggerKind::UserAction)
            .with_cache_key("checkout")
            .with_token_budget(200)
            .with_min_relevance(0.3)
            .force_refresh()
            .only_providers(["form", "dom"]);

        assert_eq!(request.trigger, TriggerKind::UserAction);
        assert_eq!(request.cache_key.as_deref(), Some("checkout"));
        assert_eq!(request.token_budget, Some(200));
        assert_eq!(request.min_relevance, Some(0.3));
        assert!(request.force_refresh);
        assert!(request.allows("form"));
        assert!(!request.allows("performance"));
    }

    #[test]
    fn no_allow_list_allows_everything() {
        assert!(GatherRequest::new(TriggerKind::Manual).allows("anything"));
    }
}
