//! The context manager: providers → compression → scoring → budget → cache.
//!
//! Providers are called concurrently. Each call races the configured
//! provider timeout; a provider that errors or runs out of time is counted
//! in `error_count` and otherwise ignored, so a gather only fails when the
//! manager itself has been destroyed.

use crate::compressor::ContextCompressor;
use crate::events::ContextEvent;
use crate::prioritizer::{ContextPrioritizer, ScoreOptions, ScoredContext};
use crate::request::{GatherRequest, GatherResult};
use beacon_cache::ContextCache;
use beacon_config::{AppConfig, CompressionConfig, ContextConfig, PrioritizerConfig};
use beacon_core::{
    Clock, ContextProvider, ContextRecord, Error, EventEmitter, ProviderError, Result,
    SubscriptionId, SystemClock,
};
use futures::future::join_all;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Source name of the synthetic context returned on a cache hit.
pub const CACHE_SOURCE: &str = "cache";
/// Source id of the record written to the cache.
pub const COMBINED_SOURCE: &str = "combined";

/// Lifetime statistics, reset by [`ContextManager::destroy`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContextManagerStats {
    pub gathers: u64,
    pub provider_errors: u64,
    pub cache_hits: u64,
    pub average_latency_ms: f64,
    pub providers: usize,
}

#[derive(Debug, Default)]
struct Counters {
    gathers: u64,
    provider_errors: u64,
    cache_hits: u64,
    total_latency_ms: u64,
}

pub struct ContextManager {
    config: ContextConfig,
    providers: RwLock<Vec<Arc<dyn ContextProvider>>>,
    prioritizer: ContextPrioritizer,
    compressor: ContextCompressor,
    cache: Option<Arc<ContextCache<ContextRecord>>>,
    clock: Arc<dyn Clock>,
    events: EventEmitter<ContextEvent>,
    counters: Mutex<Counters>,
    destroyed: AtomicBool,
}

impl ContextManager {
    pub fn new(
        config: ContextConfig,
        prioritizer: PrioritizerConfig,
        compression: &CompressionConfig,
    ) -> Self {
        let events = EventEmitter::new(config.event_capacity);
        Self {
            config,
            providers: RwLock::new(Vec::new()),
            prioritizer: ContextPrioritizer::new(prioritizer),
            compressor: ContextCompressor::new(compression),
            cache: None,
            clock: Arc::new(SystemClock),
            events,
            counters: Mutex::new(Counters::default()),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.context.clone(),
            config.prioritizer.clone(),
            &config.compression,
        )
    }

    pub fn with_cache(mut self, cache: Arc<ContextCache<ContextRecord>>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_compressor(mut self, compressor: ContextCompressor) -> Self {
        self.compressor = compressor;
        self
    }

    // ── Provider registry ──────────────────────────────────────────────────

    /// Register a provider. A provider with the same name is replaced in
    /// place, keeping its position in registration order.
    pub fn register_provider(&self, provider: Arc<dyn ContextProvider>) -> Result<()> {
        self.ensure_alive()?;
        let mut providers = self.providers_mut();
        match providers.iter().position(|p| p.name() == provider.name()) {
            Some(index) => {
                debug!(provider = provider.name(), "Replacing context provider");
                providers[index] = provider;
            }
            None => {
                debug!(provider = provider.name(), "Registered context provider");
                providers.push(provider);
            }
        }
        Ok(())
    }

    pub fn unregister_provider(&self, name: &str) -> bool {
        let mut providers = self.providers_mut();
        let before = providers.len();
        providers.retain(|p| p.name() != name);
        providers.len() < before
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers_snapshot()
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    // ── Gathering ──────────────────────────────────────────────────────────

    pub async fn gather_context(&self, request: &GatherRequest) -> Result<GatherResult> {
        self.ensure_alive()?;
        let started = Instant::now();

        if let Some(result) = self.try_cache(request, started).await {
            return Ok(result);
        }

        let providers: Vec<Arc<dyn ContextProvider>> = self
            .providers_snapshot()
            .into_iter()
            .filter(|p| p.is_enabled() && p.should_include(request.trigger) && request.allows(p.name()))
            .collect();

        let timeout = self.config.provider_timeout();
        // join_all keeps input order, so results line up with registration order.
        let outcomes = join_all(providers.iter().map(|p| gather_one(p.as_ref(), timeout))).await;

        let mut records = Vec::with_capacity(outcomes.len());
        let mut error_count = 0;
        for outcome in outcomes {
            match outcome {
                Ok(record) => records.push(self.compressor.compress(&record)),
                Err(e) => {
                    error_count += 1;
                    warn!(provider = e.provider(), error = %e, "Context provider failed");
                    self.events.emit(ContextEvent::ProviderError {
                        provider: e.provider().to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let mut options = ScoreOptions::new(request.trigger, self.clock.now());
        options.token_budget = request.token_budget;
        let min_relevance = request.min_relevance.unwrap_or(self.config.min_relevance);
        let scored: Vec<ScoredContext> = self
            .prioritizer
            .score(&records, &options)
            .into_iter()
            .filter(|c| c.relevance() >= min_relevance)
            .collect();

        let (contexts, total_tokens_estimate) = apply_budget(scored, request.token_budget);

        if let (Some(key), Some(cache)) = (&request.cache_key, &self.cache) {
            if !contexts.is_empty() {
                let combined = combine(&contexts, self.clock.now());
                if let Err(e) = cache.set(key, combined).await {
                    warn!(key = %key, error = %e, "Failed to cache gathered context");
                }
            }
        }

        let result = GatherResult {
            contexts,
            cached: false,
            elapsed_ms: elapsed_ms(started),
            total_tokens_estimate,
            error_count,
        };
        self.finish(&result);
        Ok(result)
    }

    /// Serve from the cache when a key is set, refresh wasn't forced and the
    /// cached record fits the token budget.
    async fn try_cache(&self, request: &GatherRequest, started: Instant) -> Option<GatherResult> {
        if request.force_refresh {
            return None;
        }
        let (key, cache) = (request.cache_key.as_ref()?, self.cache.as_ref()?);

        let Some(record) = cache.get(key).await else {
            debug!(key = %key, "Context cache miss");
            self.events.emit(ContextEvent::CacheMiss { key: key.clone() });
            return None;
        };

        let context = ScoredContext::with_source(record, 1.0, CACHE_SOURCE);
        let tokens = context.estimated_tokens();
        if let Some(budget) = request.token_budget {
            if tokens > budget {
                debug!(key = %key, tokens, budget, "Cached context exceeds token budget, gathering fresh");
                self.events.emit(ContextEvent::CacheMiss { key: key.clone() });
                return None;
            }
        }

        debug!(key = %key, "Context cache hit");
        self.events.emit(ContextEvent::CacheHit { key: key.clone() });
        self.counters().cache_hits += 1;

        let result = GatherResult {
            total_tokens_estimate: tokens,
            contexts: vec![context],
            cached: true,
            elapsed_ms: elapsed_ms(started),
            error_count: 0,
        };
        self.finish(&result);
        Some(result)
    }

    fn finish(&self, result: &GatherResult) {
        {
            let mut counters = self.counters();
            counters.gathers += 1;
            counters.provider_errors += result.error_count as u64;
            counters.total_latency_ms += result.elapsed_ms;
        }
        debug!(
            contexts = result.contexts.len(),
            cached = result.cached,
            tokens = result.total_tokens_estimate,
            errors = result.error_count,
            elapsed_ms = result.elapsed_ms,
            "Context gathered"
        );
        self.events.emit(ContextEvent::ContextGathered {
            contexts: result.contexts.len(),
            cached: result.cached,
            elapsed_ms: result.elapsed_ms,
            error_count: result.error_count,
        });
    }

    // ── Cache / stats / lifecycle ──────────────────────────────────────────

    /// Drop a cached gather result. Returns whether anything was removed.
    pub async fn invalidate_cache(&self, key: &str) -> Result<bool> {
        self.ensure_alive()?;
        match &self.cache {
            Some(cache) => Ok(cache.invalidate(key).await),
            None => Ok(false),
        }
    }

    pub fn stats(&self) -> ContextManagerStats {
        let counters = self.counters();
        ContextManagerStats {
            gathers: counters.gathers,
            provider_errors: counters.provider_errors,
            cache_hits: counters.cache_hits,
            average_latency_ms: if counters.gathers == 0 {
                0.0
            } else {
                counters.total_latency_ms as f64 / counters.gathers as f64
            },
            providers: self.providers_snapshot().len(),
        }
    }

    pub fn events(&self) -> &EventEmitter<ContextEvent> {
        &self.events
    }

    pub fn on_event<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&ContextEvent) + Send + Sync + 'static,
    {
        self.events.on(listener)
    }

    /// Tear down: drop providers and listeners and reset statistics. Every
    /// later call fails with [`Error::ManagerDestroyed`].
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.providers_mut().clear();
        self.events.clear();
        *self.counters() = Counters::default();
        info!("Context manager destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.is_destroyed() {
            Err(Error::ManagerDestroyed)
        } else {
            Ok(())
        }
    }

    fn providers_snapshot(&self) -> Vec<Arc<dyn ContextProvider>> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn providers_mut(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Arc<dyn ContextProvider>>> {
        self.providers.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn counters(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Run one provider against the timeout. A late result is discarded along
/// with the dropped future.
async fn gather_one(
    provider: &dyn ContextProvider,
    timeout: Duration,
) -> std::result::Result<ContextRecord, ProviderError> {
    match tokio::time::timeout(timeout, provider.gather()).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout {
            provider: provider.name().to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

/// Keep contexts in score order until the next one would exceed the budget.
fn apply_budget(scored: Vec<ScoredContext>, budget: Option<usize>) -> (Vec<ScoredContext>, usize) {
    let mut used = 0;
    let Some(budget) = budget else {
        used = scored.iter().map(ScoredContext::estimated_tokens).sum();
        return (scored, used);
    };

    let mut kept = Vec::with_capacity(scored.len());
    for context in scored {
        let tokens = context.estimated_tokens();
        if used + tokens > budget {
            break;
        }
        used += tokens;
        kept.push(context);
    }
    (kept, used)
}

/// Fold surviving contexts into the single record stored in the cache.
fn combine(contexts: &[ScoredContext], now: chrono::DateTime<chrono::Utc>) -> ContextRecord {
    let payload: Map<String, Value> = contexts
        .iter()
        .map(|c| (c.source().to_string(), c.record().payload.clone()))
        .collect();
    ContextRecord::new(COMBINED_SOURCE, now, Value::Object(payload))
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use beacon_config::CacheConfig;
    use beacon_core::TriggerKind;
    use beacon_storage::InMemoryStorage;
    use serde_json::json;

    struct StaticProvider {
        name: &'static str,
        payload: Value,
        enabled: bool,
        proactive: bool,
    }

    impl StaticProvider {
        fn new(name: &'static str, payload: Value) -> Arc<Self> {
            Arc::new(Self {
                name,
                payload,
                enabled: true,
                proactive: true,
            })
        }
    }

    #[async_trait]
    impl ContextProvider for StaticProvider {
        fn name(&self) -> &str {
            self.name
        }
        fn is_enabled(&self) -> bool {
            self.enabled
        }
        async fn gather(&self) -> std::result::Result<ContextRecord, ProviderError> {
            Ok(ContextRecord::now(self.name, self.payload.clone()))
        }
        fn should_include(&self, trigger: TriggerKind) -> bool {
            self.proactive || trigger != TriggerKind::Proactive
        }
    }

    struct BrokenProvider;

    #[async_trait]
    impl ContextProvider for BrokenProvider {
        fn name(&self) -> &str {
            "broken"
        }
        async fn gather(&self) -> std::result::Result<ContextRecord, ProviderError> {
            Err(ProviderError::Failure {
                provider: "broken".into(),
                reason: "no document".into(),
            })
        }
    }

    fn manager() -> ContextManager {
        ContextManager::from_config(&AppConfig::default())
    }

    async fn cached_manager() -> ContextManager {
        let cache = Arc::new(ContextCache::new(
            CacheConfig::default(),
            Arc::new(InMemoryStorage::new()),
        ));
        cache.initialize().await;
        manager().with_cache(cache)
    }

    fn all(trigger: TriggerKind) -> GatherRequest {
        GatherRequest::new(trigger).with_min_relevance(0.0)
    }

    #[tokio::test]
    async fn registering_same_name_replaces_in_place() {
        let m = manager();
        m.register_provider(StaticProvider::new("form", json!(1))).unwrap();
        m.register_provider(StaticProvider::new("dom", json!(2))).unwrap();
        m.register_provider(StaticProvider::new("form", json!(3))).unwrap();
        assert_eq!(m.provider_names(), vec!["form", "dom"]);

        let result = m.gather_context(&all(TriggerKind::Manual)).await.unwrap();
        let form = result.contexts.iter().find(|c| c.source() == "form").unwrap();
        assert_eq!(form.record().payload, json!(3));

        assert!(m.unregister_provider("form"));
        assert!(!m.unregister_provider("form"));
        assert_eq!(m.provider_names(), vec!["dom"]);
    }

    #[tokio::test]
    async fn skips_disabled_excluded_and_filtered_providers() {
        let m = manager();
        m.register_provider(StaticProvider::new("form", json!({}))).unwrap();
        m.register_provider(Arc::new(StaticProvider {
            name: "dom",
            payload: json!({}),
            enabled: false,
            proactive: true,
        }))
        .unwrap();
        m.register_provider(Arc::new(StaticProvider {
            name: "viewport",
            payload: json!({}),
            enabled: true,
            proactive: false,
        }))
        .unwrap();
        m.register_provider(StaticProvider::new("navigation", json!({}))).unwrap();

        let result = m.gather_context(&all(TriggerKind::Proactive)).await.unwrap();
        let mut sources = result.sources();
        sources.sort();
        assert_eq!(sources, vec!["form", "navigation"]);

        let only_form = all(TriggerKind::Manual).only_providers(["form"]);
        let result = m.gather_context(&only_form).await.unwrap();
        assert_eq!(result.sources(), vec!["form"]);
    }

    #[tokio::test]
    async fn provider_failures_are_counted_not_raised() {
        let m = manager();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        m.on_event(move |e| sink.lock().unwrap().push(e.name()));

        m.register_provider(StaticProvider::new("form", json!({"errors": []}))).unwrap();
        m.register_provider(Arc::new(BrokenProvider)).unwrap();

        let result = m.gather_context(&all(TriggerKind::UserAction)).await.unwrap();
        assert_eq!(result.sources(), vec!["form"]);
        assert_eq!(result.error_count, 1);
        assert!(!result.cached);
        assert_eq!(*seen.lock().unwrap(), vec!["provider-error", "context-gathered"]);
        assert_eq!(m.stats().provider_errors, 1);
    }

    #[tokio::test]
    async fn min_relevance_filters_low_scores() {
        let m = manager();
        m.register_provider(StaticProvider::new("form", json!({}))).unwrap();
        m.register_provider(StaticProvider::new("performance", json!({}))).unwrap();

        // performance: 0.4 × 1.2 = 0.48, below the default 0.5
        let result = m.gather_context(&GatherRequest::new(TriggerKind::Manual)).await.unwrap();
        assert_eq!(result.sources(), vec!["form"]);
    }

    #[tokio::test]
    async fn budget_stops_at_first_context_that_does_not_fit() {
        let m = manager();
        // 14 characters → 4 tokens each
        m.register_provider(StaticProvider::new("form", json!("aaaaaaaaaaaa"))).unwrap();
        m.register_provider(StaticProvider::new("dom", json!("bbbbbbbbbbbb"))).unwrap();
        m.register_provider(StaticProvider::new("navigation", json!("cccccccccccc"))).unwrap();

        let result = m
            .gather_context(&all(TriggerKind::Manual).with_token_budget(9))
            .await
            .unwrap();
        assert_eq!(result.sources(), vec!["form", "navigation"]);
        assert_eq!(result.total_tokens_estimate, 8);

        let empty = m
            .gather_context(&all(TriggerKind::Manual).with_token_budget(0))
            .await
            .unwrap();
        assert!(empty.contexts.is_empty());
        assert_eq!(empty.total_tokens_estimate, 0);
    }

    #[tokio::test]
    async fn cache_round_trip_and_force_refresh() {
        let m = cached_manager().await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        m.on_event(move |e| sink.lock().unwrap().push(e.name()));
        m.register_provider(StaticProvider::new("form", json!({"errors": []}))).unwrap();

        let request = GatherRequest::new(TriggerKind::UserAction).with_cache_key("checkout");
        let first = m.gather_context(&request).await.unwrap();
        assert!(!first.cached);

        let second = m.gather_context(&request).await.unwrap();
        assert!(second.cached);
        assert_eq!(second.sources(), vec![CACHE_SOURCE]);
        assert_eq!(second.contexts[0].relevance(), 1.0);
        assert_eq!(second.contexts[0].record().source_id, COMBINED_SOURCE);
        assert_eq!(
            second.contexts[0].record().payload,
            json!({"form": {"errors": []}})
        );

        let refreshed = m.gather_context(&request.clone().force_refresh()).await.unwrap();
        assert!(!refreshed.cached);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                "cache-miss",
                "context-gathered",
                "cache-hit",
                "context-gathered",
                "context-gathered"
            ]
        );
        assert_eq!(m.stats().cache_hits, 1);
        assert_eq!(m.stats().gathers, 3);

        assert!(m.invalidate_cache("checkout").await.unwrap());
        assert!(!m.gather_context(&request).await.unwrap().cached);
    }

    #[tokio::test]
    async fn empty_results_are_not_cached() {
        let m = cached_manager().await;
        let request = GatherRequest::new(TriggerKind::Manual).with_cache_key("nothing");
        m.gather_context(&request).await.unwrap();
        assert!(!m.gather_context(&request).await.unwrap().cached);
    }

    #[tokio::test]
    async fn destroyed_manager_rejects_calls_and_resets_stats() {
        let m = manager();
        m.register_provider(StaticProvider::new("form", json!({}))).unwrap();
        m.gather_context(&all(TriggerKind::Manual)).await.unwrap();
        assert_eq!(m.stats().gathers, 1);

        m.destroy();
        m.destroy();
        assert!(m.is_destroyed());
        assert_eq!(m.stats(), ContextManagerStats::default());
        assert!(matches!(
            m.gather_context(&all(TriggerKind::Manual)).await,
            Err(Error::ManagerDestroyed)
        ));
        assert!(matches!(
            m.register_provider(StaticProvider::new("dom", json!({}))),
            Err(Error::ManagerDestroyed)
        ));
    }
}
