//! Strategies built from other strategies.

use super::{FallbackStrategy, unavailable};
use async_trait::async_trait;
use beacon_core::Result;
use std::sync::Arc;
use tracing::debug;

/// Tries each available strategy in order and returns the first success.
pub struct Chained<T: Send + 'static> {
    strategies: Vec<Arc<dyn FallbackStrategy<T>>>,
}

impl<T: Send + 'static> Chained<T> {
    pub fn new(strategies: Vec<Arc<dyn FallbackStrategy<T>>>) -> Self {
        Self { strategies }
    }

    pub fn then(mut self, strategy: Arc<dyn FallbackStrategy<T>>) -> Self {
        self.strategies.push(strategy);
        self
    }
}

#[async_trait]
impl<T: Send + 'static> FallbackStrategy<T> for Chained<T> {
    fn name(&self) -> &str {
        "chained"
    }

    async fn execute(&self) -> Result<T> {
        let mut last_error = None;
        for strategy in self.strategies.iter().filter(|s| s.is_available()) {
            match strategy.execute().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    debug!(strategy = strategy.name(), error = %e, "Chained fallback step failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| unavailable("chained", "no strategy available")))
    }

    fn is_available(&self) -> bool {
        self.strategies.iter().any(|s| s.is_available())
    }

    /// The best quality among the strategies that could run now.
    fn quality_score(&self) -> f64 {
        self.strategies
            .iter()
            .filter(|s| s.is_available())
            .map(|s| s.quality_score())
            .fold(0.0, f64::max)
    }

    async fn cleanup(&self) {
        for strategy in &self.strategies {
            strategy.cleanup().await;
        }
    }
}

type Predicate = Arc<dyn Fn() -> bool + Send + Sync>;

/// Picks the first branch whose predicate holds and whose strategy is
/// available, falling back to `otherwise`.
pub struct Conditional<T: Send + 'static> {
    branches: Vec<(Predicate, Arc<dyn FallbackStrategy<T>>)>,
    otherwise: Option<Arc<dyn FallbackStrategy<T>>>,
}

impl<T: Send + 'static> Conditional<T> {
    pub fn new() -> Self {
        Self {
            branches: Vec::new(),
            otherwise: None,
        }
    }

    pub fn when<P>(mut self, predicate: P, strategy: Arc<dyn FallbackStrategy<T>>) -> Self
    where
        P: Fn() -> bool + Send + Sync + 'static,
    {
        self.branches.push((Arc::new(predicate), strategy));
        self
    }

    pub fn otherwise(mut self, strategy: Arc<dyn FallbackStrategy<T>>) -> Self {
        self.otherwise = Some(strategy);
        self
    }

    fn select(&self) -> Option<&Arc<dyn FallbackStrategy<T>>> {
        self.branches
            .iter()
            .find(|(predicate, strategy)| predicate() && strategy.is_available())
            .map(|(_, strategy)| strategy)
            .or_else(|| self.otherwise.as_ref().filter(|s| s.is_available()))
    }
}

impl<T: Send + 'static> Default for Conditional<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Send + 'static> FallbackStrategy<T> for Conditional<T> {
    fn name(&self) -> &str {
        "conditional"
    }

    async fn execute(&self) -> Result<T> {
        match self.select() {
            Some(strategy) => strategy.execute().await,
            None => Err(unavailable("conditional", "no branch matched")),
        }
    }

    fn is_available(&self) -> bool {
        self.select().is_some()
    }

    fn quality_score(&self) -> f64 {
        self.select().map_or(0.0, |s| s.quality_score())
    }

    async fn cleanup(&self) {
        for (_, strategy) in &self.branches {
            strategy.cleanup().await;
        }
        if let Some(strategy) = &self.otherwise {
            strategy.cleanup().await;
        }
    }
}
