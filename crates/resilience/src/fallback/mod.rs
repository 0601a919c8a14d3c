//! Fallback strategies.
//!
//! Every strategy implements the same small contract, so features can be
//! given layered fallbacks by composition ([`Chained`], [`Conditional`])
//! instead of branching on variant names.

mod cached;
mod composite;
mod degraded;
mod manual;
mod rate_limited;
mod static_response;
mod timeout;

pub use cached::CachedResponse;
pub use composite::{Chained, Conditional};
pub use degraded::DegradedService;
pub use manual::ManualOverride;
pub use rate_limited::RateLimited;
pub use static_response::StaticResponse;
pub use timeout::TimeoutRace;

use async_trait::async_trait;
use beacon_core::{Error, Result};
use futures::future::BoxFuture;
use std::any::Any;
use std::sync::Arc;

#[async_trait]
pub trait FallbackStrategy<T: Send + 'static>: Send + Sync {
    fn name(&self) -> &str;

    /// Produce a substitute result.
    async fn execute(&self) -> Result<T>;

    /// Whether `execute` is worth calling right now.
    fn is_available(&self) -> bool {
        true
    }

    /// Expected quality of the substitute, 0 (useless) to 1 (as good as the
    /// primary).
    fn quality_score(&self) -> f64;

    /// Release whatever the strategy holds (cached values, history).
    async fn cleanup(&self) {}
}

/// The error a strategy returns when it has nothing to offer.
pub(crate) fn unavailable(strategy: &str, reason: impl Into<String>) -> Error {
    Error::FallbackFailed {
        strategy: strategy.to_string(),
        reason: reason.into(),
    }
}

/// A fallback with its value type erased, so features with different result
/// types can live in one registry.
pub(crate) trait ErasedFallback: Send + Sync {
    fn name(&self) -> &str;
    fn is_available(&self) -> bool;
    fn cleanup(&self) -> BoxFuture<'_, ()>;
    fn as_any(&self) -> &dyn Any;
}

pub(crate) struct Registered<T: Send + 'static> {
    pub strategy: Arc<dyn FallbackStrategy<T>>,
}

impl<T: Send + 'static> ErasedFallback for Registered<T> {
    fn name(&self) -> &str {
        self.strategy.name()
    }

    fn is_available(&self) -> bool {
        self.strategy.is_available()
    }

    fn cleanup(&self) -> BoxFuture<'_, ()> {
        self.strategy.cleanup()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<T: Send + 'static> Registered<T> {
    pub fn erase(strategy: Arc<dyn FallbackStrategy<T>>) -> Arc<dyn ErasedFallback> {
        Arc::new(Self { strategy })
    }
}

/// Recover the typed strategy from an erased one.
pub(crate) fn downcast<T: Send + 'static>(erased: &dyn ErasedFallback) -> Option<Arc<dyn FallbackStrategy<T>>> {
    erased
        .as_any()
        .downcast_ref::<Registered<T>>()
        .map(|r| r.strategy.clone())
}
