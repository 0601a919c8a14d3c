use super::{FallbackStrategy, unavailable};
use async_trait::async_trait;
use beacon_core::{Clock, Result, SystemClock};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

const NAME: &str = "cached-response";

/// Serves the last successful primary result while it is younger than
/// `max_age`. Callers feed it with [`CachedResponse::store`].
pub struct CachedResponse<T> {
    max_age: Duration,
    quality: f64,
    clock: Arc<dyn Clock>,
    slot: Mutex<Option<(T, DateTime<Utc>)>>,
}

impl<T: Clone + Send + Sync + 'static> CachedResponse<T> {
    pub fn new(max_age: Duration) -> Self {
        Self::with_clock(max_age, Arc::new(SystemClock))
    }

    pub fn with_clock(max_age: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_age,
            quality: 0.8,
            clock,
            slot: Mutex::new(None),
        }
    }

    pub fn with_quality(mut self, quality: f64) -> Self {
        self.quality = quality.clamp(0.0, 1.0);
        self
    }

    pub fn store(&self, value: T) {
        let now = self.clock.now();
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some((value, now));
    }

    fn fresh(&self) -> Option<T> {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.as_ref()
            .filter(|(_, stored_at)| self.clock.elapsed_since(*stored_at) <= self.max_age)
            .map(|(value, _)| value.clone())
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> FallbackStrategy<T> for CachedResponse<T> {
    fn name(&self) -> &str {
        NAME
    }

    async fn execute(&self) -> Result<T> {
        self.fresh()
            .ok_or_else(|| unavailable(NAME, "no fresh cached response"))
    }

    fn is_available(&self) -> bool {
        self.fresh().is_some()
    }

    fn quality_score(&self) -> f64 {
        self.quality
    }

    async fn cleanup(&self) {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}
