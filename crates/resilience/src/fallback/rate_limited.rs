use super::{FallbackStrategy, unavailable};
use async_trait::async_trait;
use beacon_core::{Clock, Result, SystemClock};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

const NAME: &str = "rate-limited";

/// Lets at most `max_calls` executions of the wrapped strategy through per
/// sliding `period`.
pub struct RateLimited<T: Send + 'static> {
    inner: Arc<dyn FallbackStrategy<T>>,
    max_calls: usize,
    period: Duration,
    clock: Arc<dyn Clock>,
    calls: Mutex<VecDeque<DateTime<Utc>>>,
}

impl<T: Send + 'static> RateLimited<T> {
    pub fn new(inner: Arc<dyn FallbackStrategy<T>>, max_calls: usize, period: Duration) -> Self {
        Self::with_clock(inner, max_calls, period, Arc::new(SystemClock))
    }

    pub fn with_clock(
        inner: Arc<dyn FallbackStrategy<T>>,
        max_calls: usize,
        period: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner,
            max_calls,
            period,
            clock,
            calls: Mutex::new(VecDeque::new()),
        }
    }

    /// Prune calls outside the window and, if there is room, record one.
    fn try_acquire(&self, record: bool) -> bool {
        let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
        while calls
            .front()
            .is_some_and(|at| self.clock.elapsed_since(*at) >= self.period)
        {
            calls.pop_front();
        }
        if calls.len() >= self.max_calls {
            return false;
        }
        if record {
            calls.push_back(self.clock.now());
        }
        true
    }
}

#[async_trait]
impl<T: Send + 'static> FallbackStrategy<T> for RateLimited<T> {
    fn name(&self) -> &str {
        NAME
    }

    async fn execute(&self) -> Result<T> {
        if !self.try_acquire(true) {
            return Err(unavailable(
                NAME,
                format!("more than {} calls in {:?}", self.max_calls, self.period),
            ));
        }
        self.inner.execute().await
    }

    fn is_available(&self) -> bool {
        self.try_acquire(false) && self.inner.is_available()
    }

    fn quality_score(&self) -> f64 {
        self.inner.quality_score()
    }

    async fn cleanup(&self) {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clear();
        self.inner.cleanup().await;
    }
}
