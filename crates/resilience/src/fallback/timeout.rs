use super::{FallbackStrategy, unavailable};
use async_trait::async_trait;
use beacon_core::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const NAME: &str = "timeout-race";

/// Races another strategy against a timer. When the timer wins, the
/// configured default is returned, or an error when there is none.
pub struct TimeoutRace<T: Send + 'static> {
    inner: Arc<dyn FallbackStrategy<T>>,
    timeout: Duration,
    on_timeout: Option<T>,
}

impl<T: Clone + Send + Sync + 'static> TimeoutRace<T> {
    pub fn new(inner: Arc<dyn FallbackStrategy<T>>, timeout: Duration) -> Self {
        Self {
            inner,
            timeout,
            on_timeout: None,
        }
    }

    pub fn with_default(mut self, value: T) -> Self {
        self.on_timeout = Some(value);
        self
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> FallbackStrategy<T> for TimeoutRace<T> {
    fn name(&self) -> &str {
        NAME
    }

    async fn execute(&self) -> Result<T> {
        match tokio::time::timeout(self.timeout, self.inner.execute()).await {
            Ok(result) => result,
            Err(_) => {
                debug!(
                    inner = self.inner.name(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Fallback lost the race"
                );
                self.on_timeout.clone().ok_or_else(|| {
                    unavailable(NAME, format!("{} timed out after {:?}", self.inner.name(), self.timeout))
                })
            }
        }
    }

    fn is_available(&self) -> bool {
        self.on_timeout.is_some() || self.inner.is_available()
    }

    fn quality_score(&self) -> f64 {
        self.inner.quality_score()
    }

    async fn cleanup(&self) {
        self.inner.cleanup().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::{DegradedService, StaticResponse};

    fn slow(delay: Duration) -> Arc<dyn FallbackStrategy<u32>> {
        Arc::new(DegradedService::new(move || async move {
            tokio::time::sleep(delay).await;
            Ok::<u32, beacon_core::Error>(1)
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn fast_inner_wins() {
        let race = TimeoutRace::<u32>::new(Arc::new(StaticResponse::new(5u32)), Duration::from_millis(10));
        assert_eq!(race.execute().await.unwrap(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_inner_yields_the_default() {
        let race = TimeoutRace::new(slow(Duration::from_secs(1)), Duration::from_millis(10)).with_default(0);
        assert_eq!(race.execute().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_inner_without_default_fails() {
        let race = TimeoutRace::new(slow(Duration::from_secs(1)), Duration::from_millis(10));
        assert!(race.execute().await.is_err());
    }
}
