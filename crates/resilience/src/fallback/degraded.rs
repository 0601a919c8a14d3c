use super::{FallbackStrategy, unavailable};
use async_trait::async_trait;
use beacon_core::Result;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

const NAME: &str = "degraded-service";

type Operation<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T>> + Send + Sync>;

/// A cheaper alternative implementation, e.g. a smaller model or a local
/// heuristic. Operators can switch it off with [`DegradedService::set_available`].
pub struct DegradedService<T> {
    op: Operation<T>,
    quality: f64,
    available: AtomicBool,
}

impl<T: Send + 'static> DegradedService<T> {
    pub fn new<F, Fut>(op: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            op: Arc::new(move || op().boxed()),
            quality: 0.6,
            available: AtomicBool::new(true),
        }
    }

    pub fn with_quality(mut self, quality: f64) -> Self {
        self.quality = quality.clamp(0.0, 1.0);
        self
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }
}

#[async_trait]
impl<T: Send + 'static> FallbackStrategy<T> for DegradedService<T> {
    fn name(&self) -> &str {
        NAME
    }

    async fn execute(&self) -> Result<T> {
        if !self.is_available() {
            return Err(unavailable(NAME, "switched off"));
        }
        (self.op)().await
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn quality_score(&self) -> f64 {
        self.quality
    }
}
