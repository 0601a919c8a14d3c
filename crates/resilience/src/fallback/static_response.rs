use super::FallbackStrategy;
use async_trait::async_trait;
use beacon_core::Result;

/// A fixed value, always available. The floor of most fallback chains.
pub struct StaticResponse<T> {
    value: T,
    quality: f64,
}

impl<T: Clone + Send + Sync + 'static> StaticResponse<T> {
    pub fn new(value: T) -> Self {
        Self { value, quality: 0.3 }
    }

    pub fn with_quality(mut self, quality: f64) -> Self {
        self.quality = quality.clamp(0.0, 1.0);
        self
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> FallbackStrategy<T> for StaticResponse<T> {
    fn name(&self) -> &str {
        "static-response"
    }

    async fn execute(&self) -> Result<T> {
        Ok(self.value.clone())
    }

    fn quality_score(&self) -> f64 {
        self.quality
    }
}
