use super::{FallbackStrategy, unavailable};
use async_trait::async_trait;
use beacon_core::Result;
use std::sync::{Mutex, PoisonError};
use tracing::info;

const NAME: &str = "manual-override";

/// An operator-supplied value. Available only while an override is set.
pub struct ManualOverride<T> {
    value: Mutex<Option<T>>,
}

impl<T: Clone + Send + Sync + 'static> ManualOverride<T> {
    pub fn new() -> Self {
        Self {
            value: Mutex::new(None),
        }
    }

    pub fn set(&self, value: T) {
        info!("Manual override set");
        *self.value.lock().unwrap_or_else(PoisonError::into_inner) = Some(value);
    }

    pub fn clear(&self) {
        if self.value.lock().unwrap_or_else(PoisonError::into_inner).take().is_some() {
            info!("Manual override cleared");
        }
    }

    fn current(&self) -> Option<T> {
        self.value.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl<T: Clone + Send + Sync + 'static> Default for ManualOverride<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> FallbackStrategy<T> for ManualOverride<T> {
    fn name(&self) -> &str {
        NAME
    }

    async fn execute(&self) -> Result<T> {
        self.current().ok_or_else(|| unavailable(NAME, "no override set"))
    }

    fn is_available(&self) -> bool {
        self.current().is_some()
    }

    fn quality_score(&self) -> f64 {
        1.0
    }

    async fn cleanup(&self) {
        self.clear();
    }
}
