//! # Beacon Resilience
//!
//! Keeps the assistant usable when the AI backend or a data source fails:
//!
//! - [`CircuitBreaker`]: adaptive failure-rate breaker with half-open probing
//!   and a health score
//! - [`DegradationManager`]: per-feature levels cascaded over a dependency
//!   graph, with [`fallback`] strategies and background recovery
//! - [`ProtectedBackend`]: the backend request path wrapped in both

pub mod backend;
pub mod circuit_breaker;
pub mod degradation;
pub mod fallback;

pub use backend::{ProtectedBackend, collect_stream};
pub use circuit_breaker::{CircuitBreaker, CircuitState, CircuitStateChange, HealthMetrics};
pub use degradation::{
    DegradationEvent, DegradationLevel, DegradationManager, FeatureRegistration, FeatureStatus, HealthCheck,
};
pub use fallback::{
    CachedResponse, Chained, Conditional, DegradedService, FallbackStrategy, ManualOverride, RateLimited,
    StaticResponse, TimeoutRace,
};
