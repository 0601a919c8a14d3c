//! Error types for the Beacon domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error type; everything that leaves a
//! component is converted into the top-level [`Error`].

use std::time::Duration;
use thiserror::Error;

/// The top-level error type for all Beacon operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Context provider errors (non-fatal, tallied per gather) ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Durable storage errors ---
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    // --- Lifecycle ---
    #[error("Context manager has been destroyed")]
    ManagerDestroyed,

    // --- Resilience ---
    #[error("Circuit '{circuit}' is open, retry in {}ms", retry_after.as_millis())]
    CircuitOpen { circuit: String, retry_after: Duration },

    #[error("No fallback available for feature '{feature}': {source}")]
    NoFallbackAvailable {
        feature: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Fallback strategy '{strategy}' failed: {reason}")]
    FallbackFailed { strategy: String, reason: String },

    #[error("Unknown feature: {0}")]
    UnknownFeature(String),

    // --- AI backend ---
    #[error("Backend error: {0}")]
    Backend(String),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::CircuitOpen { .. } | Self::Provider(ProviderError::Timeout { .. }) | Self::Backend(_)
        )
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("Provider '{provider}' timed out after {timeout_ms}ms")]
    Timeout { provider: String, timeout_ms: u64 },

    #[error("Provider '{provider}' failed: {reason}")]
    Failure { provider: String, reason: String },
}

impl ProviderError {
    /// Name of the provider this error belongs to.
    pub fn provider(&self) -> &str {
        match self {
            Self::Timeout { provider, .. } | Self::Failure { provider, .. } => provider,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("I/O failure: {0}")]
    Io(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Storage not initialized: {0}")]
    NotInitialized(String),

    #[error("Backend failure: {0}")]
    Backend(String),
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}
