//! Configuration loading, validation, and management for Beacon.
//!
//! Loads configuration from `~/.beacon/config.toml` with environment
//! variable overrides. Validates all settings at startup. Also owns the
//! tracing subscriber setup so every embedding application logs the same way.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.beacon/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Context manager settings
    #[serde(default)]
    pub context: ContextConfig,

    /// Relevance scoring tables
    #[serde(default)]
    pub prioritizer: PrioritizerConfig,

    /// Payload reduction pipeline
    #[serde(default)]
    pub compression: CompressionConfig,

    /// Two-tier cache
    #[serde(default)]
    pub cache: CacheConfig,

    /// Circuit breaker around backend calls
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Feature degradation and recovery
    #[serde(default)]
    pub degradation: DegradationConfig,

    /// Durable storage backend
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging output
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_true() -> bool {
    true
}

// ── Context manager ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// How long a single provider may take before it counts as failed
    #[serde(default = "default_provider_timeout_ms")]
    pub provider_timeout_ms: u64,

    /// Default minimum relevance for gathered contexts
    #[serde(default = "default_min_relevance")]
    pub min_relevance: f64,

    /// Broadcast channel capacity for context events
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_provider_timeout_ms() -> u64 {
    3_000
}
fn default_min_relevance() -> f64 {
    0.5
}
fn default_event_capacity() -> usize {
    256
}

impl ContextConfig {
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            provider_timeout_ms: default_provider_timeout_ms(),
            min_relevance: default_min_relevance(),
            event_capacity: default_event_capacity(),
        }
    }
}

// ── Prioritizer ────────────────────────────────────────────────────────────

/// Table-driven relevance scoring. Every knob lives here so scoring can be
/// tuned without touching gathering logic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrioritizerConfig {
    /// Weight for sources missing from the table
    #[serde(default = "default_source_weight")]
    pub default_weight: f64,

    /// Records captured within this window get `recency_boost`
    #[serde(default = "default_recency_window_ms")]
    pub recency_window_ms: u64,

    #[serde(default = "default_recency_boost")]
    pub recency_boost: f64,

    /// Records older than this get `stale_penalty`
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,

    #[serde(default = "default_stale_penalty")]
    pub stale_penalty: f64,

    /// Payloads above this size are penalized proportionally
    #[serde(default = "default_size_threshold_bytes")]
    pub size_threshold_bytes: usize,

    /// Floor for the size penalty multiplier
    #[serde(default = "default_min_size_factor")]
    pub min_size_factor: f64,

    /// Extra multiplier when a single record exceeds the whole token budget
    #[serde(default = "default_over_budget_penalty")]
    pub over_budget_penalty: f64,

    /// Base weight per source type (provider name)
    #[serde(default = "default_source_weights")]
    pub source_weights: HashMap<String, f64>,

    /// Trigger kind → source type → boost multiplier
    #[serde(default = "default_trigger_boosts")]
    pub trigger_boosts: HashMap<String, HashMap<String, f64>>,
}

fn default_source_weights() -> HashMap<String, f64> {
    [
        ("form", 0.9),
        ("user-action", 0.85),
        ("viewport", 0.7),
        ("app-state", 0.65),
        ("navigation", 0.6),
        ("dom", 0.5),
        ("performance", 0.4),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}
fn default_source_weight() -> f64 {
    0.5
}
fn default_recency_window_ms() -> u64 {
    5_000
}
fn default_recency_boost() -> f64 {
    1.2
}
fn default_stale_after_secs() -> u64 {
    300
}
fn default_stale_penalty() -> f64 {
    0.8
}
fn default_size_threshold_bytes() -> usize {
    2_048
}
fn default_min_size_factor() -> f64 {
    0.2
}
fn default_over_budget_penalty() -> f64 {
    0.5
}
fn default_trigger_boosts() -> HashMap<String, HashMap<String, f64>> {
    let table = |pairs: &[(&str, f64)]| {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect::<HashMap<_, _>>()
    };
    HashMap::from([
        (
            "user-action".to_string(),
            table(&[("form", 1.3), ("user-action", 1.2)]),
        ),
        (
            "proactive".to_string(),
            table(&[("performance", 1.2), ("navigation", 1.1)]),
        ),
    ])
}

impl PrioritizerConfig {
    pub fn recency_window(&self) -> Duration {
        Duration::from_millis(self.recency_window_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

impl Default for PrioritizerConfig {
    fn default() -> Self {
        Self {
            source_weights: default_source_weights(),
            default_weight: default_source_weight(),
            recency_window_ms: default_recency_window_ms(),
            recency_boost: default_recency_boost(),
            stale_after_secs: default_stale_after_secs(),
            stale_penalty: default_stale_penalty(),
            size_threshold_bytes: default_size_threshold_bytes(),
            min_size_factor: default_min_size_factor(),
            over_budget_penalty: default_over_budget_penalty(),
            trigger_boosts: default_trigger_boosts(),
        }
    }
}

// ── Compression ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Records at or below this serialized size are left alone
    #[serde(default = "default_target_bytes")]
    pub target_bytes: usize,

    #[serde(default = "default_max_string_len")]
    pub max_string_len: usize,

    #[serde(default = "default_max_array_items")]
    pub max_array_items: usize,

    #[serde(default = "default_max_object_keys")]
    pub max_object_keys: usize,

    /// Keys containing any of these (case-insensitive) are never summarized
    #[serde(default = "default_essential_patterns")]
    pub essential_patterns: Vec<String>,

    /// Source type → fields kept by the essential-only strategy
    #[serde(default = "default_essential_fields")]
    pub essential_fields: HashMap<String, Vec<String>>,
}

fn default_target_bytes() -> usize {
    4_096
}
fn default_max_string_len() -> usize {
    200
}
fn default_max_array_items() -> usize {
    10
}
fn default_max_object_keys() -> usize {
    20
}
fn default_essential_patterns() -> Vec<String> {
    ["error", "validation", "focused", "vitals", "current"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_essential_fields() -> HashMap<String, Vec<String>> {
    let fields = |names: &[&str]| names.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    HashMap::from([
        (
            "form".to_string(),
            fields(&["errors", "focusedField", "isValid", "completionPercentage"]),
        ),
        (
            "performance".to_string(),
            fields(&["vitals", "memory", "longTasks"]),
        ),
        (
            "dom".to_string(),
            fields(&["title", "focusedElement", "url"]),
        ),
        (
            "navigation".to_string(),
            fields(&["currentUrl", "previousUrl", "referrer"]),
        ),
        (
            "viewport".to_string(),
            fields(&["width", "height", "scrollPercentage"]),
        ),
        (
            "app-state".to_string(),
            fields(&["currentRoute", "errors", "user"]),
        ),
    ])
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            target_bytes: default_target_bytes(),
            max_string_len: default_max_string_len(),
            max_array_items: default_max_array_items(),
            max_object_keys: default_max_object_keys(),
            essential_patterns: default_essential_patterns(),
            essential_fields: default_essential_fields(),
        }
    }
}

// ── Cache ──────────────────────────────────────────────────────────────────

/// Which fast-tier entry goes first when the memory budget is exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    #[default]
    Lru,
    Fifo,
    Lfu,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Fast-tier memory budget
    #[serde(default = "default_max_memory_bytes")]
    pub max_memory_bytes: usize,

    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    #[serde(default)]
    pub eviction_policy: EvictionPolicy,

    /// Durable-tier reads needed before an entry is promoted to the fast tier
    #[serde(default = "default_promotion_threshold")]
    pub promotion_threshold: u64,

    /// Fast-tier entries idle longer than this are demoted
    #[serde(default = "default_demotion_idle_secs")]
    pub demotion_idle_secs: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Warm the fast tier from durable storage on initialize
    #[serde(default)]
    pub preload_on_start: bool,

    #[serde(default = "default_preload_count")]
    pub preload_count: usize,

    /// Broadcast channel capacity for invalidation events
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_max_memory_bytes() -> usize {
    5 * 1024 * 1024
}
fn default_ttl_secs() -> u64 {
    300
}
fn default_promotion_threshold() -> u64 {
    3
}
fn default_demotion_idle_secs() -> u64 {
    600
}
fn default_sweep_interval_secs() -> u64 {
    60
}
fn default_preload_count() -> usize {
    20
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn demotion_idle(&self) -> Duration {
        Duration::from_secs(self.demotion_idle_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_memory_bytes: default_max_memory_bytes(),
            default_ttl_secs: default_ttl_secs(),
            eviction_policy: EvictionPolicy::default(),
            promotion_threshold: default_promotion_threshold(),
            demotion_idle_secs: default_demotion_idle_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            preload_on_start: false,
            preload_count: default_preload_count(),
            event_capacity: default_event_capacity(),
        }
    }
}

// ── Circuit breaker ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Initial failure-rate threshold (0.0–1.0); adapts at runtime
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: f64,

    /// Minimum requests in the window before the breaker may trip
    #[serde(default = "default_request_threshold")]
    pub request_threshold: usize,

    /// Sliding window for failure-rate and health decay
    #[serde(default = "default_monitoring_window_ms")]
    pub monitoring_window_ms: u64,

    /// Initial open → half-open delay; adapts at runtime
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,

    /// Probe budget while half-open
    #[serde(default = "default_half_open_max_requests")]
    pub half_open_max_requests: usize,

    /// Fraction of probes that must succeed to close
    #[serde(default = "default_half_open_success_rate")]
    pub half_open_success_rate: f64,

    /// Probe success rate below which the breaker re-opens immediately
    #[serde(default = "default_half_open_failure_floor")]
    pub half_open_failure_floor: f64,

    #[serde(default = "default_true")]
    pub adaptive: bool,

    #[serde(default = "default_min_failure_threshold")]
    pub min_failure_threshold: f64,

    #[serde(default = "default_max_failure_threshold")]
    pub max_failure_threshold: f64,

    #[serde(default = "default_min_reset_timeout_ms")]
    pub min_reset_timeout_ms: u64,

    #[serde(default = "default_max_reset_timeout_ms")]
    pub max_reset_timeout_ms: u64,

    /// Fraction of the gap to 100 the health score recovers per idle window
    #[serde(default = "default_health_decay_rate")]
    pub health_decay_rate: f64,
}

fn default_failure_threshold() -> f64 {
    0.5
}
fn default_request_threshold() -> usize {
    5
}
fn default_monitoring_window_ms() -> u64 {
    60_000
}
fn default_reset_timeout_ms() -> u64 {
    30_000
}
fn default_half_open_max_requests() -> usize {
    3
}
fn default_half_open_success_rate() -> f64 {
    0.6
}
fn default_half_open_failure_floor() -> f64 {
    0.3
}
fn default_min_failure_threshold() -> f64 {
    0.2
}
fn default_max_failure_threshold() -> f64 {
    0.8
}
fn default_min_reset_timeout_ms() -> u64 {
    5_000
}
fn default_max_reset_timeout_ms() -> u64 {
    300_000
}
fn default_health_decay_rate() -> f64 {
    0.1
}

impl CircuitBreakerConfig {
    pub fn monitoring_window(&self) -> Duration {
        Duration::from_millis(self.monitoring_window_ms)
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    pub fn min_reset_timeout(&self) -> Duration {
        Duration::from_millis(self.min_reset_timeout_ms)
    }

    pub fn max_reset_timeout(&self) -> Duration {
        Duration::from_millis(self.max_reset_timeout_ms)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            request_threshold: default_request_threshold(),
            monitoring_window_ms: default_monitoring_window_ms(),
            reset_timeout_ms: default_reset_timeout_ms(),
            half_open_max_requests: default_half_open_max_requests(),
            half_open_success_rate: default_half_open_success_rate(),
            half_open_failure_floor: default_half_open_failure_floor(),
            adaptive: true,
            min_failure_threshold: default_min_failure_threshold(),
            max_failure_threshold: default_max_failure_threshold(),
            min_reset_timeout_ms: default_min_reset_timeout_ms(),
            max_reset_timeout_ms: default_max_reset_timeout_ms(),
            health_decay_rate: default_health_decay_rate(),
        }
    }
}

// ── Degradation ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DegradationConfig {
    /// Mark a feature `partial` when its fallback had to be used
    #[serde(default = "default_true")]
    pub auto_degrade: bool,

    /// Run the background recovery task
    #[serde(default = "default_true")]
    pub auto_recovery: bool,

    #[serde(default = "default_recovery_interval_secs")]
    pub recovery_interval_secs: u64,

    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_recovery_interval_secs() -> u64 {
    30
}

impl DegradationConfig {
    pub fn recovery_interval(&self) -> Duration {
        Duration::from_secs(self.recovery_interval_secs)
    }
}

impl Default for DegradationConfig {
    fn default() -> Self {
        Self {
            auto_degrade: true,
            auto_recovery: true,
            recovery_interval_secs: default_recovery_interval_secs(),
            event_capacity: default_event_capacity(),
        }
    }
}

// ── Storage ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// "memory", "file", "sqlite" or "none"
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// File or database path for persistent backends
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

fn default_storage_backend() -> String {
    "memory".into()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            path: None,
        }
    }
}

// ── Logging ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset (e.g. "info", "beacon_cache=debug")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

const STORAGE_BACKENDS: &[&str] = &["memory", "file", "sqlite", "none"];

impl AppConfig {
    /// Load configuration from the default path (~/.beacon/config.toml).
    ///
    /// Environment variables override the file:
    /// - `BEACON_LOG_LEVEL`
    /// - `BEACON_STORAGE_BACKEND`
    /// - `BEACON_STORAGE_PATH`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// production).
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(level) = lookup("BEACON_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(backend) = lookup("BEACON_STORAGE_BACKEND") {
            self.storage.backend = backend;
        }
        if let Some(path) = lookup("BEACON_STORAGE_PATH") {
            self.storage.path = Some(path);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".beacon")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit = |name: &str, v: f64| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(ConfigError::ValidationError(format!(
                    "{name} must be between 0.0 and 1.0 (got {v})"
                )))
            }
        };

        unit("context.min_relevance", self.context.min_relevance)?;
        if self.context.provider_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "context.provider_timeout_ms must be > 0".into(),
            ));
        }

        let cb = &self.circuit_breaker;
        unit("circuit_breaker.failure_threshold", cb.failure_threshold)?;
        unit("circuit_breaker.half_open_success_rate", cb.half_open_success_rate)?;
        unit("circuit_breaker.half_open_failure_floor", cb.half_open_failure_floor)?;
        unit("circuit_breaker.health_decay_rate", cb.health_decay_rate)?;
        if cb.min_failure_threshold > cb.max_failure_threshold {
            return Err(ConfigError::ValidationError(
                "circuit_breaker.min_failure_threshold must not exceed max_failure_threshold".into(),
            ));
        }
        if cb.min_reset_timeout_ms > cb.max_reset_timeout_ms {
            return Err(ConfigError::ValidationError(
                "circuit_breaker.min_reset_timeout_ms must not exceed max_reset_timeout_ms".into(),
            ));
        }
        if cb.half_open_max_requests == 0 {
            return Err(ConfigError::ValidationError(
                "circuit_breaker.half_open_max_requests must be > 0".into(),
            ));
        }

        if self.cache.max_memory_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "cache.max_memory_bytes must be > 0".into(),
            ));
        }

        if self.prioritizer.source_weights.values().any(|w| *w < 0.0) {
            return Err(ConfigError::ValidationError(
                "prioritizer.source_weights must be non-negative".into(),
            ));
        }

        if !STORAGE_BACKENDS.contains(&self.storage.backend.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "storage.backend must be one of {STORAGE_BACKENDS:?} (got '{}')",
                self.storage.backend
            )));
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `config.level`. Calling this twice is harmless; the
/// second call leaves the first subscriber in place.
pub fn init_tracing(config: &LoggingConfig) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    if let Err(e) = result {
        tracing::debug!(error = %e, "Tracing subscriber already installed");
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for beacon_core::Error {
    fn from(e: ConfigError) -> Self {
        beacon_core::Error::Config {
            message: e.to_string(),
        }
    }
}
