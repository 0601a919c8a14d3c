//! Feature-level degradation across a dependency graph.
//!
//! Each registered feature carries a [`DegradationLevel`]. Degrading a
//! feature raises every transitive dependent to at least the same level;
//! recovering one is only allowed once all of its own dependencies are
//! [`DegradationLevel::Full`], and then ripples back out to its dependents.

use crate::fallback::{ErasedFallback, FallbackStrategy, Registered, downcast};
use beacon_config::DegradationConfig;
use beacon_core::{Clock, Error, EventEmitter, Result, SubscriptionId, SystemClock};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Capability tier of a feature, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DegradationLevel {
    Full,
    Partial,
    Minimal,
    Unavailable,
}

impl DegradationLevel {
    /// Contribution to the global health score.
    pub fn score(self) -> f64 {
        match self {
            Self::Full => 1.0,
            Self::Partial => 0.7,
            Self::Minimal => 0.3,
            Self::Unavailable => 0.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Partial => "partial",
            Self::Minimal => "minimal",
            Self::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for DegradationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureStatus {
    pub name: String,
    pub level: DegradationLevel,
    pub dependencies: Vec<String>,
    /// The last result for this feature came from its fallback
    pub fallback_active: bool,
    pub reason: Option<String>,
    pub changed_at: DateTime<Utc>,
    pub priority: f64,
    pub auto_recover: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum DegradationEvent {
    Degraded {
        feature: String,
        from: DegradationLevel,
        to: DegradationLevel,
        reason: String,
        /// Set when the change was propagated from another feature
        cascaded_from: Option<String>,
    },
    Recovered {
        feature: String,
        from: DegradationLevel,
        cascaded_from: Option<String>,
    },
}

impl DegradationEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Degraded { .. } => "degraded",
            Self::Recovered { .. } => "recovered",
        }
    }

    pub fn feature(&self) -> &str {
        match self {
            Self::Degraded { feature, .. } | Self::Recovered { feature, .. } => feature,
        }
    }
}

/// Async probe deciding whether an auto-recovering feature is healthy again.
pub type HealthCheck = Arc<dyn Fn() -> BoxFuture<'static, bool> + Send + Sync>;

/// Everything needed to register a feature.
pub struct FeatureRegistration {
    name: String,
    dependencies: Vec<String>,
    priority: f64,
    auto_recover: bool,
    fallback: Option<Arc<dyn ErasedFallback>>,
    health_check: Option<HealthCheck>,
}

impl FeatureRegistration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            priority: 1.0,
            auto_recover: true,
            fallback: None,
            health_check: None,
        }
    }

    pub fn depends_on<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(dependencies.into_iter().map(Into::into));
        self
    }

    /// Weight in the global health score. Negative values count as zero.
    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = priority.max(0.0);
        self
    }

    pub fn auto_recover(mut self, enabled: bool) -> Self {
        self.auto_recover = enabled;
        self
    }

    /// The strategy used when the primary operation fails. Its value type must
    /// match the `T` later passed to
    /// [`DegradationManager::execute_with_fallback`].
    pub fn with_fallback<T: Send + 'static>(mut self, strategy: Arc<dyn FallbackStrategy<T>>) -> Self {
        self.fallback = Some(Registered::erase(strategy));
        self
    }

    pub fn with_health_check<F, Fut>(mut self, check: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.health_check = Some(Arc::new(move || check().boxed()));
        self
    }
}

struct Feature {
    status: FeatureStatus,
    fallback: Option<Arc<dyn ErasedFallback>>,
    health_check: Option<HealthCheck>,
}

pub struct DegradationManager {
    config: DegradationConfig,
    clock: Arc<dyn Clock>,
    /// Registration order
    features: Mutex<Vec<Feature>>,
    events: EventEmitter<DegradationEvent>,
    recovery: Mutex<Option<JoinHandle<()>>>,
}

impl DegradationManager {
    pub fn new(config: DegradationConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: DegradationConfig, clock: Arc<dyn Clock>) -> Self {
        let events = EventEmitter::new(config.event_capacity);
        Self {
            config,
            clock,
            features: Mutex::new(Vec::new()),
            events,
            recovery: Mutex::new(None),
        }
    }

    /// Register a feature, replacing any feature of the same name. A feature
    /// whose dependencies are already degraded starts at the worst of their
    /// levels.
    pub fn register_feature(&self, registration: FeatureRegistration) {
        let now = self.clock.now();
        let mut features = self.features();

        let inherited = registration
            .dependencies
            .iter()
            .filter_map(|dep| features.iter().find(|f| f.status.name == *dep))
            .map(|f| (f.status.level, f.status.name.clone()))
            .max_by_key(|(level, _)| *level);
        let (level, reason) = match inherited {
            Some((level, dep)) if level > DegradationLevel::Full => {
                (level, Some(format!("dependency '{dep}' is {level}")))
            }
            _ => (DegradationLevel::Full, None),
        };

        let feature = Feature {
            status: FeatureStatus {
                name: registration.name,
                level,
                dependencies: registration.dependencies,
                fallback_active: false,
                reason,
                changed_at: now,
                priority: registration.priority,
                auto_recover: registration.auto_recover,
            },
            fallback: registration.fallback,
            health_check: registration.health_check,
        };

        info!(
            feature = %feature.status.name,
            dependencies = ?feature.status.dependencies,
            level = %feature.status.level,
            fallback = feature.fallback.as_ref().map(|f| f.name()),
            "Feature registered"
        );

        match features.iter_mut().find(|f| f.status.name == feature.status.name) {
            Some(existing) => *existing = feature,
            None => features.push(feature),
        }
    }

    /// Remove a feature and clean up its fallback. Returns whether it existed.
    pub async fn unregister_feature(&self, name: &str) -> bool {
        let removed = {
            let mut features = self.features();
            features
                .iter()
                .position(|f| f.status.name == name)
                .map(|idx| features.remove(idx))
        };

        let Some(feature) = removed else {
            return false;
        };
        if let Some(fallback) = &feature.fallback {
            fallback.cleanup().await;
        }
        info!(feature = name, "Feature unregistered");
        true
    }

    /// Set `name` to `level` and raise every transitive dependent to at least
    /// `level`. Asking for [`DegradationLevel::Full`] is a [`recover`], so it
    /// is refused while a dependency is still degraded.
    ///
    /// [`recover`]: Self::recover
    pub fn degrade(&self, name: &str, level: DegradationLevel, reason: impl Into<String>) -> Result<()> {
        if level == DegradationLevel::Full {
            self.recover(name)?;
            return Ok(());
        }
        self.apply_degrade(name, level, reason.into(), false)
    }

    /// Bring `name` back to full if all of its dependencies are full, then try
    /// the same for its dependents. Returns whether `name` is full afterwards.
    pub fn recover(&self, name: &str) -> Result<bool> {
        let events = {
            let mut features = self.features();
            let idx = position(&features, name)?;
            let now = self.clock.now();
            let mut events = Vec::new();

            if !try_recover(&mut features, idx, now, None, &mut events) {
                debug!(feature = name, "Recovery blocked by degraded dependencies");
                return Ok(false);
            }
            cascade_recover(&mut features, name, now, &mut events);
            events
        };

        self.emit_all(events);
        Ok(true)
    }

    /// Run `op` for feature `name`, falling back to the feature's registered
    /// strategy when it fails. An `unavailable` feature goes straight to the
    /// fallback.
    pub async fn execute_with_fallback<T, F, Fut>(&self, name: &str, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let (level, fallback) = {
            let features = self.features();
            let feature = &features[position(&features, name)?];
            (feature.status.level, feature.fallback.clone())
        };

        let error = if level == DegradationLevel::Unavailable {
            debug!(feature = name, "Feature unavailable, skipping primary");
            Error::Internal(format!("feature '{name}' is unavailable"))
        } else {
            match op().await {
                Ok(value) => {
                    self.set_fallback_active(name, false);
                    return Ok(value);
                }
                Err(e) => e,
            }
        };
        warn!(feature = name, error = %error, "Primary operation failed");

        let strategy = fallback.filter(|f| f.is_available()).and_then(|f| {
            let typed = downcast::<T>(f.as_ref());
            if typed.is_none() {
                warn!(feature = name, strategy = f.name(), "Fallback value type does not match the operation");
            }
            typed
        });
        let Some(strategy) = strategy else {
            return Err(Error::NoFallbackAvailable {
                feature: name.to_string(),
                source: Box::new(error),
            });
        };

        match strategy.execute().await {
            Ok(value) => {
                info!(
                    feature = name,
                    strategy = strategy.name(),
                    quality = strategy.quality_score(),
                    "Served by fallback"
                );
                self.set_fallback_active(name, true);
                if self.config.auto_degrade {
                    self.apply_degrade(
                        name,
                        DegradationLevel::Partial,
                        format!("primary failed: {error}"),
                        true,
                    )?;
                }
                Ok(value)
            }
            Err(fallback_error) => {
                warn!(
                    feature = name,
                    strategy = strategy.name(),
                    error = %fallback_error,
                    "Fallback failed"
                );
                Err(Error::NoFallbackAvailable {
                    feature: name.to_string(),
                    source: Box::new(error),
                })
            }
        }
    }

    pub fn status(&self, name: &str) -> Option<FeatureStatus> {
        self.features()
            .iter()
            .find(|f| f.status.name == name)
            .map(|f| f.status.clone())
    }

    /// Every feature, in registration order.
    pub fn statuses(&self) -> Vec<FeatureStatus> {
        self.features().iter().map(|f| f.status.clone()).collect()
    }

    /// Priority-weighted mean of level scores; 1.0 when nothing is registered.
    pub fn global_health_score(&self) -> f64 {
        let features = self.features();
        if features.is_empty() {
            return 1.0;
        }

        let total_priority: f64 = features.iter().map(|f| f.status.priority).sum();
        if total_priority <= 0.0 {
            let sum: f64 = features.iter().map(|f| f.status.level.score()).sum();
            return sum / features.len() as f64;
        }
        features
            .iter()
            .map(|f| f.status.priority * f.status.level.score())
            .sum::<f64>()
            / total_priority
    }

    /// Attempt recovery of every degraded `auto_recover` feature whose health
    /// check (if any) passes. Returns the features that are full afterwards.
    pub async fn run_recovery_cycle(&self) -> Vec<String> {
        let candidates: Vec<(String, Option<HealthCheck>)> = self
            .features()
            .iter()
            .filter(|f| f.status.auto_recover && f.status.level != DegradationLevel::Full)
            .map(|f| (f.status.name.clone(), f.health_check.clone()))
            .collect();

        let mut recovered = Vec::new();
        for (name, check) in candidates {
            if let Some(check) = check {
                if !check().await {
                    debug!(feature = %name, "Health check still failing");
                    continue;
                }
            }
            // The feature may have been unregistered while the check ran.
            if let Ok(true) = self.recover(&name) {
                recovered.push(name);
            }
        }

        if !recovered.is_empty() {
            info!(features = ?recovered, "Recovery cycle restored features");
        }
        recovered
    }

    /// Run [`run_recovery_cycle`](Self::run_recovery_cycle) every
    /// `recovery_interval` until [`shutdown`](Self::shutdown). Does nothing
    /// when auto-recovery is disabled.
    pub fn start_auto_recovery(self: &Arc<Self>) {
        if !self.config.auto_recovery {
            debug!("Auto-recovery disabled");
            return;
        }

        let period = self.config.recovery_interval().max(Duration::from_secs(1));
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = weak.upgrade() else {
                    break;
                };
                manager.run_recovery_cycle().await;
            }
        });

        if let Some(previous) = self.recovery_slot().replace(handle) {
            previous.abort();
        }
        debug!(interval_secs = period.as_secs(), "Auto-recovery started");
    }

    /// Stop auto-recovery. Idempotent.
    pub fn shutdown(&self) {
        if let Some(handle) = self.recovery_slot().take() {
            handle.abort();
            debug!("Auto-recovery stopped");
        }
    }

    pub fn on_event<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&DegradationEvent) + Send + Sync + 'static,
    {
        self.events.on(listener)
    }

    pub fn off_event(&self, id: SubscriptionId) -> bool {
        self.events.off(id)
    }

    pub fn events(&self) -> &EventEmitter<DegradationEvent> {
        &self.events
    }

    // ── internals ──────────────────────────────────────────────────────────

    fn features(&self) -> MutexGuard<'_, Vec<Feature>> {
        self.features.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn recovery_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.recovery.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// With `only_raise`, a feature already at or below `level` is left alone
    /// (its dependents are still raised).
    fn apply_degrade(&self, name: &str, level: DegradationLevel, reason: String, only_raise: bool) -> Result<()> {
        let events = {
            let mut features = self.features();
            let idx = position(&features, name)?;
            let now = self.clock.now();
            let mut events = Vec::new();

            let status = &mut features[idx].status;
            let from = status.level;
            if from != level && !(only_raise && from > level) {
                status.level = level;
                status.reason = Some(reason.clone());
                status.changed_at = now;
                warn!(feature = name, from = %from, to = %level, reason = %reason, "Feature degraded");
                events.push(DegradationEvent::Degraded {
                    feature: name.to_string(),
                    from,
                    to: level,
                    reason,
                    cascaded_from: None,
                });
            }
            cascade_degrade(&mut features, name, level, now, &mut events);
            events
        };

        self.emit_all(events);
        Ok(())
    }

    fn set_fallback_active(&self, name: &str, active: bool) {
        if let Some(feature) = self.features().iter_mut().find(|f| f.status.name == name) {
            feature.status.fallback_active = active;
        }
    }

    fn emit_all(&self, events: Vec<DegradationEvent>) {
        for event in events {
            self.events.emit(event);
        }
    }
}

impl Drop for DegradationManager {
    fn drop(&mut self) {
        if let Some(handle) = self.recovery_slot().take() {
            handle.abort();
        }
    }
}

fn position(features: &[Feature], name: &str) -> Result<usize> {
    features
        .iter()
        .position(|f| f.status.name == name)
        .ok_or_else(|| Error::UnknownFeature(name.to_string()))
}

/// Breadth-first over dependents of `origin`, raising each to `level`.
fn cascade_degrade(
    features: &mut [Feature],
    origin: &str,
    level: DegradationLevel,
    now: DateTime<Utc>,
    events: &mut Vec<DegradationEvent>,
) {
    let mut queue = VecDeque::from([origin.to_string()]);
    let mut visited = HashSet::from([origin.to_string()]);

    while let Some(current) = queue.pop_front() {
        for feature in features.iter_mut() {
            let status = &mut feature.status;
            if !status.dependencies.contains(&current) || visited.contains(&status.name) {
                continue;
            }
            visited.insert(status.name.clone());
            queue.push_back(status.name.clone());

            if status.level < level {
                let from = status.level;
                let reason = format!("dependency '{current}' is {level}");
                status.level = level;
                status.reason = Some(reason.clone());
                status.changed_at = now;
                warn!(feature = %status.name, from = %from, to = %level, cause = origin, "Degradation cascaded");
                events.push(DegradationEvent::Degraded {
                    feature: status.name.clone(),
                    from,
                    to: level,
                    reason,
                    cascaded_from: Some(origin.to_string()),
                });
            }
        }
    }
}

/// Breadth-first over dependents of `origin`, recovering each whose
/// dependencies are all full.
fn cascade_recover(features: &mut [Feature], origin: &str, now: DateTime<Utc>, events: &mut Vec<DegradationEvent>) {
    let mut queue = VecDeque::from([origin.to_string()]);
    let mut visited = HashSet::from([origin.to_string()]);

    while let Some(current) = queue.pop_front() {
        let dependents: Vec<usize> = features
            .iter()
            .enumerate()
            .filter(|(_, f)| f.status.dependencies.contains(&current) && !visited.contains(&f.status.name))
            .map(|(idx, _)| idx)
            .collect();

        for idx in dependents {
            let name = features[idx].status.name.clone();
            visited.insert(name.clone());
            if try_recover(features, idx, now, Some(origin), events) {
                queue.push_back(name);
            }
        }
    }
}

/// Unregistered dependencies count as full.
fn try_recover(
    features: &mut [Feature],
    idx: usize,
    now: DateTime<Utc>,
    cascaded_from: Option<&str>,
    events: &mut Vec<DegradationEvent>,
) -> bool {
    let blocked = features[idx].status.dependencies.iter().any(|dep| {
        features
            .iter()
            .any(|f| f.status.name == *dep && f.status.level != DegradationLevel::Full)
    });
    if blocked {
        return false;
    }

    let status = &mut features[idx].status;
    if status.level != DegradationLevel::Full {
        let from = status.level;
        status.level = DegradationLevel::Full;
        status.reason = None;
        status.fallback_active = false;
        status.changed_at = now;
        info!(feature = %status.name, from = %from, "Feature recovered");
        events.push(DegradationEvent::Recovered {
            feature: status.name.clone(),
            from,
            cascaded_from: cascaded_from.map(str::to_string),
        });
    }
    true
}
