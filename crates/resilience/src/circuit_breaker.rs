//! Adaptive circuit breaker.
//!
//! `closed → open → half-open → closed | open`
//!
//! - closed → open: the failure rate over the sliding monitoring window
//!   exceeds the (adaptive) threshold, with at least `request_threshold`
//!   outcomes in the window.
//! - open → half-open: the (adaptive) reset timeout has elapsed. Checked
//!   lazily on the next call or state query.
//! - half-open admits `half_open_max_requests` probes. A probe success rate
//!   below `half_open_failure_floor` re-opens at once; otherwise, when every
//!   probe has finished, the circuit closes if the success rate reaches
//!   `half_open_success_rate` and re-opens if not.
//!
//! While open, [`CircuitBreaker::execute`] fails with [`Error::CircuitOpen`]
//! without running the operation.

use beacon_config::CircuitBreakerConfig;
use beacon_core::{Clock, Error, EventEmitter, Result, SubscriptionId, SystemClock};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

const HEALTH_MAX: f64 = 100.0;
const HEALTH_ON_SUCCESS: f64 = 2.0;
const HEALTH_ON_FAILURE: f64 = 5.0;
/// Health at or above which a closed circuit shortens its reset timeout
const HEALTHY_SCORE: f64 = 90.0;

const THRESHOLD_RELAX: f64 = 1.1;
const THRESHOLD_TIGHTEN: f64 = 0.9;
const TIMEOUT_GROW: f64 = 1.5;
const TIMEOUT_SHRINK: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivered to state-change listeners.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitStateChange {
    pub circuit: String,
    pub from: CircuitState,
    pub to: CircuitState,
    pub reason: String,
}

/// Observability snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthMetrics {
    pub state: CircuitState,
    /// 0–100
    pub health_score: f64,
    /// Over the current monitoring window
    pub failure_rate: f64,
    pub success_rate: f64,
    pub window_requests: usize,
    pub consecutive_failures: u64,
    pub consecutive_successes: u64,
    pub total_calls: u64,
    pub rejected_calls: u64,
    pub trip_count: u64,
    pub failure_threshold: f64,
    pub reset_timeout_ms: u64,
    pub time_in_state_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Probe,
}

/// An admitted call. Its outcome is recorded exactly once: by `settle`, or as
/// a failure when the ticket is dropped unsettled.
struct Ticket<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    settled: bool,
}

impl Ticket<'_> {
    fn settle(mut self, success: bool) {
        self.settled = true;
        self.breaker.record(success, self.admission);
    }
}

impl Drop for Ticket<'_> {
    fn drop(&mut self) {
        if !self.settled {
            debug!(circuit = %self.breaker.name, "Call abandoned before completion, counted as failure");
            self.breaker.record(false, self.admission);
        }
    }
}

struct Inner {
    state: CircuitState,
    state_since: DateTime<Utc>,
    /// (when, succeeded)
    window: VecDeque<(DateTime<Utc>, bool)>,
    consecutive_failures: u64,
    consecutive_successes: u64,
    health: f64,
    last_decay: DateTime<Utc>,
    failure_threshold: f64,
    reset_timeout: Duration,
    trip_count: u64,
    rejected_calls: u64,
    total_calls: u64,
    probes_admitted: usize,
    probe_successes: usize,
    probe_failures: usize,
}

impl Inner {
    fn new(config: &CircuitBreakerConfig, now: DateTime<Utc>) -> Self {
        Self {
            state: CircuitState::Closed,
            state_since: now,
            window: VecDeque::new(),
            consecutive_failures: 0,
            consecutive_successes: 0,
            health: HEALTH_MAX,
            last_decay: now,
            failure_threshold: config.failure_threshold,
            reset_timeout: config.reset_timeout(),
            trip_count: 0,
            rejected_calls: 0,
            total_calls: 0,
            probes_admitted: 0,
            probe_successes: 0,
            probe_failures: 0,
        }
    }

    fn failure_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let failures = self.window.iter().filter(|(_, ok)| !ok).count();
        failures as f64 / self.window.len() as f64
    }

    fn elapsed_in_state(&self, now: DateTime<Utc>) -> Duration {
        (now - self.state_since).to_std().unwrap_or_default()
    }
}

pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
    events: EventEmitter<CircuitStateChange>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_clock(name, config, Arc::new(SystemClock))
    }

    pub fn with_clock(name: impl Into<String>, config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        let inner = Inner::new(&config, clock.now());
        Self {
            name: name.into(),
            config,
            clock,
            inner: Mutex::new(inner),
            events: EventEmitter::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `operation` through the breaker. Any `Err` it returns counts as a
    /// failure and is passed back unchanged. A call that is dropped before it
    /// finishes (cancelled or panicked) also counts as a failure.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let ticket = self.admit()?;
        let outcome = operation().await;
        ticket.settle(outcome.is_ok());
        outcome
    }

    /// Current state, applying a due open → half-open transition.
    pub fn state(&self) -> CircuitState {
        let (state, changes) = {
            let mut inner = self.lock();
            let now = self.clock.now();
            let changes: Vec<_> = self.maybe_half_open(&mut inner, now).into_iter().collect();
            (inner.state, changes)
        };
        self.emit_all(changes);
        state
    }

    pub fn health_metrics(&self) -> HealthMetrics {
        let (metrics, changes) = {
            let mut inner = self.lock();
            let now = self.clock.now();
            self.decay(&mut inner, now);
            self.prune(&mut inner, now);
            let changes: Vec<_> = self.maybe_half_open(&mut inner, now).into_iter().collect();
            let failure_rate = inner.failure_rate();
            let metrics = HealthMetrics {
                state: inner.state,
                health_score: inner.health,
                failure_rate,
                success_rate: if inner.window.is_empty() { 1.0 } else { 1.0 - failure_rate },
                window_requests: inner.window.len(),
                consecutive_failures: inner.consecutive_failures,
                consecutive_successes: inner.consecutive_successes,
                total_calls: inner.total_calls,
                rejected_calls: inner.rejected_calls,
                trip_count: inner.trip_count,
                failure_threshold: inner.failure_threshold,
                reset_timeout_ms: inner.reset_timeout.as_millis() as u64,
                time_in_state_ms: inner.elapsed_in_state(now).as_millis() as u64,
            };
            (metrics, changes)
        };
        self.emit_all(changes);
        metrics
    }

    pub fn on_state_change<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&CircuitStateChange) + Send + Sync + 'static,
    {
        self.events.on(listener)
    }

    pub fn events(&self) -> &EventEmitter<CircuitStateChange> {
        &self.events
    }

    /// Force the circuit closed and forget all history. Adaptive threshold
    /// and reset timeout go back to their configured values.
    pub fn reset(&self) {
        let change = {
            let mut inner = self.lock();
            let now = self.clock.now();
            let from = inner.state;
            let trip_count = inner.trip_count;
            *inner = Inner::new(&self.config, now);
            inner.trip_count = trip_count;
            (from != CircuitState::Closed).then(|| self.change(from, CircuitState::Closed, "manual reset"))
        };
        info!(circuit = %self.name, "Circuit breaker reset");
        self.emit_all(change);
    }

    // ── internals ──────────────────────────────────────────────────────────

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn admit(&self) -> Result<Ticket<'_>> {
        let (result, changes) = {
            let mut inner = self.lock();
            let now = self.clock.now();
            self.decay(&mut inner, now);
            let changes: Vec<_> = self.maybe_half_open(&mut inner, now).into_iter().collect();

            let state = inner.state;
            let result = match state {
                CircuitState::Closed => Ok(Admission::Normal),
                CircuitState::HalfOpen if inner.probes_admitted < self.config.half_open_max_requests => {
                    inner.probes_admitted += 1;
                    Ok(Admission::Probe)
                }
                CircuitState::HalfOpen => {
                    inner.rejected_calls += 1;
                    Err(self.open_error(Duration::ZERO))
                }
                CircuitState::Open => {
                    inner.rejected_calls += 1;
                    let retry_after = inner.reset_timeout.saturating_sub(inner.elapsed_in_state(now));
                    Err(self.open_error(retry_after))
                }
            };
            (result, changes)
        };
        self.emit_all(changes);
        if result.is_err() {
            debug!(circuit = %self.name, "Call rejected by open circuit");
        }
        result.map(|admission| Ticket {
            breaker: self,
            admission,
            settled: false,
        })
    }

    fn record(&self, success: bool, admission: Admission) {
        let changes = {
            let mut inner = self.lock();
            let now = self.clock.now();
            self.decay(&mut inner, now);

            inner.total_calls += 1;
            inner.window.push_back((now, success));
            self.prune(&mut inner, now);

            if success {
                inner.consecutive_successes += 1;
                inner.consecutive_failures = 0;
                inner.health = (inner.health + HEALTH_ON_SUCCESS).min(HEALTH_MAX);
            } else {
                inner.consecutive_failures += 1;
                inner.consecutive_successes = 0;
                inner.health = (inner.health - HEALTH_ON_FAILURE).max(0.0);
            }

            let state = inner.state;
            match state {
                CircuitState::Closed => self.after_closed_outcome(&mut inner, success, now),
                CircuitState::HalfOpen if admission == Admission::Probe => {
                    self.after_probe(&mut inner, success, now)
                }
                // Calls admitted before a transition finish without moving the state.
                _ => None,
            }
        };
        self.emit_all(changes);
    }

    fn after_closed_outcome(
        &self,
        inner: &mut Inner,
        success: bool,
        now: DateTime<Utc>,
    ) -> Option<CircuitStateChange> {
        let enough = inner.window.len() >= self.config.request_threshold;
        let failure_rate = inner.failure_rate();

        if !success && enough && failure_rate > inner.failure_threshold {
            let reason = format!(
                "failure rate {:.0}% exceeded threshold {:.0}% over {} requests",
                failure_rate * 100.0,
                inner.failure_threshold * 100.0,
                inner.window.len()
            );
            return Some(self.trip(inner, now, reason));
        }

        if self.config.adaptive && enough {
            self.adapt_threshold(inner, failure_rate);
            if success && inner.health >= HEALTHY_SCORE {
                let shrunk = inner.reset_timeout.mul_f64(TIMEOUT_SHRINK);
                inner.reset_timeout = shrunk.max(self.config.min_reset_timeout());
            }
        }
        None
    }

    fn after_probe(&self, inner: &mut Inner, success: bool, now: DateTime<Utc>) -> Option<CircuitStateChange> {
        if success {
            inner.probe_successes += 1;
        } else {
            inner.probe_failures += 1;
            if self.config.adaptive {
                let grown = inner.reset_timeout.mul_f64(TIMEOUT_GROW);
                inner.reset_timeout = grown.min(self.config.max_reset_timeout());
            }
        }

        let completed = inner.probe_successes + inner.probe_failures;
        let success_rate = inner.probe_successes as f64 / completed as f64;

        if success_rate < self.config.half_open_failure_floor {
            let reason = format!("probe success rate {:.0}% below floor", success_rate * 100.0);
            return Some(self.trip(inner, now, reason));
        }
        if completed < self.config.half_open_max_requests {
            return None;
        }
        if success_rate >= self.config.half_open_success_rate {
            inner.window.clear();
            let from = inner.state;
            inner.state = CircuitState::Closed;
            inner.state_since = now;
            info!(circuit = %self.name, "Circuit breaker closed after successful probes");
            Some(self.change(from, CircuitState::Closed, format!(
                "{}/{} probes succeeded",
                inner.probe_successes, completed
            )))
        } else {
            let reason = format!("only {}/{} probes succeeded", inner.probe_successes, completed);
            Some(self.trip(inner, now, reason))
        }
    }

    fn trip(&self, inner: &mut Inner, now: DateTime<Utc>, reason: String) -> CircuitStateChange {
        let from = inner.state;
        inner.state = CircuitState::Open;
        inner.state_since = now;
        inner.trip_count += 1;
        warn!(
            circuit = %self.name,
            from = %from,
            reset_timeout_ms = inner.reset_timeout.as_millis() as u64,
            trips = inner.trip_count,
            reason = %reason,
            "Circuit breaker opened"
        );
        self.change(from, CircuitState::Open, reason)
    }

    fn maybe_half_open(&self, inner: &mut Inner, now: DateTime<Utc>) -> Option<CircuitStateChange> {
        if inner.state != CircuitState::Open || inner.elapsed_in_state(now) < inner.reset_timeout {
            return None;
        }
        inner.state = CircuitState::HalfOpen;
        inner.state_since = now;
        inner.probes_admitted = 0;
        inner.probe_successes = 0;
        inner.probe_failures = 0;
        debug!(circuit = %self.name, "Circuit breaker half-open, admitting probes");
        Some(self.change(CircuitState::Open, CircuitState::HalfOpen, "reset timeout elapsed"))
    }

    fn adapt_threshold(&self, inner: &mut Inner, failure_rate: f64) {
        let threshold = inner.failure_threshold;
        if failure_rate < threshold / 2.0 {
            inner.failure_threshold = (threshold * THRESHOLD_RELAX).min(self.config.max_failure_threshold);
        } else if failure_rate > threshold * 0.8 {
            inner.failure_threshold = (threshold * THRESHOLD_TIGHTEN).max(self.config.min_failure_threshold);
        }
    }

    /// Recover health toward 100 by `health_decay_rate` of the gap per
    /// elapsed monitoring window.
    fn decay(&self, inner: &mut Inner, now: DateTime<Utc>) {
        let window = self.config.monitoring_window();
        if window.is_zero() {
            return;
        }
        let elapsed = (now - inner.last_decay).to_std().unwrap_or_default();
        let windows = i32::try_from(elapsed.as_millis() / window.as_millis()).unwrap_or(i32::MAX);
        if windows == 0 {
            return;
        }
        let keep = (1.0 - self.config.health_decay_rate).clamp(0.0, 1.0);
        inner.health = HEALTH_MAX - (HEALTH_MAX - inner.health) * keep.powi(windows);
        inner.last_decay = now;
    }

    fn prune(&self, inner: &mut Inner, now: DateTime<Utc>) {
        let window = self.config.monitoring_window();
        while let Some((at, _)) = inner.window.front() {
            if (now - *at).to_std().unwrap_or_default() > window {
                inner.window.pop_front();
            } else {
                break;
            }
        }
    }

    fn change(&self, from: CircuitState, to: CircuitState, reason: impl Into<String>) -> CircuitStateChange {
        CircuitStateChange {
            circuit: self.name.clone(),
            from,
            to,
            reason: reason.into(),
        }
    }

    fn open_error(&self, retry_after: Duration) -> Error {
        Error::CircuitOpen {
            circuit: self.name.clone(),
            retry_after,
        }
    }

    fn emit_all(&self, changes: impl IntoIterator<Item = CircuitStateChange>) {
        for change in changes {
            self.events.emit(change);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 0.5,
            request_threshold: 5,
            monitoring_window_ms: 60_000,
            reset_timeout_ms: 30_000,
            half_open_max_requests: 3,
            half_open_success_rate: 0.6,
            half_open_failure_floor: 0.3,
            adaptive: false,
            ..CircuitBreakerConfig::default()
        }
    }

    fn breaker(config: CircuitBreakerConfig) -> (CircuitBreaker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        (CircuitBreaker::with_clock("backend", config, clock.clone()), clock)
    }

    async fn fail(b: &CircuitBreaker) -> Result<()> {
        b.execute(|| async { Err::<(), _>(Error::Backend("boom".into())) }).await
    }

    async fn succeed(b: &CircuitBreaker) -> Result<u32> {
        b.execute(|| async { Ok(7) }).await
    }

    fn record_changes(b: &CircuitBreaker) -> Arc<Mutex<Vec<(CircuitState, CircuitState)>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        b.on_state_change(move |c| sink.lock().unwrap().push((c.from, c.to)));
        seen
    }

    #[tokio::test]
    async fn trip_and_recovery_cycle() {
        let (b, clock) = breaker(config());
        let changes = record_changes(&b);

        for _ in 0..5 {
            assert!(fail(&b).await.is_err());
        }
        assert_eq!(b.state(), CircuitState::Open);

        let calls = AtomicUsize::new(0);
        let rejected = b
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(rejected, Err(Error::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        clock.advance(Duration::from_secs(31));
        assert_eq!(b.state(), CircuitState::HalfOpen);

        for _ in 0..3 {
            assert_eq!(succeed(&b).await.unwrap(), 7);
        }
        assert_eq!(b.state(), CircuitState::Closed);

        assert_eq!(
            *changes.lock().unwrap(),
            vec![
                (CircuitState::Closed, CircuitState::Open),
                (CircuitState::Open, CircuitState::HalfOpen),
                (CircuitState::HalfOpen, CircuitState::Closed),
            ]
        );
        let metrics = b.health_metrics();
        assert_eq!(metrics.trip_count, 1);
        assert_eq!(metrics.rejected_calls, 1);
    }

    #[tokio::test]
    async fn open_error_reports_remaining_time() {
        let (b, clock) = breaker(config());
        for _ in 0..5 {
            let _ = fail(&b).await;
        }
        clock.advance(Duration::from_secs(10));
        match succeed(&b).await {
            Err(Error::CircuitOpen { circuit, retry_after }) => {
                assert_eq!(circuit, "backend");
                assert_eq!(retry_after, Duration::from_secs(20));
            }
            other => panic!("expected CircuitOpen, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn too_few_requests_never_trip() {
        let (b, _) = breaker(config());
        for _ in 0..4 {
            let _ = fail(&b).await;
        }
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.health_metrics().consecutive_failures, 4);
    }

    #[tokio::test]
    async fn failure_rate_below_threshold_stays_closed() {
        let (b, _) = breaker(config());
        for i in 0..10 {
            if i % 3 == 0 {
                let _ = fail(&b).await;
            } else {
                succeed(&b).await.unwrap();
            }
        }
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn old_outcomes_leave_the_window() {
        let (b, clock) = breaker(config());
        for _ in 0..4 {
            let _ = fail(&b).await;
        }
        clock.advance(Duration::from_secs(61));
        // The old failures no longer count, so one more does not trip.
        let _ = fail(&b).await;
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.health_metrics().window_requests, 1);
    }

    #[tokio::test]
    async fn failed_probe_below_floor_reopens_immediately() {
        let cfg = CircuitBreakerConfig {
            adaptive: true,
            ..config()
        };
        let (b, clock) = breaker(cfg);
        for _ in 0..5 {
            let _ = fail(&b).await;
        }
        clock.advance(Duration::from_secs(31));
        assert_eq!(b.state(), CircuitState::HalfOpen);

        let _ = fail(&b).await;
        let metrics = b.health_metrics();
        assert_eq!(metrics.state, CircuitState::Open);
        assert_eq!(metrics.trip_count, 2);
        assert_eq!(metrics.reset_timeout_ms, 45_000);
    }

    #[tokio::test]
    async fn insufficient_probe_successes_reopen() {
        let cfg = CircuitBreakerConfig {
            half_open_failure_floor: 0.0,
            ..config()
        };
        let (b, clock) = breaker(cfg);
        for _ in 0..5 {
            let _ = fail(&b).await;
        }
        clock.advance(Duration::from_secs(31));

        succeed(&b).await.unwrap();
        let _ = fail(&b).await;
        assert_eq!(b.state(), CircuitState::HalfOpen);
        let _ = fail(&b).await;
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn half_open_limits_concurrent_probes() {
        let cfg = CircuitBreakerConfig {
            half_open_max_requests: 1,
            ..config()
        };
        let (b, clock) = breaker(cfg);
        for _ in 0..5 {
            let _ = fail(&b).await;
        }
        clock.advance(Duration::from_secs(31));

        let outer = b
            .execute(|| async {
                // The only probe slot is taken by this call.
                let inner = succeed(&b).await;
                assert!(matches!(inner, Err(Error::CircuitOpen { .. })));
                Ok(())
            })
            .await;
        assert!(outer.is_ok());
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn health_score_moves_and_decays() {
        let (b, clock) = breaker(config());
        let _ = fail(&b).await;
        let _ = fail(&b).await;
        assert_eq!(b.health_metrics().health_score, 90.0);

        succeed(&b).await.unwrap();
        assert_eq!(b.health_metrics().health_score, 92.0);

        for _ in 0..10 {
            succeed(&b).await.unwrap();
        }
        assert_eq!(b.health_metrics().health_score, 100.0);

        let _ = fail(&b).await;
        clock.advance(Duration::from_secs(120));
        // 100 - 5 × 0.9²
        let health = b.health_metrics().health_score;
        assert!((health - 95.95).abs() < 1e-9, "health was {health}");
    }

    #[tokio::test]
    async fn very_long_idle_restores_full_health() {
        let (b, clock) = breaker(CircuitBreakerConfig {
            monitoring_window_ms: 1,
            ..config()
        });
        let _ = fail(&b).await;
        assert_eq!(b.health_metrics().health_score, 95.0);

        // More elapsed windows than fit in an i32.
        clock.advance(Duration::from_millis(3_000_000_000));
        assert_eq!(b.health_metrics().health_score, 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_half_open_call_frees_its_slot() {
        let (b, clock) = breaker(CircuitBreakerConfig {
            half_open_max_requests: 1,
            ..config()
        });
        for _ in 0..5 {
            let _ = fail(&b).await;
        }
        clock.advance(Duration::from_secs(31));
        assert_eq!(b.state(), CircuitState::HalfOpen);

        let slow = b.execute(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        });
        assert!(tokio::time::timeout(Duration::from_millis(10), slow).await.is_err());

        // The abandoned call counts as a failed trial and reopens the circuit.
        assert_eq!(b.state(), CircuitState::Open);
        assert_eq!(b.health_metrics().total_calls, 6);

        clock.advance(Duration::from_secs(31));
        assert_eq!(succeed(&b).await.unwrap(), 7);
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn panicking_operation_counts_as_failure() {
        use futures::FutureExt;
        use std::panic::AssertUnwindSafe;

        let (b, _clock) = breaker(config());
        let explode = true;
        let call = b.execute(|| async move {
            if explode {
                panic!("operation blew up");
            }
            Ok::<(), Error>(())
        });
        assert!(AssertUnwindSafe(call).catch_unwind().await.is_err());

        let metrics = b.health_metrics();
        assert_eq!(metrics.total_calls, 1);
        assert_eq!(metrics.consecutive_failures, 1);
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn adaptive_threshold_relaxes_when_healthy() {
        let (fixed, _) = breaker(config());
        let (adaptive, _) = breaker(CircuitBreakerConfig {
            adaptive: true,
            ..config()
        });
        for _ in 0..5 {
            succeed(&fixed).await.unwrap();
            succeed(&adaptive).await.unwrap();
        }
        assert_eq!(fixed.health_metrics().failure_threshold, 0.5);
        assert!((adaptive.health_metrics().failure_threshold - 0.55).abs() < 1e-9);
        assert_eq!(adaptive.health_metrics().reset_timeout_ms, 27_000);

        for _ in 0..50 {
            succeed(&adaptive).await.unwrap();
        }
        let metrics = adaptive.health_metrics();
        assert!((metrics.failure_threshold - 0.8).abs() < 1e-9);
        assert_eq!(metrics.reset_timeout_ms, 5_000);
    }

    #[tokio::test]
    async fn adaptive_threshold_tightens_near_the_limit() {
        let (b, _) = breaker(CircuitBreakerConfig {
            adaptive: true,
            ..config()
        });
        // 3 of 6 failed: 50% does not exceed the threshold but sits above 80% of it.
        for ok in [true, true, true, false, false, false] {
            if ok {
                succeed(&b).await.unwrap();
            } else {
                let _ = fail(&b).await;
            }
        }
        assert_eq!(b.state(), CircuitState::Closed);
        assert!((b.health_metrics().failure_threshold - 0.45).abs() < 1e-9);
    }

    #[tokio::test]
    async fn reset_forces_closed() {
        let (b, _) = breaker(config());
        let changes = record_changes(&b);
        for _ in 0..5 {
            let _ = fail(&b).await;
        }
        b.reset();

        let metrics = b.health_metrics();
        assert_eq!(metrics.state, CircuitState::Closed);
        assert_eq!(metrics.window_requests, 0);
        assert_eq!(metrics.health_score, 100.0);
        assert_eq!(metrics.trip_count, 1);
        assert_eq!(
            changes.lock().unwrap().last(),
            Some(&(CircuitState::Open, CircuitState::Closed))
        );
        assert_eq!(succeed(&b).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn panicking_listener_does_not_block_others() {
        let (b, _) = breaker(config());
        b.on_state_change(|_| panic!("listener bug"));
        let changes = record_changes(&b);
        for _ in 0..5 {
            let _ = fail(&b).await;
        }
        assert_eq!(changes.lock().unwrap().len(), 1);
    }
}
