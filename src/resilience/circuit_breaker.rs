//! Circuit breaker for dependency protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: dependency assumed down, calls fail fast
//! - Half-Open: testing if dependency recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive counted failures >= failure_threshold
//! Open → Half-Open: first call after recovery_timeout (or the monitor tick)
//! Half-Open → Closed: probe call succeeds
//! Half-Open → Open: probe call fails (recovery timer restarts)
//! ```
//!
//! # Design Decisions
//! - One breaker per protected dependency, owned by the caller
//! - The lock is held for admission and for recording, never across the call
//! - Single probe in Half-Open, decided atomically at admission
//! - Errors outside the expected set are propagated but not counted

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;
use crate::resilience::classify::ErrorFilter;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Circuit is closed, calls flow normally.
    Closed,
    /// Circuit is open, calls are rejected.
    Open,
    /// Circuit admits a single trial call.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Raised by the breaker itself when it refuses a call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("circuit '{name}' is {state}; call rejected")]
pub struct CircuitOpenError {
    pub name: String,
    pub state: CircuitState,
    /// Time left until a probe becomes admissible. Zero while a half-open
    /// probe is already in flight.
    pub retry_after: Duration,
}

/// Result of a call made through a breaker.
#[derive(Debug)]
pub enum CallError<E> {
    /// Rejected without invoking the wrapped callable.
    Open(CircuitOpenError),
    /// The wrapped callable's own error, unchanged.
    Inner(E),
}

impl<E> CallError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, CallError::Open(_))
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            CallError::Open(_) => None,
            CallError::Inner(e) => Some(e),
        }
    }
}

impl<E> From<CircuitOpenError> for CallError<E> {
    fn from(err: CircuitOpenError) -> Self {
        CallError::Open(err)
    }
}

impl<E: fmt::Display> fmt::Display for CallError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::Open(e) => write!(f, "{e}"),
            CallError::Inner(e) => write!(f, "{e}"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for CallError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CallError::Open(e) => Some(e),
            CallError::Inner(e) => Some(e),
        }
    }
}

/// Read-only snapshot for observability.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub recovery_timeout_secs: f64,
    pub secs_since_last_failure: Option<f64>,
    pub secs_since_last_success: Option<f64>,
    pub total_calls: u64,
    pub rejected_calls: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
    /// Error outside the expected set.
    Ignored,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
    last_success_at: Option<Instant>,
    /// Epoch of the half-open probe currently in flight.
    probe: Option<u64>,
    next_probe: u64,
}

/// Circuit breaker wrapping calls to one dependency.
pub struct CircuitBreaker<E> {
    name: String,
    config: CircuitBreakerConfig,
    expected: ErrorFilter<E>,
    inner: Mutex<BreakerState>,
    total_calls: AtomicU64,
    rejected_calls: AtomicU64,
}

impl<E> fmt::Debug for CircuitBreaker<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("expected", &self.expected)
            .field("state", &*self.lock())
            .finish()
    }
}

impl<E> CircuitBreaker<E> {
    /// Create a closed breaker that counts every error as a failure.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        metrics::record_circuit_state(&name, CircuitState::Closed);
        Self {
            name,
            config,
            expected: ErrorFilter::any(),
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_at: None,
                last_success_at: None,
                probe: None,
                next_probe: 0,
            }),
            total_calls: AtomicU64::new(0),
            rejected_calls: AtomicU64::new(0),
        }
    }

    /// Count only errors matching `filter`; others pass through untouched.
    pub fn with_expected(mut self, filter: ErrorFilter<E>) -> Self {
        self.expected = filter;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    /// Snapshot of the breaker. Never changes state.
    pub fn get_stats(&self) -> CircuitStats {
        let inner = self.lock();
        let now = Instant::now();
        CircuitStats {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            failure_threshold: self.config.failure_threshold(),
            recovery_timeout_secs: self.config.recovery_timeout().as_secs_f64(),
            secs_since_last_failure: inner
                .last_failure_at
                .map(|t| now.saturating_duration_since(t).as_secs_f64()),
            secs_since_last_success: inner
                .last_success_at
                .map(|t| now.saturating_duration_since(t).as_secs_f64()),
            total_calls: self.total_calls.load(Ordering::Relaxed),
            rejected_calls: self.rejected_calls.load(Ordering::Relaxed),
        }
    }

    /// Execute `f` under breaker protection.
    pub fn call<T, F>(&self, f: F) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let permit = self.acquire()?;
        let result = f();
        permit.settle(self.classify(&result));
        result.map_err(CallError::Inner)
    }

    /// Async form of [`call`](Self::call). Dropping the returned future
    /// mid-call releases a half-open probe slot without recording an outcome.
    pub async fn call_async<T, F, Fut>(&self, f: F) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.acquire()?;
        let result = f().await;
        permit.settle(self.classify(&result));
        result.map_err(CallError::Inner)
    }

    /// Bind `f` to this breaker. Every invocation of the returned closure
    /// goes through [`call`](Self::call).
    pub fn wrap<T, F>(self: Arc<Self>, f: F) -> impl Fn() -> Result<T, CallError<E>>
    where
        F: Fn() -> Result<T, E>,
    {
        move || self.call(&f)
    }

    /// Force the breaker back to closed with a clean failure history.
    pub fn reset(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            self.transition(&mut inner, CircuitState::Closed);
        }
        inner.failure_count = 0;
        inner.last_failure_at = None;
        inner.probe = None;
        tracing::info!(circuit = %self.name, "Circuit breaker reset");
    }

    /// Move Open → Half-Open if the recovery timeout has elapsed. Returns
    /// true when a transition happened. No probe is admitted by this call.
    pub fn check_recovery(&self) -> bool {
        let mut inner = self.lock();
        if inner.state == CircuitState::Open && self.recovery_elapsed(&inner) {
            self.transition(&mut inner, CircuitState::HalfOpen);
            return true;
        }
        false
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn classify<T>(&self, result: &Result<T, E>) -> Outcome {
        match result {
            Ok(_) => Outcome::Success,
            Err(e) if self.expected.matches(e) => Outcome::Failure,
            Err(_) => Outcome::Ignored,
        }
    }

    fn recovery_elapsed(&self, inner: &BreakerState) -> bool {
        self.remaining_open(inner).is_zero()
    }

    fn remaining_open(&self, inner: &BreakerState) -> Duration {
        match inner.last_failure_at {
            Some(at) => self
                .config
                .recovery_timeout()
                .saturating_sub(Instant::now().saturating_duration_since(at)),
            None => Duration::ZERO,
        }
    }

    fn acquire(&self) -> Result<Permit<'_, E>, CircuitOpenError> {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.lock();

        match inner.state {
            CircuitState::Closed => Ok(Permit::new(self, None)),
            CircuitState::Open => {
                let remaining = self.remaining_open(&inner);
                if !remaining.is_zero() {
                    drop(inner);
                    return Err(self.reject(CircuitState::Open, remaining));
                }
                self.transition(&mut inner, CircuitState::HalfOpen);
                let epoch = Self::admit_probe(&mut inner);
                Ok(Permit::new(self, Some(epoch)))
            }
            CircuitState::HalfOpen => {
                if inner.probe.is_some() {
                    drop(inner);
                    return Err(self.reject(CircuitState::HalfOpen, Duration::ZERO));
                }
                let epoch = Self::admit_probe(&mut inner);
                Ok(Permit::new(self, Some(epoch)))
            }
        }
    }

    fn admit_probe(inner: &mut BreakerState) -> u64 {
        let epoch = inner.next_probe;
        inner.next_probe = inner.next_probe.wrapping_add(1);
        inner.probe = Some(epoch);
        epoch
    }

    fn reject(&self, state: CircuitState, retry_after: Duration) -> CircuitOpenError {
        self.rejected_calls.fetch_add(1, Ordering::Relaxed);
        metrics::record_circuit_rejection(&self.name);
        tracing::debug!(circuit = %self.name, state = %state, retry_after = ?retry_after, "Call rejected");
        CircuitOpenError {
            name: self.name.clone(),
            state,
            retry_after,
        }
    }

    fn record(&self, probe: Option<u64>, outcome: Outcome) {
        let mut inner = self.lock();
        let now = Instant::now();
        let is_probe = probe.is_some() && inner.probe == probe;

        match (outcome, inner.state) {
            (Outcome::Success, CircuitState::Closed) => {
                inner.failure_count = 0;
                inner.last_success_at = Some(now);
            }
            (Outcome::Success, CircuitState::HalfOpen) if is_probe => {
                inner.last_success_at = Some(now);
                self.transition(&mut inner, CircuitState::Closed);
            }
            (Outcome::Failure, CircuitState::Closed) => {
                inner.failure_count = inner.failure_count.saturating_add(1);
                inner.last_failure_at = Some(now);
                if inner.failure_count >= self.config.failure_threshold() {
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            (Outcome::Failure, CircuitState::HalfOpen) if is_probe => {
                inner.failure_count = inner.failure_count.saturating_add(1);
                inner.last_failure_at = Some(now);
                self.transition(&mut inner, CircuitState::Open);
            }
            (Outcome::Ignored, CircuitState::HalfOpen) if is_probe => {
                inner.probe = None;
            }
            _ => {
                // Outcome of a call admitted before the last transition.
                tracing::trace!(circuit = %self.name, outcome = ?outcome, "Stale outcome ignored");
            }
        }
    }

    fn release(&self, probe: u64) {
        let mut inner = self.lock();
        if inner.probe == Some(probe) {
            inner.probe = None;
            tracing::debug!(circuit = %self.name, "Probe abandoned without outcome");
        }
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        match to {
            CircuitState::Closed => {
                inner.failure_count = 0;
                inner.probe = None;
                tracing::info!(circuit = %self.name, from = %from, "Circuit closed");
            }
            CircuitState::Open => {
                inner.probe = None;
                tracing::warn!(
                    circuit = %self.name,
                    from = %from,
                    failures = inner.failure_count,
                    recovery_timeout = ?self.config.recovery_timeout(),
                    "Circuit opened"
                );
            }
            CircuitState::HalfOpen => {
                tracing::info!(circuit = %self.name, "Circuit half-open, admitting probe");
            }
        }
        metrics::record_circuit_state(&self.name, to);
    }
}

impl<E: 'static> CircuitBreaker<E> {
    /// Spawn a task that moves the breaker to half-open once the recovery
    /// timeout elapses, ticking every `monitor_interval`.
    pub fn spawn_monitor(self: &Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let breaker = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = time::interval(breaker.config.monitor_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(
                circuit = %breaker.name,
                interval = ?breaker.config.monitor_interval(),
                "Circuit monitor starting"
            );
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        breaker.check_recovery();
                    }
                }
            }
            tracing::info!(circuit = %breaker.name, "Circuit monitor stopped");
        })
    }
}

/// Admission ticket for one call. A probe ticket dropped without an outcome
/// frees the half-open slot.
struct Permit<'a, E> {
    breaker: &'a CircuitBreaker<E>,
    probe: Option<u64>,
    settled: bool,
}

impl<'a, E> Permit<'a, E> {
    fn new(breaker: &'a CircuitBreaker<E>, probe: Option<u64>) -> Self {
        Self {
            breaker,
            probe,
            settled: false,
        }
    }

    fn settle(mut self, outcome: Outcome) {
        self.settled = true;
        self.breaker.record(self.probe, outcome);
    }
}

impl<E> Drop for Permit<'_, E> {
    fn drop(&mut self) {
        if let (false, Some(probe)) = (self.settled, self.probe) {
            self.breaker.release(probe);
        }
    }
}
