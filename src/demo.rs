//! Simulated dependencies for the `resilience` CLI.
//!
//! Each simulation drives one primitive against a service that fails at a
//! configurable rate and reports whether the primitive behaved as
//! configured. A run passes even if the simulated service never succeeds;
//! it fails when a primitive breaks its own contract (too many invocations,
//! a rejected call reaching the service, a probe that never sampled).

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use rand::Rng;

use crate::config::{CircuitBreakerConfig, RetryConfig};
use crate::health::{HealthCheckRegistry, HealthCheckResult, HealthStatus};
use crate::resilience::{CallError, CircuitBreaker, CircuitState, RetryExecutor};
use crate::BoxError;

/// Error returned by [`FlakyService`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct SimulatedFailure(pub &'static str);

/// A dependency that fails with probability `fail_rate` and counts calls.
#[derive(Debug)]
pub struct FlakyService {
    fail_rate: f64,
    failure: &'static str,
    calls: AtomicU32,
}

impl FlakyService {
    pub fn new(fail_rate: f64, failure: &'static str) -> Self {
        Self {
            fail_rate: fail_rate.clamp(0.0, 1.0),
            failure,
            calls: AtomicU32::new(0),
        }
    }

    pub fn call(&self) -> Result<&'static str, SimulatedFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if rand::thread_rng().gen_bool(self.fail_rate) {
            Err(SimulatedFailure(self.failure))
        } else {
            Ok("Service response")
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Result of one demonstration.
#[derive(Debug, Clone)]
pub struct DemoOutcome {
    pub name: &'static str,
    pub passed: bool,
    pub elapsed: Duration,
    /// Human readable progress, one entry per line.
    pub lines: Vec<String>,
}

impl DemoOutcome {
    fn new(name: &'static str, passed: bool, started: Instant, lines: Vec<String>) -> Self {
        Self {
            name,
            passed,
            elapsed: started.elapsed(),
            lines,
        }
    }

    /// A demonstration that could not be set up at all.
    pub fn aborted(name: &'static str, reason: impl Into<String>) -> Self {
        Self {
            name,
            passed: false,
            elapsed: Duration::ZERO,
            lines: vec![reason.into()],
        }
    }
}

/// Blocking retry against a flaky service.
pub fn simulate_retry(config: RetryConfig, fail_rate: f64) -> DemoOutcome {
    let started = Instant::now();
    let max_attempts = config.max_attempts();
    let service = FlakyService::new(fail_rate, "Simulated failure");
    let executor = RetryExecutor::new(config);

    let mut lines = vec![format!(
        "Simulating retry with {:.0}% failure rate (max {max_attempts} attempts)",
        fail_rate * 100.0
    )];
    let result = executor.execute_blocking(|| service.call());
    let calls = service.calls();
    let passed = match &result {
        Ok(value) => {
            lines.push(format!("Succeeded on attempt {calls}: {value}"));
            calls >= 1 && calls <= max_attempts
        }
        Err(err) => {
            lines.push(format!("Gave up: {err}"));
            calls == max_attempts && err.attempts() == max_attempts
        }
    };
    DemoOutcome::new("retry", passed, started, lines)
}

/// Async retry; each attempt does 100ms of simulated I/O.
pub async fn simulate_async_retry(config: RetryConfig, fail_rate: f64) -> DemoOutcome {
    let started = Instant::now();
    let max_attempts = config.max_attempts();
    let service = FlakyService::new(fail_rate, "Async operation failed");
    let executor = RetryExecutor::new(config);

    let mut lines = vec![format!(
        "Simulating async retry with {:.0}% failure rate (max {max_attempts} attempts)",
        fail_rate * 100.0
    )];
    let service = &service;
    let result = executor
        .execute(move || async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            service.call().map(|_| "Async operation completed")
        })
        .await;
    let calls = service.calls();
    let passed = match &result {
        Ok(value) => {
            lines.push(format!("{value} after {calls} attempt(s)"));
            calls <= max_attempts
        }
        Err(err) => {
            lines.push(format!("Gave up: {err}"));
            calls == max_attempts
        }
    };
    DemoOutcome::new("async-retry", passed, started, lines)
}

/// Sequence of calls through a breaker with a pause between each.
pub async fn simulate_circuit_breaker(
    config: CircuitBreakerConfig,
    fail_rate: f64,
    calls: u32,
    pause: Duration,
) -> DemoOutcome {
    let started = Instant::now();
    let threshold = config.failure_threshold();
    let service = FlakyService::new(fail_rate, "Service unavailable");
    let breaker = CircuitBreaker::<SimulatedFailure>::new("demo-service", config.clone());

    let mut lines = vec![format!(
        "Simulating circuit breaker with {:.0}% failure rate (threshold {threshold}, recovery {:?})",
        fail_rate * 100.0,
        config.recovery_timeout()
    )];
    let mut passed = true;

    for i in 1..=calls {
        let before = service.calls();
        let state_before = breaker.state();
        match breaker.call(|| service.call()) {
            Ok(value) => lines.push(format!("Call {i}: {value}")),
            Err(CallError::Open(err)) => {
                lines.push(format!("Call {i}: rejected ({err})"));
                if service.calls() != before {
                    lines.push(format!("Call {i}: rejected call reached the service"));
                    passed = false;
                }
            }
            Err(CallError::Inner(err)) => {
                lines.push(format!("Call {i}: service failed ({err})"));
                let opened = breaker.state() == CircuitState::Open;
                // A failure admitted while not closed was the recovery probe.
                let should_open = state_before != CircuitState::Closed
                    || breaker.failure_count() >= threshold;
                if opened != should_open {
                    lines.push(format!("Call {i}: breaker state {} after failure", breaker.state()));
                    passed = false;
                }
            }
        }
        if i < calls {
            tokio::time::sleep(pause).await;
        }
    }

    let stats = breaker.get_stats();
    lines.push(format!(
        "Final circuit state: {} ({} calls, {} rejected)",
        stats.state, stats.total_calls, stats.rejected_calls
    ));
    if u64::from(service.calls()) + stats.rejected_calls != u64::from(calls) {
        passed = false;
    }
    DemoOutcome::new("circuit-breaker", passed, started, lines)
}

fn sample_system() -> HealthCheckResult {
    let mut rng = rand::thread_rng();
    let cpu: f64 = rng.gen_range(0.0..100.0);
    let memory: f64 = rng.gen_range(0.0..100.0);

    let result = if cpu > 90.0 || memory > 90.0 {
        HealthCheckResult::unhealthy(format!("Critical: CPU {cpu:.1}%, Memory {memory:.1}%"))
    } else if cpu > 70.0 || memory > 70.0 {
        HealthCheckResult::degraded(format!("Warning: CPU {cpu:.1}%, Memory {memory:.1}%"))
    } else {
        HealthCheckResult::healthy(format!("Normal: CPU {cpu:.1}%, Memory {memory:.1}%"))
    };
    result
        .with_detail("cpu_usage", cpu)
        .with_detail("memory_usage", memory)
}

/// Register a simulated system probe plus a heartbeat and watch `checks`
/// samples arrive.
pub async fn simulate_health_check(checks: u32, interval: Duration) -> DemoOutcome {
    const SYSTEM: &str = "system";
    const HEARTBEAT: &str = "heartbeat";

    let started = Instant::now();
    let registry = HealthCheckRegistry::new();
    let mut lines = vec![format!("Running {checks} health checks with {interval:?} interval")];

    let registered = registry
        .add_health_check(SYSTEM, || async { Ok::<_, BoxError>(sample_system()) }, interval)
        .and_then(|()| {
            registry.add_health_check(
                HEARTBEAT,
                || async { Ok::<_, BoxError>(HealthCheckResult::healthy("alive")) },
                interval,
            )
        });
    if let Err(err) = registered {
        return DemoOutcome::aborted("health-check", err.to_string());
    }

    let deadline = tokio::time::Instant::now() + interval.saturating_mul(checks.saturating_add(1));
    let target = u64::from(checks);
    let mut seen = 0;
    while seen < target && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let Some(row) = registry.get_check(SYSTEM) else {
            break;
        };
        // Several runs may complete between polls; only the latest is visible.
        if row.check_count > seen {
            seen = row.check_count;
            lines.push(format!("Check {seen}: [{}] {}", row.status, row.message));
        }
    }

    let report = registry.get_health_status();
    lines.push(format!("Overall status: {}", report.overall));
    let heartbeat_ok = report
        .checks
        .get(HEARTBEAT)
        .is_some_and(|row| row.status == HealthStatus::Healthy);
    registry.stop_all();

    DemoOutcome::new("health-check", seen >= target && heartbeat_ok, started, lines)
}

/// Retry benchmark: short delays, 30% failure rate, two attempts per call.
pub fn benchmark_retry(iterations: u32) -> DemoOutcome {
    let started = Instant::now();
    let service = FlakyService::new(0.3, "Benchmark failure");
    let executor = RetryExecutor::new(benchmark_retry_config());

    let mut successes = 0u32;
    for _ in 0..iterations {
        if executor.execute_blocking(|| service.call()).is_ok() {
            successes += 1;
        }
    }
    let passed = service.calls() <= iterations.saturating_mul(2);
    benchmark_outcome("benchmark retry", passed, started, iterations, successes)
}

fn benchmark_retry_config() -> RetryConfig {
    RetryConfig::builder()
        .max_attempts(2)
        .base_delay(0.01)
        .build()
        .unwrap_or_default()
}

/// Breaker benchmark: 20% failure rate, threshold 5, 100ms recovery.
pub fn benchmark_circuit_breaker(iterations: u32) -> DemoOutcome {
    let started = Instant::now();
    let service = FlakyService::new(0.2, "Benchmark failure");
    let config = CircuitBreakerConfig::builder()
        .failure_threshold(5)
        .recovery_timeout(0.1)
        .build()
        .unwrap_or_default();
    let breaker = CircuitBreaker::<SimulatedFailure>::new("benchmark", config);

    let mut successes = 0u32;
    for _ in 0..iterations {
        if breaker.call(|| service.call()).is_ok() {
            successes += 1;
        }
    }
    let stats = breaker.get_stats();
    let passed = u64::from(service.calls()) + stats.rejected_calls == u64::from(iterations);
    benchmark_outcome("benchmark circuit-breaker", passed, started, iterations, successes)
}

fn benchmark_outcome(
    name: &'static str,
    passed: bool,
    started: Instant,
    iterations: u32,
    successes: u32,
) -> DemoOutcome {
    let elapsed = started.elapsed().as_secs_f64().max(0.001);
    let success_rate = if iterations == 0 {
        0.0
    } else {
        f64::from(successes) / f64::from(iterations) * 100.0
    };
    let lines = vec![
        format!("Iterations: {iterations}"),
        format!("Success rate: {success_rate:.1}%"),
        format!("Operations/sec: {:.0}", f64::from(iterations) / elapsed),
    ];
    DemoOutcome::new(name, passed, started, lines)
}
