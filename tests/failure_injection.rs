//! Failure injection tests for the resilience primitives.

use std::sync::Arc;
use std::time::Duration;

use resilience_core::{
    CallError, CircuitBreaker, CircuitState, ErrorFilter, HealthCheckRegistry, HealthCheckResult,
    HealthStatus, ResilienceConfig, RetryError, RetryExecutor,
};
use resilience_core::BoxError;
use tokio::sync::Mutex;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

mod common;

use common::{breaker_config, retry_config, Dependency, DependencyError};

#[tokio::test(start_paused = true)]
async fn test_retry_waits_follow_backoff_schedule() {
    let dependency = Dependency::failing_first(2, DependencyError::Refused);
    let executor = RetryExecutor::new(retry_config(3, 1.0));
    let calls_at = Mutex::new(Vec::new());
    let start = Instant::now();

    let (dependency, calls_at) = (&dependency, &calls_at);
    let value = executor
        .execute(move || async move {
            calls_at.lock().await.push(start.elapsed());
            dependency.call()
        })
        .await
        .unwrap();

    assert_eq!(value, 3);
    assert_eq!(dependency.calls(), 3);
    assert_eq!(
        *calls_at.lock().await,
        vec![Duration::ZERO, Duration::from_secs(1), Duration::from_secs(3)]
    );
}

#[test]
fn test_retry_exhaustion_surfaces_last_error() {
    for attempts in 1..=4 {
        let dependency = Dependency::always_failing(DependencyError::Timeout);
        let executor = RetryExecutor::new(retry_config(attempts, 0.0));

        let err = executor.execute_blocking(|| dependency.call()).unwrap_err();
        assert_eq!(dependency.calls(), attempts);
        assert!(matches!(
            err,
            RetryError::Exhausted { attempts: n, source: DependencyError::Timeout } if n == attempts
        ));
    }
}

#[test]
fn test_retry_only_listed_kinds() {
    let executor = RetryExecutor::new(retry_config(5, 0.0))
        .retry_on(ErrorFilter::kinds([DependencyError::Refused, DependencyError::Timeout]));

    let invalid = Dependency::always_failing(DependencyError::Invalid);
    let err = executor.execute_blocking(|| invalid.call()).unwrap_err();
    assert_eq!(invalid.calls(), 1);
    assert_eq!(err.into_source(), Some(DependencyError::Invalid));

    let refused = Dependency::failing_first(4, DependencyError::Refused);
    assert_eq!(executor.execute_blocking(|| refused.call()).unwrap(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_circuit_opens_and_admits_probe_after_recovery() {
    let dependency = Dependency::failing_first(2, DependencyError::Refused);
    let breaker = CircuitBreaker::new("payments", breaker_config(2, 5.0));

    for _ in 0..2 {
        let err = breaker.call(|| dependency.call()).unwrap_err();
        assert!(matches!(err, CallError::Inner(DependencyError::Refused)));
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    let err = breaker.call(|| dependency.call()).unwrap_err();
    assert!(err.is_open());
    assert_eq!(dependency.calls(), 2);

    time::advance(Duration::from_secs(6)).await;
    assert_eq!(breaker.call(|| dependency.call()).unwrap(), 3);
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.get_stats().failure_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_retry_around_breaker_stops_on_rejection() {
    let dependency = Dependency::always_failing(DependencyError::Timeout);
    let breaker = CircuitBreaker::new("inventory", breaker_config(2, 30.0));
    let executor = RetryExecutor::new(retry_config(5, 0.5))
        .retry_on(ErrorFilter::when(|e: &CallError<DependencyError>| !e.is_open()));

    let (dependency, breaker) = (&dependency, &breaker);
    let err = executor
        .execute(move || async move { breaker.call(|| dependency.call()) })
        .await
        .unwrap_err();

    assert_eq!(dependency.calls(), 2);
    assert_eq!(err.attempts(), 3);
    match err {
        RetryError::NonRetryable {
            source: CallError::Open(open),
            ..
        } => {
            assert_eq!(open.name, "inventory");
            assert_eq!(open.retry_after, Duration::from_secs(29));
        }
        other => panic!("expected breaker rejection, got {other:?}"),
    }
}

#[test]
fn test_wrapped_callables_compose() {
    let dependency = Dependency::failing_first(2, DependencyError::Refused);
    let breaker = Arc::new(CircuitBreaker::new("search", breaker_config(5, 30.0)));

    let guarded = Arc::clone(&breaker).wrap(|| dependency.call());
    let retried = RetryExecutor::new(retry_config(3, 0.0)).wrap(guarded);

    assert_eq!(retried().unwrap(), 3);
    assert_eq!(retried().unwrap(), 4);
    assert_eq!(dependency.calls(), 4);
    let stats = breaker.get_stats();
    assert_eq!(stats.state, CircuitState::Closed);
    assert_eq!(stats.failure_count, 0);
    assert_eq!(stats.total_calls, 4);
}

#[test]
fn test_wrapped_breaker_opens_under_wrapped_retry() {
    let dependency = Dependency::always_failing(DependencyError::Timeout);
    let breaker = Arc::new(CircuitBreaker::new("ledger", breaker_config(2, 30.0)));

    let guarded = Arc::clone(&breaker).wrap(|| dependency.call());
    let retried = RetryExecutor::new(retry_config(5, 0.0))
        .retry_on(ErrorFilter::when(|e: &CallError<DependencyError>| !e.is_open()))
        .wrap(guarded);

    let err = retried().unwrap_err();
    assert_eq!(err.attempts(), 3);
    assert!(err.source_error().is_some_and(CallError::is_open));
    assert_eq!(dependency.calls(), 2);
    assert_eq!(breaker.state(), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_retry_returns_last_error() {
    let dependency = Dependency::always_failing(DependencyError::Refused);
    let executor = RetryExecutor::new(retry_config(10, 30.0));
    let token = CancellationToken::new();

    let canceller = {
        let token = token.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_secs(45)).await;
            token.cancel();
        })
    };

    let start = Instant::now();
    let dependency = &dependency;
    let err = executor
        .execute_with_cancel(move || async move { dependency.call() }, &token)
        .await
        .unwrap_err();
    canceller.await.unwrap();

    // Waits of 30s then 60s; cancellation lands inside the second one.
    assert_eq!(start.elapsed(), Duration::from_secs(45));
    assert_eq!(dependency.calls(), 2);
    assert!(matches!(
        err,
        RetryError::Cancelled { attempts: 2, source: DependencyError::Refused }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_one_unhealthy_probe_among_healthy_ones() {
    let registry = HealthCheckRegistry::new();
    for i in 0..9 {
        registry
            .add_health_check(
                format!("service-{i}"),
                || async { Ok::<_, BoxError>(HealthCheckResult::healthy("ok")) },
                Duration::from_secs(10),
            )
            .unwrap();
    }
    registry
        .add_health_check(
            "database",
            || async {
                Ok::<_, BoxError>(
                    HealthCheckResult::unhealthy("connection pool exhausted").with_detail("active", 100),
                )
            },
            Duration::from_secs(10),
        )
        .unwrap();

    time::sleep(Duration::from_millis(50)).await;

    assert!(!registry.is_healthy());
    let report = registry.get_health_status();
    assert_eq!(report.overall, HealthStatus::Unhealthy);
    assert_eq!(report.checks.len(), 10);
    assert_eq!(report.failing_checks(), vec!["database"]);
    assert_eq!(report.checks["database"].details["active"], 100);
}

#[tokio::test(start_paused = true)]
async fn test_failing_probe_does_not_affect_others() {
    let registry = HealthCheckRegistry::new();
    registry
        .add_health_check(
            "broken",
            || async { Err::<HealthCheckResult, BoxError>("probe crashed".into()) },
            Duration::from_secs(1),
        )
        .unwrap();
    registry
        .add_blocking_health_check(
            "disk",
            || Ok(HealthCheckResult::healthy("42% used")),
            Duration::from_secs(1),
        )
        .unwrap();

    time::sleep(Duration::from_millis(3500)).await;

    let report = registry.get_health_status();
    let broken = &report.checks["broken"];
    assert_eq!(broken.status, HealthStatus::Unhealthy);
    assert_eq!(broken.message, "Health check error: probe crashed");
    assert_eq!(broken.check_count, 4);
    assert_eq!(report.checks["disk"].status, HealthStatus::Healthy);
    assert_eq!(report.failing_checks(), vec!["broken"]);
}

#[tokio::test(start_paused = true)]
async fn test_components_built_from_toml() {
    let config = ResilienceConfig::from_toml_str(
        r#"
        max_retries = 4
        backoff_factor = 0.25
        failure_threshold = 3
        recovery_timeout = 10.0
        jitter = false
        "#,
    )
    .unwrap();

    let dependency = Dependency::always_failing(DependencyError::Timeout);
    let executor = RetryExecutor::new(config.retry_config());
    let start = Instant::now();
    let dependency = &dependency;
    let err = executor
        .execute(move || async move { dependency.call() })
        .await
        .unwrap_err();
    assert_eq!(err.attempts(), 4);
    // 0.25 + 0.5 + 1.0
    assert_eq!(start.elapsed(), Duration::from_millis(1750));

    let breaker = Arc::new(CircuitBreaker::<DependencyError>::new(
        "from-config",
        config.circuit_breaker_config(),
    ));
    for _ in 0..3 {
        let _ = breaker.call(|| dependency.call());
    }
    assert_eq!(breaker.state(), CircuitState::Open);
    assert_eq!(breaker.get_stats().recovery_timeout_secs, 10.0);
}
