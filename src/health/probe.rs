//! Background health probes.
//!
//! # Responsibilities
//! - Invoke one check function on its own schedule
//! - Publish the latest completed result for lock-free reads
//! - Turn check errors and panics into UNHEALTHY results
//!
//! # Design Decisions
//! - One Tokio task per probe, no coordination between probes
//! - Results are swapped in whole (`ArcSwapOption`), never written in place
//! - Stopping waits for the in-flight check instead of aborting it

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use futures_util::future::{BoxFuture, FutureExt};
use tokio::runtime::Handle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::health::state::{HealthCheckResult, HealthStatus};
use crate::observability::metrics;
use crate::BoxError;

pub(crate) type CheckFuture = BoxFuture<'static, Result<HealthCheckResult, BoxError>>;
pub(crate) type CheckFn = Arc<dyn Fn() -> CheckFuture + Send + Sync>;

/// Wrap an async check function.
pub(crate) fn async_check<F, Fut>(check: F) -> CheckFn
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HealthCheckResult, BoxError>> + Send + 'static,
{
    Arc::new(move || check().boxed())
}

/// Wrap a blocking check function so each run goes to the blocking pool.
pub(crate) fn blocking_check<F>(check: F) -> CheckFn
where
    F: Fn() -> Result<HealthCheckResult, BoxError> + Send + Sync + 'static,
{
    let check = Arc::new(check);
    Arc::new(move || {
        let check = Arc::clone(&check);
        async move {
            match tokio::task::spawn_blocking(move || check()).await {
                Ok(result) => result,
                Err(err) => match err.try_into_panic() {
                    // Re-raised so the probe reports it like an async panic.
                    Ok(payload) => std::panic::resume_unwind(payload),
                    Err(err) => Err(Box::new(err) as BoxError),
                },
            }
        }
        .boxed()
    })
}

/// A running probe. Dropping it stops the background task.
#[derive(Debug)]
pub struct HealthProbe {
    name: String,
    interval: Duration,
    latest: Arc<ArcSwapOption<HealthCheckResult>>,
    check_count: Arc<AtomicU64>,
    token: CancellationToken,
    finished: CancellationToken,
}

impl HealthProbe {
    /// Start sampling immediately, then every `interval`.
    pub(crate) fn spawn(
        handle: &Handle,
        name: String,
        check: CheckFn,
        interval: Duration,
        token: CancellationToken,
    ) -> Self {
        let probe = Self {
            name,
            interval,
            latest: Arc::new(ArcSwapOption::empty()),
            check_count: Arc::new(AtomicU64::new(0)),
            token,
            finished: CancellationToken::new(),
        };
        metrics::record_health_status(&probe.name, HealthStatus::Unknown);

        let worker = Worker {
            name: probe.name.clone(),
            interval,
            check,
            latest: Arc::clone(&probe.latest),
            check_count: Arc::clone(&probe.check_count),
            token: probe.token.clone(),
        };
        let finished = probe.finished.clone();
        handle.spawn(async move {
            let _done = finished.drop_guard();
            worker.run().await;
        });

        tracing::info!(check = %probe.name, interval = ?interval, "Health check started");
        probe
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Result of the most recently completed check, if any.
    pub fn latest(&self) -> Option<Arc<HealthCheckResult>> {
        self.latest.load_full()
    }

    /// Number of completed check invocations.
    pub fn check_count(&self) -> u64 {
        self.check_count.load(Ordering::Acquire)
    }

    pub fn status(&self) -> HealthStatus {
        self.latest
            .load()
            .as_ref()
            .map_or(HealthStatus::Unknown, |r| r.status)
    }

    pub fn is_healthy(&self) -> bool {
        self.status() == HealthStatus::Healthy
    }

    /// Signal the probe to exit once the current check (if any) completes.
    pub fn stop(&self) {
        if !self.token.is_cancelled() {
            self.token.cancel();
            tracing::info!(check = %self.name, "Health check stopping");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.finished.is_cancelled()
    }

    /// Resolves once the background task has exited.
    pub async fn stopped(&self) {
        self.finished.cancelled().await
    }
}

impl Drop for HealthProbe {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

struct Worker {
    name: String,
    interval: Duration,
    check: CheckFn,
    latest: Arc<ArcSwapOption<HealthCheckResult>>,
    check_count: Arc<AtomicU64>,
    token: CancellationToken,
}

impl Worker {
    async fn run(self) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let result = self.sample().await;
            match result.status {
                HealthStatus::Unhealthy => {
                    tracing::error!(check = %self.name, message = %result.message, "Health check failed")
                }
                HealthStatus::Degraded => {
                    tracing::warn!(check = %self.name, message = %result.message, "Health check degraded")
                }
                _ => {
                    tracing::debug!(check = %self.name, message = %result.message, "Health check passed")
                }
            }
            metrics::record_health_status(&self.name, result.status);
            self.latest.store(Some(Arc::new(result)));
            self.check_count.fetch_add(1, Ordering::Release);
        }

        tracing::info!(check = %self.name, "Health check stopped");
    }

    async fn sample(&self) -> HealthCheckResult {
        let run = AssertUnwindSafe(async { (self.check)().await });
        match run.catch_unwind().await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => {
                tracing::error!(check = %self.name, error = %err, "Health check error");
                HealthCheckResult::unhealthy(format!("Health check error: {err}"))
            }
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                tracing::error!(check = %self.name, panic = %reason, "Health check panicked");
                HealthCheckResult::unhealthy(format!("Health check panicked: {reason}"))
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
