//! Health check registry.
//!
//! # Responsibilities
//! - Own named probes (one background task each)
//! - Aggregate the latest results into a point-in-time report
//! - Stop probes on removal, replacement or shutdown
//!
//! # Data Flow
//! ```text
//! add_health_check(name, check, interval)
//!     → HealthProbe::spawn (child cancellation token)
//!     → probe publishes results independently
//!
//! get_health_status()
//!     → read each probe's last completed result
//!     → overall = worst sampled status (unknown if nothing has sampled)
//! ```
//!
//! # Design Decisions
//! - Constructed explicitly and shared by reference; there is no global registry
//! - Snapshot reads never block probe writers

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::health::probe::{async_check, blocking_check, CheckFn, HealthProbe};
use crate::health::state::{unix_seconds, unix_seconds_opt, HealthCheckResult, HealthStatus};
use crate::BoxError;

/// Errors from registering a health check.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("health check '{name}': interval must be positive")]
    InvalidInterval { name: String },

    #[error("health check '{name}': no Tokio runtime available to run the probe")]
    NoRuntime { name: String },
}

/// Latest state of one registered check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckReport {
    pub status: HealthStatus,
    pub message: String,
    #[serde(serialize_with = "unix_seconds_opt")]
    pub last_checked: Option<SystemTime>,
    pub details: Map<String, Value>,
    pub check_count: u64,
    pub interval_secs: f64,
}

impl CheckReport {
    fn from_probe(probe: &HealthProbe) -> Self {
        let check_count = probe.check_count();
        let interval_secs = probe.interval().as_secs_f64();
        match probe.latest() {
            Some(result) => Self {
                status: result.status,
                message: result.message.clone(),
                last_checked: Some(result.timestamp),
                details: result.details.clone(),
                check_count,
                interval_secs,
            },
            None => Self {
                status: HealthStatus::Unknown,
                message: "No health check result available".to_string(),
                last_checked: None,
                details: Map::new(),
                check_count,
                interval_secs,
            },
        }
    }
}

/// Point-in-time aggregate over every registered check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub overall: HealthStatus,
    pub checks: BTreeMap<String, CheckReport>,
    #[serde(serialize_with = "unix_seconds")]
    pub timestamp: SystemTime,
}

impl HealthReport {
    /// Names of the checks whose latest result is UNHEALTHY.
    pub fn failing_checks(&self) -> Vec<&str> {
        self.checks
            .iter()
            .filter(|(_, c)| c.status == HealthStatus::Unhealthy)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn is_healthy(&self) -> bool {
        self.overall == HealthStatus::Healthy
    }
}

/// Named collection of background health probes.
#[derive(Debug)]
pub struct HealthCheckRegistry {
    probes: DashMap<String, Arc<HealthProbe>>,
    token: CancellationToken,
}

impl HealthCheckRegistry {
    pub fn new() -> Self {
        Self {
            probes: DashMap::new(),
            token: CancellationToken::new(),
        }
    }

    /// Register an async check run every `interval`, replacing any check
    /// already registered under `name`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn add_health_check<F, Fut>(
        &self,
        name: impl Into<String>,
        check: F,
        interval: Duration,
    ) -> Result<(), RegistryError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HealthCheckResult, BoxError>> + Send + 'static,
    {
        self.register(name.into(), async_check(check), interval)
    }

    /// Register a blocking check; each run executes on the blocking pool.
    pub fn add_blocking_health_check<F>(
        &self,
        name: impl Into<String>,
        check: F,
        interval: Duration,
    ) -> Result<(), RegistryError>
    where
        F: Fn() -> Result<HealthCheckResult, BoxError> + Send + Sync + 'static,
    {
        self.register(name.into(), blocking_check(check), interval)
    }

    fn register(&self, name: String, check: CheckFn, interval: Duration) -> Result<(), RegistryError> {
        if interval.is_zero() {
            return Err(RegistryError::InvalidInterval { name });
        }
        let Ok(handle) = Handle::try_current() else {
            return Err(RegistryError::NoRuntime { name });
        };

        let probe = HealthProbe::spawn(&handle, name.clone(), check, interval, self.token.child_token());
        if let Some(previous) = self.probes.insert(name.clone(), Arc::new(probe)) {
            previous.stop();
            tracing::warn!(check = %name, "Health check already existed, replaced");
        }
        Ok(())
    }

    /// Stop and discard the named check. Returns false if it was not registered.
    pub fn remove_health_check(&self, name: &str) -> bool {
        match self.probes.remove(name) {
            Some((_, probe)) => {
                probe.stop();
                tracing::info!(check = %name, "Health check removed");
                true
            }
            None => false,
        }
    }

    /// Stop and discard every check.
    pub fn stop_all(&self) {
        let count = self.probes.len();
        for entry in self.probes.iter() {
            entry.value().stop();
        }
        self.probes.clear();
        tracing::info!(count, "All health checks stopped");
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.probes.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Handle to the named probe. The probe keeps running until removed,
    /// replaced or the registry is dropped, even while a handle is held.
    pub fn probe(&self, name: &str) -> Option<Arc<HealthProbe>> {
        self.probes.get(name).map(|p| Arc::clone(p.value()))
    }

    pub fn get_check(&self, name: &str) -> Option<CheckReport> {
        self.probes.get(name).map(|p| CheckReport::from_probe(p.value()))
    }

    /// Snapshot of every check. Never changes probe state.
    ///
    /// The overall status is the worst sampled status. It is `Unknown` only
    /// while no registered check has completed a run, and `Healthy` for an
    /// empty registry.
    pub fn get_health_status(&self) -> HealthReport {
        let checks: BTreeMap<String, CheckReport> = self
            .probes
            .iter()
            .map(|e| (e.key().clone(), CheckReport::from_probe(e.value())))
            .collect();
        let overall = checks
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);

        HealthReport {
            overall,
            checks,
            timestamp: SystemTime::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.get_health_status().is_healthy()
    }
}

impl Default for HealthCheckRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for HealthCheckRegistry {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time;

    fn fixed(result: HealthCheckResult) -> impl Fn() -> std::future::Ready<Result<HealthCheckResult, BoxError>> {
        move || std::future::ready(Ok(result.clone()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_overall_is_worst_status() {
        let registry = HealthCheckRegistry::new();
        registry
            .add_health_check("api", fixed(HealthCheckResult::healthy("ok")), Duration::from_secs(5))
            .unwrap();
        registry
            .add_health_check("queue", fixed(HealthCheckResult::degraded("backlog")), Duration::from_secs(5))
            .unwrap();
        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(registry.get_health_status().overall, HealthStatus::Degraded);
        assert!(!registry.is_healthy());

        registry
            .add_health_check("db", fixed(HealthCheckResult::unhealthy("down")), Duration::from_secs(5))
            .unwrap();
        time::sleep(Duration::from_millis(10)).await;
        let report = registry.get_health_status();
        assert_eq!(report.overall, HealthStatus::Unhealthy);
        assert_eq!(report.failing_checks(), vec!["db"]);

        assert!(registry.remove_health_check("db"));
        assert!(!registry.remove_health_check("db"));
        assert_eq!(registry.get_health_status().overall, HealthStatus::Degraded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overall_unknown_until_a_check_completes() {
        let registry = HealthCheckRegistry::new();
        assert_eq!(registry.get_health_status().overall, HealthStatus::Healthy);

        registry
            .add_health_check(
                "never-finishes",
                || std::future::pending::<Result<HealthCheckResult, BoxError>>(),
                Duration::from_secs(5),
            )
            .unwrap();
        time::sleep(Duration::from_millis(10)).await;

        let report = registry.get_health_status();
        assert_eq!(report.overall, HealthStatus::Unknown);
        assert!(!report.is_healthy());
        assert!(!registry.is_healthy());
        let row = &report.checks["never-finishes"];
        assert_eq!(row.status, HealthStatus::Unknown);
        assert_eq!(row.last_checked, None);
        assert_eq!(row.check_count, 0);

        registry
            .add_health_check("api", fixed(HealthCheckResult::healthy("ok")), Duration::from_secs(5))
            .unwrap();
        time::sleep(Duration::from_millis(10)).await;

        let report = registry.get_health_status();
        assert_eq!(report.overall, HealthStatus::Healthy);
        assert_eq!(report.checks["never-finishes"].status, HealthStatus::Unknown);
        assert!(registry.is_healthy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_readding_replaces_existing_check() {
        let registry = HealthCheckRegistry::new();
        registry
            .add_health_check("api", fixed(HealthCheckResult::unhealthy("down")), Duration::from_secs(5))
            .unwrap();
        registry
            .add_health_check("api", fixed(HealthCheckResult::healthy("up")), Duration::from_secs(5))
            .unwrap();
        time::sleep(Duration::from_secs(12)).await;

        assert_eq!(registry.len(), 1);
        let row = registry.get_check("api").unwrap();
        assert_eq!(row.status, HealthStatus::Healthy);
        assert_eq!(row.message, "up");
        assert_eq!(row.check_count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_health_status_is_read_only() {
        let registry = HealthCheckRegistry::new();
        registry
            .add_health_check("api", fixed(HealthCheckResult::healthy("ok")), Duration::from_secs(60))
            .unwrap();
        time::sleep(Duration::from_millis(10)).await;

        let first = registry.get_health_status();
        let second = registry.get_health_status();
        assert_eq!(first.overall, second.overall);
        assert_eq!(first.checks, second.checks);
        assert_eq!(registry.get_check("api").unwrap().check_count, 1);
    }

    #[tokio::test]
    async fn test_invalid_interval_rejected() {
        let registry = HealthCheckRegistry::new();
        let err = registry
            .add_health_check("api", fixed(HealthCheckResult::healthy("ok")), Duration::ZERO)
            .unwrap_err();
        assert_eq!(err, RegistryError::InvalidInterval { name: "api".into() });
        assert!(registry.is_empty());
    }

    #[test]
    fn test_registration_outside_runtime_fails() {
        let registry = HealthCheckRegistry::new();
        let err = registry
            .add_blocking_health_check("disk", || Ok(HealthCheckResult::healthy("ok")), Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, RegistryError::NoRuntime { .. }));
    }

    #[tokio::test]
    async fn test_stop_all_clears_registry() {
        let registry = HealthCheckRegistry::new();
        for name in ["a", "b", "c"] {
            registry
                .add_health_check(name, fixed(HealthCheckResult::healthy("ok")), Duration::from_millis(10))
                .unwrap();
        }
        assert_eq!(registry.names(), vec!["a", "b", "c"]);
        registry.stop_all();
        assert!(registry.is_empty());
        assert_eq!(registry.get_health_status().checks.len(), 0);
    }

    #[tokio::test]
    async fn test_removed_probe_handle_observes_stop() {
        let registry = HealthCheckRegistry::new();
        registry
            .add_health_check("api", fixed(HealthCheckResult::healthy("ok")), Duration::from_millis(10))
            .unwrap();
        let probe = registry.probe("api").unwrap();
        assert_eq!(probe.name(), "api");

        assert!(registry.remove_health_check("api"));
        time::timeout(Duration::from_secs(1), probe.stopped())
            .await
            .unwrap();
        assert!(probe.is_stopped());
        assert!(registry.probe("api").is_none());
    }

    #[test]
    fn test_report_serializes() {
        let report = HealthReport {
            overall: HealthStatus::Degraded,
            checks: BTreeMap::new(),
            timestamp: SystemTime::UNIX_EPOCH + Duration::from_secs(10),
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["overall"], "degraded");
        assert_eq!(json["timestamp"], 10.0);
    }
}
