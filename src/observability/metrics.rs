//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define resilience metrics (retry outcomes, breaker state, probe health)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `resilience_retry_attempts_total` (counter): attempts by outcome
//! - `resilience_circuit_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `resilience_circuit_rejections_total` (counter): fast-failed calls per circuit
//! - `resilience_health_status` (gauge): 0=unknown, 1=healthy, 2=degraded, 3=unhealthy
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed, so library users
//!   pay nothing unless they call [`init_metrics`]
//! - Labels are the circuit or check name, never per-call values

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::health::HealthStatus;
use crate::resilience::CircuitState;

/// Error type for metrics operations.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Failed to install the Prometheus exporter.
    #[error("metrics installation error: {0}")]
    Installation(String),
}

/// Install the Prometheus exporter and serve `/metrics` on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), MetricsError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| MetricsError::Installation(e.to_string()))?;

    tracing::info!(address = %addr, "Prometheus metrics exporter started");
    Ok(())
}

/// Record one retry executor attempt outcome
/// (`success`, `retry`, `exhausted`, `non_retryable`, `cancelled`).
pub fn record_retry_attempt(outcome: &'static str) {
    counter!("resilience_retry_attempts_total", "outcome" => outcome).increment(1);
}

pub fn record_circuit_state(circuit: &str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };
    gauge!("resilience_circuit_state", "circuit" => circuit.to_string()).set(value);
}

pub fn record_circuit_rejection(circuit: &str) {
    counter!("resilience_circuit_rejections_total", "circuit" => circuit.to_string()).increment(1);
}

pub fn record_health_status(check: &str, status: HealthStatus) {
    let value = match status {
        HealthStatus::Unknown => 0.0,
        HealthStatus::Healthy => 1.0,
        HealthStatus::Degraded => 2.0,
        HealthStatus::Unhealthy => 3.0,
    };
    gauge!("resilience_health_status", "check" => check.to_string()).set(value);
}
