//! Resilience Core Library
//!
//! Fault-tolerance primitives for calling unreliable dependencies:
//! bounded retries with exponential backoff, circuit breakers and a
//! background health-check registry. The three are independent and
//! compose at the call site.

pub mod config;
pub mod demo;
pub mod health;
pub mod observability;
pub mod resilience;

/// Error type returned by health check functions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub use config::{CircuitBreakerConfig, ConfigError, ResilienceConfig, RetryConfig};
pub use health::{HealthCheckRegistry, HealthCheckResult, HealthReport, HealthStatus};
pub use resilience::{
    CallError, CircuitBreaker, CircuitOpenError, CircuitState, Classify, ErrorFilter, RetryError,
    RetryExecutor,
};
