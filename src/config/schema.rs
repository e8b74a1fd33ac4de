//! Configuration schema definitions.
//!
//! Every config type is immutable once built: fields are private, the only
//! way in is a builder whose `build()` runs the range checks from
//! `validation.rs`. Deserialization goes through the same builders, so a
//! config read from a file is validated exactly like one built in code.
//! Times are seconds (`f64`) on the wire and `Duration` in the API.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::loader::ConfigError;
use crate::config::validation::{Bound, Checks};

/// Top-level parameter bundle surfaced to integrators.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(try_from = "ResilienceConfigBuilder", into = "ResilienceConfigBuilder")]
pub struct ResilienceConfig {
    max_retries: u32,
    backoff_factor: f64,
    base_delay: Duration,
    health_check_interval: Duration,
    failure_threshold: u32,
    recovery_timeout: Duration,
    jitter: bool,
    max_delay: Duration,
}

impl ResilienceConfig {
    pub fn builder() -> ResilienceConfigBuilder {
        ResilienceConfigBuilder::default()
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn backoff_factor(&self) -> f64 {
        self.backoff_factor
    }

    pub fn health_check_interval(&self) -> Duration {
        self.health_check_interval
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    pub fn recovery_timeout(&self) -> Duration {
        self.recovery_timeout
    }

    pub fn jitter(&self) -> bool {
        self.jitter
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Retry parameters implied by this bundle.
    ///
    /// `max_retries` is the total attempt budget and `backoff_factor` the
    /// delay before the first retry, doubling afterwards.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retries,
            base_delay: self.base_delay,
            max_delay: self.max_delay,
            exponential_base: 2.0,
            jitter: self.jitter,
        }
    }

    /// Circuit breaker parameters implied by this bundle.
    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            recovery_timeout: self.recovery_timeout,
            ..CircuitBreakerConfig::default()
        }
    }
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_factor: 0.5,
            base_delay: Duration::from_millis(500),
            health_check_interval: Duration::from_secs(60),
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            jitter: true,
            max_delay: Duration::from_secs(300),
        }
    }
}

/// Raw, unvalidated form of [`ResilienceConfig`].
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResilienceConfigBuilder {
    max_retries: i64,
    backoff_factor: f64,
    health_check_interval: f64,
    failure_threshold: i64,
    recovery_timeout: f64,
    jitter: bool,
    max_delay: f64,
}

impl Default for ResilienceConfigBuilder {
    fn default() -> Self {
        ResilienceConfig::default().into()
    }
}

impl ResilienceConfigBuilder {
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.into();
        self
    }

    pub fn backoff_factor(mut self, secs: f64) -> Self {
        self.backoff_factor = secs;
        self
    }

    pub fn health_check_interval(mut self, secs: f64) -> Self {
        self.health_check_interval = secs;
        self
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.into();
        self
    }

    pub fn recovery_timeout(mut self, secs: f64) -> Self {
        self.recovery_timeout = secs;
        self
    }

    pub fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn max_delay(mut self, secs: f64) -> Self {
        self.max_delay = secs;
        self
    }

    pub fn build(self) -> Result<ResilienceConfig, ConfigError> {
        let mut checks = Checks::default();
        let max_retries = checks.count("max_retries", self.max_retries, 0);
        let base_delay = checks.seconds("backoff_factor", self.backoff_factor, Bound::NonNegative);
        let health_check_interval = checks.seconds(
            "health_check_interval",
            self.health_check_interval,
            Bound::Positive,
        );
        let failure_threshold = checks.count("failure_threshold", self.failure_threshold, 1);
        let recovery_timeout =
            checks.seconds("recovery_timeout", self.recovery_timeout, Bound::Positive);
        let max_delay = checks.seconds("max_delay", self.max_delay, Bound::Positive);
        checks.finish().map_err(ConfigError::Validation)?;

        Ok(ResilienceConfig {
            max_retries,
            backoff_factor: self.backoff_factor,
            base_delay,
            health_check_interval,
            failure_threshold,
            recovery_timeout,
            jitter: self.jitter,
            max_delay,
        })
    }
}

impl TryFrom<ResilienceConfigBuilder> for ResilienceConfig {
    type Error = ConfigError;

    fn try_from(builder: ResilienceConfigBuilder) -> Result<Self, Self::Error> {
        builder.build()
    }
}

impl From<ResilienceConfig> for ResilienceConfigBuilder {
    fn from(config: ResilienceConfig) -> Self {
        Self {
            max_retries: config.max_retries.into(),
            backoff_factor: config.backoff_factor,
            health_check_interval: config.health_check_interval.as_secs_f64(),
            failure_threshold: config.failure_threshold.into(),
            recovery_timeout: config.recovery_timeout.as_secs_f64(),
            jitter: config.jitter,
            max_delay: config.max_delay.as_secs_f64(),
        }
    }
}

/// Parameters for the retry executor.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(try_from = "RetryConfigBuilder", into = "RetryConfigBuilder")]
pub struct RetryConfig {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    exponential_base: f64,
    jitter: bool,
}

impl RetryConfig {
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::default()
    }

    /// Total number of invocations, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Upper bound on any single backoff wait.
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn exponential_base(&self) -> f64 {
        self.exponential_base
    }

    pub fn jitter(&self) -> bool {
        self.jitter
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

/// Raw, unvalidated form of [`RetryConfig`].
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfigBuilder {
    max_attempts: i64,
    base_delay: f64,
    max_delay: f64,
    exponential_base: f64,
    jitter: bool,
}

impl Default for RetryConfigBuilder {
    fn default() -> Self {
        RetryConfig::default().into()
    }
}

impl RetryConfigBuilder {
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.into();
        self
    }

    pub fn base_delay(mut self, secs: f64) -> Self {
        self.base_delay = secs;
        self
    }

    pub fn max_delay(mut self, secs: f64) -> Self {
        self.max_delay = secs;
        self
    }

    pub fn exponential_base(mut self, base: f64) -> Self {
        self.exponential_base = base;
        self
    }

    pub fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn build(self) -> Result<RetryConfig, ConfigError> {
        let mut checks = Checks::default();
        let max_attempts = checks.count("max_attempts", self.max_attempts, 0);
        let base_delay = checks.seconds("base_delay", self.base_delay, Bound::NonNegative);
        let max_delay = checks.seconds("max_delay", self.max_delay, Bound::Positive);
        let exponential_base = checks.greater_than("exponential_base", self.exponential_base, 1.0);
        checks.finish().map_err(ConfigError::Validation)?;

        Ok(RetryConfig {
            max_attempts,
            base_delay,
            max_delay,
            exponential_base,
            jitter: self.jitter,
        })
    }
}

impl TryFrom<RetryConfigBuilder> for RetryConfig {
    type Error = ConfigError;

    fn try_from(builder: RetryConfigBuilder) -> Result<Self, Self::Error> {
        builder.build()
    }
}

impl From<RetryConfig> for RetryConfigBuilder {
    fn from(config: RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.into(),
            base_delay: config.base_delay.as_secs_f64(),
            max_delay: config.max_delay.as_secs_f64(),
            exponential_base: config.exponential_base,
            jitter: config.jitter,
        }
    }
}

/// Parameters for a circuit breaker.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(
    try_from = "CircuitBreakerConfigBuilder",
    into = "CircuitBreakerConfigBuilder"
)]
pub struct CircuitBreakerConfig {
    failure_threshold: u32,
    recovery_timeout: Duration,
    monitor_interval: Duration,
}

impl CircuitBreakerConfig {
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::default()
    }

    /// Consecutive counted failures that open the circuit.
    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    /// Time spent open before a probe call is admitted.
    pub fn recovery_timeout(&self) -> Duration {
        self.recovery_timeout
    }

    /// Tick of the optional background monitor.
    pub fn monitor_interval(&self) -> Duration {
        self.monitor_interval
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            monitor_interval: Duration::from_secs(10),
        }
    }
}

/// Raw, unvalidated form of [`CircuitBreakerConfig`].
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CircuitBreakerConfigBuilder {
    failure_threshold: i64,
    recovery_timeout: f64,
    monitor_interval: f64,
}

impl Default for CircuitBreakerConfigBuilder {
    fn default() -> Self {
        CircuitBreakerConfig::default().into()
    }
}

impl CircuitBreakerConfigBuilder {
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.into();
        self
    }

    pub fn recovery_timeout(mut self, secs: f64) -> Self {
        self.recovery_timeout = secs;
        self
    }

    pub fn monitor_interval(mut self, secs: f64) -> Self {
        self.monitor_interval = secs;
        self
    }

    pub fn build(self) -> Result<CircuitBreakerConfig, ConfigError> {
        let mut checks = Checks::default();
        let failure_threshold = checks.count("failure_threshold", self.failure_threshold, 1);
        let recovery_timeout =
            checks.seconds("recovery_timeout", self.recovery_timeout, Bound::Positive);
        let monitor_interval =
            checks.seconds("monitor_interval", self.monitor_interval, Bound::Positive);
        checks.finish().map_err(ConfigError::Validation)?;

        Ok(CircuitBreakerConfig {
            failure_threshold,
            recovery_timeout,
            monitor_interval,
        })
    }
}

impl TryFrom<CircuitBreakerConfigBuilder> for CircuitBreakerConfig {
    type Error = ConfigError;

    fn try_from(builder: CircuitBreakerConfigBuilder) -> Result<Self, Self::Error> {
        builder.build()
    }
}

impl From<CircuitBreakerConfig> for CircuitBreakerConfigBuilder {
    fn from(config: CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.into(),
            recovery_timeout: config.recovery_timeout.as_secs_f64(),
            monitor_interval: config.monitor_interval.as_secs_f64(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invalid_fields(err: ConfigError) -> Vec<&'static str> {
        match err {
            ConfigError::Validation(errors) => errors.into_iter().map(|e| e.field).collect(),
            other => panic!("expected validation error, got {other}"),
        }
    }

    #[test]
    fn defaults_match_documented_schema() {
        let config = ResilienceConfig::builder().build().unwrap();
        assert_eq!(config, ResilienceConfig::default());
        assert_eq!(config.max_retries(), 3);
        assert_eq!(config.backoff_factor(), 0.5);
        assert_eq!(config.health_check_interval(), Duration::from_secs(60));
        assert_eq!(config.failure_threshold(), 5);
        assert_eq!(config.recovery_timeout(), Duration::from_secs(60));
        assert!(config.jitter());
        assert_eq!(config.max_delay(), Duration::from_secs(300));

        let retry = RetryConfig::default();
        assert_eq!(retry.max_attempts(), 3);
        assert_eq!(retry.base_delay(), Duration::from_secs(1));
        assert_eq!(retry.max_delay(), Duration::from_secs(60));
        assert_eq!(retry.exponential_base(), 2.0);
        assert!(retry.jitter());
    }

    #[test]
    fn out_of_bound_values_fail_at_build_time() {
        let err = ResilienceConfig::builder()
            .backoff_factor(-1.0)
            .health_check_interval(0.0)
            .failure_threshold(0)
            .recovery_timeout(-5.0)
            .max_delay(0.0)
            .build()
            .unwrap_err();
        let fields = invalid_fields(err);
        assert!(fields.contains(&"backoff_factor"));
        assert!(fields.contains(&"health_check_interval"));
        assert!(fields.contains(&"failure_threshold"));
        assert!(fields.contains(&"recovery_timeout"));
        assert!(fields.contains(&"max_delay"));
    }

    #[test]
    fn retry_config_bounds() {
        let err = RetryConfig::builder()
            .base_delay(-0.1)
            .max_delay(0.0)
            .exponential_base(1.0)
            .build()
            .unwrap_err();
        assert_eq!(
            invalid_fields(err),
            vec!["base_delay", "max_delay", "exponential_base"]
        );

        // Zero attempts is accepted here and rejected when executed.
        let zero = RetryConfig::builder().max_attempts(0).build().unwrap();
        assert_eq!(zero.max_attempts(), 0);
    }

    #[test]
    fn circuit_breaker_config_bounds() {
        let err = CircuitBreakerConfig::builder()
            .failure_threshold(0)
            .recovery_timeout(0.0)
            .monitor_interval(-1.0)
            .build()
            .unwrap_err();
        assert_eq!(
            invalid_fields(err),
            vec!["failure_threshold", "recovery_timeout", "monitor_interval"]
        );
    }

    #[test]
    fn sub_nanosecond_intervals_are_not_positive() {
        let err = CircuitBreakerConfig::builder()
            .recovery_timeout(1e-12)
            .monitor_interval(1e-12)
            .build()
            .unwrap_err();
        assert_eq!(invalid_fields(err), vec!["recovery_timeout", "monitor_interval"]);

        let err = ResilienceConfig::builder()
            .health_check_interval(1e-12)
            .build()
            .unwrap_err();
        assert_eq!(invalid_fields(err), vec!["health_check_interval"]);
    }

    #[test]
    fn derived_component_configs() {
        let config = ResilienceConfig::builder()
            .max_retries(4)
            .backoff_factor(0.25)
            .failure_threshold(2)
            .recovery_timeout(5.0)
            .jitter(false)
            .max_delay(10.0)
            .build()
            .unwrap();

        let retry = config.retry_config();
        assert_eq!(retry.max_attempts(), 4);
        assert_eq!(retry.base_delay(), Duration::from_millis(250));
        assert_eq!(retry.max_delay(), Duration::from_secs(10));
        assert_eq!(retry.exponential_base(), 2.0);
        assert!(!retry.jitter());

        let breaker = config.circuit_breaker_config();
        assert_eq!(breaker.failure_threshold(), 2);
        assert_eq!(breaker.recovery_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn deserialization_is_validated() {
        let ok: RetryConfig = serde_json::from_str(r#"{"max_attempts": 5, "jitter": false}"#).unwrap();
        assert_eq!(ok.max_attempts(), 5);
        assert!(!ok.jitter());
        assert_eq!(ok.base_delay(), Duration::from_secs(1));

        assert!(serde_json::from_str::<RetryConfig>(r#"{"max_attempts": -1}"#).is_err());
        assert!(serde_json::from_str::<CircuitBreakerConfig>(r#"{"recovery_timeout": 0}"#).is_err());
        assert!(serde_json::from_str::<RetryConfig>(r#"{"retries": 2}"#).is_err());
    }

    #[test]
    fn serializes_the_flat_schema() {
        let value = serde_json::to_value(ResilienceConfig::default()).unwrap();
        assert_eq!(value["max_retries"], 3);
        assert_eq!(value["backoff_factor"], 0.5);
        assert_eq!(value["max_delay"], 300.0);
        assert_eq!(value["jitter"], true);
    }
}
