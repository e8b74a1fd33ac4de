//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};

use resilience_core::{CircuitBreakerConfig, Classify, RetryConfig};

/// Errors produced by the simulated dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum DependencyError {
    #[error("connection refused")]
    Refused,
    #[error("request timed out")]
    Timeout,
    #[error("invalid request")]
    Invalid,
}

impl Classify for DependencyError {
    type Kind = DependencyError;

    fn kind(&self) -> DependencyError {
        *self
    }
}

/// A dependency that fails with `error` for the first `failures` calls.
pub struct Dependency {
    failures: u32,
    error: DependencyError,
    calls: AtomicU32,
}

impl Dependency {
    pub fn failing_first(failures: u32, error: DependencyError) -> Self {
        Self {
            failures,
            error,
            calls: AtomicU32::new(0),
        }
    }

    pub fn always_failing(error: DependencyError) -> Self {
        Self::failing_first(u32::MAX, error)
    }

    pub fn call(&self) -> Result<u32, DependencyError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.failures {
            Err(self.error)
        } else {
            Ok(n)
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn retry_config(max_attempts: u32, base_delay: f64) -> RetryConfig {
    RetryConfig::builder()
        .max_attempts(max_attempts)
        .base_delay(base_delay)
        .jitter(false)
        .build()
        .unwrap()
}

pub fn breaker_config(failure_threshold: u32, recovery_timeout: f64) -> CircuitBreakerConfig {
    CircuitBreakerConfig::builder()
        .failure_threshold(failure_threshold)
        .recovery_timeout(recovery_timeout)
        .build()
        .unwrap()
}
