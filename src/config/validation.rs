//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (delays finite and non-negative, thresholds >= 1)
//! - Convert raw seconds into `Duration`
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Runs inside every builder's `build()`, so no unvalidated config exists

use std::time::Duration;

/// A single semantic violation in a configuration value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Name of the offending field as it appears in the config schema.
    pub field: &'static str,
    /// Human readable description of the violated bound.
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Lower bound applied to a number of seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Bound {
    /// `>= 0.0`
    NonNegative,
    /// `> 0.0`, and still non-zero once converted to a `Duration`
    Positive,
}

/// Collects violations while a builder converts its raw fields.
#[derive(Debug, Default)]
pub(crate) struct Checks {
    errors: Vec<ValidationError>,
}

impl Checks {
    /// Check an integer count against a minimum and narrow it to `u32`.
    pub(crate) fn count(&mut self, field: &'static str, value: i64, min: i64) -> u32 {
        if value < min {
            let message = if min == 0 {
                "must be a non-negative integer".to_string()
            } else {
                format!("must be an integer >= {min}")
            };
            self.errors.push(ValidationError::new(field, message));
            return 0;
        }
        match u32::try_from(value) {
            Ok(v) => v,
            Err(_) => {
                self.errors
                    .push(ValidationError::new(field, format!("must be <= {}", u32::MAX)));
                0
            }
        }
    }

    /// Check a number of seconds and convert it to a `Duration`.
    pub(crate) fn seconds(&mut self, field: &'static str, value: f64, bound: Bound) -> Duration {
        if !value.is_finite() {
            self.errors
                .push(ValidationError::new(field, "must be a finite number of seconds"));
            return Duration::ZERO;
        }
        match bound {
            Bound::NonNegative if value < 0.0 => {
                self.errors.push(ValidationError::new(field, "must be non-negative"));
                return Duration::ZERO;
            }
            Bound::Positive if value <= 0.0 => {
                self.errors.push(ValidationError::new(field, "must be positive"));
                return Duration::ZERO;
            }
            _ => {}
        }
        match Duration::try_from_secs_f64(value) {
            Ok(d) if bound == Bound::Positive && d.is_zero() => {
                self.errors
                    .push(ValidationError::new(field, "must be at least one nanosecond"));
                Duration::ZERO
            }
            Ok(d) => d,
            Err(_) => {
                self.errors.push(ValidationError::new(field, "is out of range"));
                Duration::ZERO
            }
        }
    }

    /// Check a plain number is finite and strictly greater than `min`.
    pub(crate) fn greater_than(&mut self, field: &'static str, value: f64, min: f64) -> f64 {
        if !value.is_finite() || value <= min {
            self.errors
                .push(ValidationError::new(field, format!("must be a finite number > {min}")));
        }
        value
    }

    pub(crate) fn finish(self) -> Result<(), Vec<ValidationError>> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }
}
