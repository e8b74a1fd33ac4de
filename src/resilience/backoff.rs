//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// Deterministic delay after the `failed_attempts`-th consecutive failure.
///
/// `min(max_delay, base_delay * exponential_base^(failed_attempts - 1))`, so the
/// wait before attempt 2 is `base_delay`, before attempt 3 is
/// `base_delay * exponential_base`, and so on.
pub fn calculate_backoff(
    failed_attempts: u32,
    base_delay: Duration,
    exponential_base: f64,
    max_delay: Duration,
) -> Duration {
    if failed_attempts == 0 || base_delay.is_zero() {
        return Duration::ZERO;
    }

    let exponent = i32::try_from(failed_attempts - 1).unwrap_or(i32::MAX);
    let delay_secs = base_delay.as_secs_f64() * exponential_base.powi(exponent);
    let max_secs = max_delay.as_secs_f64();

    // Overflow to infinity lands on the cap.
    if !delay_secs.is_finite() || delay_secs >= max_secs {
        return max_delay;
    }
    Duration::from_secs_f64(delay_secs.max(0.0))
}

/// Full jitter: a uniform draw from `[0, delay]`.
pub fn full_jitter(delay: Duration) -> Duration {
    if delay.is_zero() {
        return Duration::ZERO;
    }
    let secs = rand::thread_rng().gen_range(0.0..=delay.as_secs_f64());
    Duration::from_secs_f64(secs).min(delay)
}

/// The wait actually applied after `failed_attempts` failures under `config`.
pub fn backoff_for(config: &RetryConfig, failed_attempts: u32) -> Duration {
    let delay = calculate_backoff(
        failed_attempts,
        config.base_delay(),
        config.exponential_base(),
        config.max_delay(),
    );
    if config.jitter() {
        full_jitter(delay)
    } else {
        delay
    }
}
