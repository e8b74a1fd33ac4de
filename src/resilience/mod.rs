//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to a dependency:
//!     → circuit_breaker.rs (fail fast while the dependency is known bad)
//!     → On failure: classify.rs (is this error counted / retryable?)
//!     → retries.rs (re-invoke after backoff.rs delay, until attempts run out)
//! ```
//!
//! # Design Decisions
//! - Retry wraps the breaker, never the other way round, so rejected calls
//!   are retried only when the caller opts in
//! - Error filtering is explicit; the default counts every error
//! - Blocking and async forms share one decision path

pub mod backoff;
pub mod circuit_breaker;
pub mod classify;
pub mod retries;

pub use backoff::calculate_backoff;
pub use circuit_breaker::{CallError, CircuitBreaker, CircuitOpenError, CircuitState, CircuitStats};
pub use classify::{Classify, ErrorFilter};
pub use retries::{RetryError, RetryExecutor};
