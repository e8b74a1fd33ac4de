//! Retry logic.
//!
//! # Responsibilities
//! - Re-invoke a fallible operation until success or the attempt budget is spent
//! - Wait between attempts according to `backoff.rs`
//! - Propagate non-retryable errors on first occurrence
//!
//! # Design Decisions
//! - Blocking and async variants share one failure-handling step; they only
//!   differ in how they wait
//! - Waits are interruptible through a `CancellationToken`; the operation
//!   itself is never interrupted
//! - The caller's error type is returned unchanged inside `RetryError`

use std::fmt;
use std::future::Future;
use std::thread;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;
use crate::observability::metrics;
use crate::resilience::backoff::backoff_for;
use crate::resilience::classify::ErrorFilter;

/// Granularity at which a blocking wait notices cancellation.
const CANCEL_POLL: Duration = Duration::from_millis(10);

/// Why a retried operation ultimately failed.
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error; `source` is the last one.
    Exhausted { attempts: u32, source: E },
    /// The operation failed with an error outside the retryable set.
    NonRetryable { attempt: u32, source: E },
    /// The caller cancelled while the executor was waiting to retry.
    Cancelled { attempts: u32, source: E },
    /// `max_attempts` is zero, so the operation was never invoked.
    ZeroAttempts,
}

impl<E> RetryError<E> {
    /// Number of times the operation was invoked.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } | RetryError::Cancelled { attempts, .. } => {
                *attempts
            }
            RetryError::NonRetryable { attempt, .. } => *attempt,
            RetryError::ZeroAttempts => 0,
        }
    }

    /// The operation's own error, if it was invoked at all.
    pub fn source_error(&self) -> Option<&E> {
        match self {
            RetryError::Exhausted { source, .. }
            | RetryError::NonRetryable { source, .. }
            | RetryError::Cancelled { source, .. } => Some(source),
            RetryError::ZeroAttempts => None,
        }
    }

    pub fn into_source(self) -> Option<E> {
        match self {
            RetryError::Exhausted { source, .. }
            | RetryError::NonRetryable { source, .. }
            | RetryError::Cancelled { source, .. } => Some(source),
            RetryError::ZeroAttempts => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Exhausted { attempts, source } => {
                write!(f, "operation failed after {attempts} attempts: {source}")
            }
            RetryError::NonRetryable { attempt, source } => {
                write!(f, "non-retryable error on attempt {attempt}: {source}")
            }
            RetryError::Cancelled { attempts, source } => {
                write!(f, "retry cancelled after {attempts} attempts: {source}")
            }
            RetryError::ZeroAttempts => {
                write!(f, "invalid retry configuration: max_attempts is 0")
            }
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source_error().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Outcome of handling one failed attempt.
enum Step<E> {
    Wait { delay: Duration, error: E },
    Fail(RetryError<E>),
}

/// Executes operations under a [`RetryConfig`].
///
/// Holds no mutable state, so one executor can be shared by any number of
/// callers and threads.
pub struct RetryExecutor<E> {
    config: RetryConfig,
    retry_on: ErrorFilter<E>,
}

impl<E> Clone for RetryExecutor<E> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            retry_on: self.retry_on.clone(),
        }
    }
}

impl<E> fmt::Debug for RetryExecutor<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("config", &self.config)
            .field("retry_on", &self.retry_on)
            .finish()
    }
}

impl<E> RetryExecutor<E> {
    /// Retry every error.
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            retry_on: ErrorFilter::any(),
        }
    }

    /// Restrict retries to errors matching `filter`; others propagate at once.
    pub fn retry_on(mut self, filter: ErrorFilter<E>) -> Self {
        self.retry_on = filter;
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Wait applied after `failed_attempts` failures (jittered if configured).
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        backoff_for(&self.config, failed_attempts)
    }
}

impl<E: fmt::Display> RetryExecutor<E> {
    /// Run `operation` on the current thread, sleeping between attempts.
    pub fn execute_blocking<T, F>(&self, operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Result<T, E>,
    {
        self.run_blocking(operation, None)
    }

    /// Like [`execute_blocking`](Self::execute_blocking), but a cancelled
    /// `token` ends any backoff wait early.
    pub fn execute_blocking_with_cancel<T, F>(
        &self,
        operation: F,
        token: &CancellationToken,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Result<T, E>,
    {
        self.run_blocking(operation, Some(token))
    }

    /// Run an async `operation`, suspending (not blocking) between attempts.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_async(operation, None).await
    }

    /// Like [`execute`](Self::execute), but a cancelled `token` ends any
    /// backoff wait early.
    pub async fn execute_with_cancel<T, F, Fut>(
        &self,
        operation: F,
        token: &CancellationToken,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_async(operation, Some(token)).await
    }

    /// Bind `operation` to this executor. Every invocation of the returned
    /// closure runs a fresh blocking retry loop.
    pub fn wrap<T, F>(self, operation: F) -> impl Fn() -> Result<T, RetryError<E>>
    where
        F: Fn() -> Result<T, E>,
    {
        move || self.execute_blocking(&operation)
    }

    fn run_blocking<T, F>(
        &self,
        mut operation: F,
        token: Option<&CancellationToken>,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Result<T, E>,
    {
        if self.config.max_attempts() == 0 {
            return Err(self.zero_attempts());
        }

        let mut failed = 0;
        loop {
            match operation() {
                Ok(value) => return Ok(self.succeeded(failed, value)),
                Err(error) => {
                    failed += 1;
                    match self.on_failure(failed, error) {
                        Step::Fail(err) => return Err(err),
                        Step::Wait { delay, error } => {
                            if !sleep_blocking(delay, token) {
                                return Err(self.cancelled(failed, error));
                            }
                        }
                    }
                }
            }
        }
    }

    async fn run_async<T, F, Fut>(
        &self,
        mut operation: F,
        token: Option<&CancellationToken>,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if self.config.max_attempts() == 0 {
            return Err(self.zero_attempts());
        }

        let mut failed = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(self.succeeded(failed, value)),
                Err(error) => {
                    failed += 1;
                    match self.on_failure(failed, error) {
                        Step::Fail(err) => return Err(err),
                        Step::Wait { delay, error } => match token {
                            Some(token) => {
                                tokio::select! {
                                    biased;
                                    _ = token.cancelled() => {
                                        return Err(self.cancelled(failed, error));
                                    }
                                    _ = tokio::time::sleep(delay) => {}
                                }
                            }
                            None => tokio::time::sleep(delay).await,
                        },
                    }
                }
            }
        }
    }

    fn on_failure(&self, failed: u32, error: E) -> Step<E> {
        let max_attempts = self.config.max_attempts();

        if !self.retry_on.matches(&error) {
            tracing::debug!(attempt = failed, error = %error, "Non-retryable error, propagating");
            metrics::record_retry_attempt("non_retryable");
            return Step::Fail(RetryError::NonRetryable {
                attempt: failed,
                source: error,
            });
        }

        if failed >= max_attempts {
            tracing::error!(attempts = failed, error = %error, "Retry budget exhausted");
            metrics::record_retry_attempt("exhausted");
            return Step::Fail(RetryError::Exhausted {
                attempts: failed,
                source: error,
            });
        }

        let delay = self.delay_for(failed);
        tracing::warn!(
            attempt = failed,
            max_attempts,
            delay = ?delay,
            error = %error,
            "Retryable failure, backing off"
        );
        metrics::record_retry_attempt("retry");
        Step::Wait { delay, error }
    }

    fn succeeded<T>(&self, failed: u32, value: T) -> T {
        if failed > 0 {
            tracing::info!(attempt = failed + 1, "Operation succeeded after retry");
        }
        metrics::record_retry_attempt("success");
        value
    }

    fn cancelled(&self, failed: u32, error: E) -> RetryError<E> {
        tracing::info!(attempts = failed, "Retry cancelled during backoff");
        metrics::record_retry_attempt("cancelled");
        RetryError::Cancelled {
            attempts: failed,
            source: error,
        }
    }

    fn zero_attempts(&self) -> RetryError<E> {
        tracing::error!("Retry executor configured with zero attempts");
        RetryError::ZeroAttempts
    }
}

/// Sleep for `delay`; returns false if `token` was cancelled first.
fn sleep_blocking(delay: Duration, token: Option<&CancellationToken>) -> bool {
    let Some(token) = token else {
        thread::sleep(delay);
        return true;
    };

    let deadline = Instant::now() + delay;
    loop {
        if token.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(CANCEL_POLL));
    }
}
