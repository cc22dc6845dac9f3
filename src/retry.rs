//! Bounded retry with backoff
//!
//! This module wraps any async operation in a retry loop driven by a
//! [`RetryConfig`]. Whether a failure is worth retrying is decided by the
//! caller, either with an explicit classifier ([`with_retry`]) or through the
//! [`IsRetryable`] trait ([`retry_retryable`]). Nothing in here knows about
//! networks or data sources.
//!
//! # Example
//!
//! ```no_run
//! use energy_ingest::retry::{IsRetryable, retry_retryable};
//! use energy_ingest::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{self:?}")
//!     }
//! }
//!
//! impl std::error::Error for MyError {}
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RetryConfig::default();
//! let value = retry_retryable(&config, || async {
//!     // Your operation here
//!     Ok::<_, MyError>(42)
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{RetryError, SourceError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, throttling, server errors) should return `true`.
/// Permanent failures (bad request, unusable payload) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for SourceError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }
}

/// Execute an async operation, retrying failures that `is_transient` accepts
///
/// At most `config.max_attempts` calls are made (a value of 0 still makes one
/// call). Between calls the task sleeps for `config.delay_for(retry)`, plus
/// jitter when enabled.
///
/// # Returns
///
/// The first successful result, [`RetryError::Permanent`] as soon as a
/// failure is not transient, or [`RetryError::Exhausted`] with the last error
/// once every attempt failed transiently.
pub async fn with_retry<F, Fut, T, E, C>(
    config: &RetryConfig,
    is_transient: C,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::error::Error + 'static,
    C: Fn(&E) -> bool,
{
    let max_attempts = config.attempts();
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if !is_transient(&e) => {
                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    "Operation failed with non-retryable error"
                );
                return Err(RetryError::Permanent(e));
            }
            Err(e) if attempt >= max_attempts => {
                tracing::warn!(
                    error = %e,
                    attempts = attempt,
                    "Operation failed after all retry attempts exhausted"
                );
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: e,
                });
            }
            Err(e) => {
                let delay = config.delay_for(attempt - 1);
                let delay = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };

                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = max_attempts,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// [`with_retry`] for error types that classify themselves
pub async fn retry_retryable<F, Fut, T, E>(
    config: &RetryConfig,
    operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::error::Error + 'static,
{
    with_retry(config, <E as IsRetryable>::is_retryable, operation).await
}

/// Add random jitter to a delay
///
/// Jitter is uniformly distributed between 0% and 100% of the delay, so the
/// actual delay lies between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    let jittered_secs = delay.as_secs_f64() * (1.0 + jitter_factor);
    Duration::from_secs_f64(jittered_secs)
}
