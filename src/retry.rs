//! Retry logic for transient transfer failures
//!
//! Each attempt returns an explicit `Result`; the loop asks the error whether
//! it is [`IsRetryable`] instead of retrying everything. The delay starts at
//! `initial_delay`, is multiplied by `backoff_multiplier` after every failure
//! (1.0 gives a fixed delay) and is capped at `max_delay`, with optional jitter.
//!
//! # Example
//!
//! ```no_run
//! use tripdata_sync::retry::{IsRetryable, with_retry};
//! use tripdata_sync::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{:?}", self)
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() {
//! let config = RetryConfig::default();
//! let result = with_retry(&config, |_attempt| async { Ok::<_, MyError>(()) }, |_, _| {}).await;
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{AttemptError, StoreError, UploadError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, non-2xx responses, truncated bodies) return `true`.
/// Failures another attempt cannot fix (permission denied, disk full, access denied) return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for AttemptError {
    fn is_retryable(&self) -> bool {
        match self {
            // Everything on the source side is worth another attempt
            AttemptError::Status { .. }
            | AttemptError::Network(_)
            | AttemptError::Stalled(_)
            | AttemptError::EmptyBody => true,
            // Local writes only for kinds that can clear up on their own
            AttemptError::Staging(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::WouldBlock
            ),
        }
    }
}

impl IsRetryable for StoreError {
    fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Backend(_))
    }
}

impl IsRetryable for UploadError {
    fn is_retryable(&self) -> bool {
        match self {
            UploadError::ExistenceCheck { source, .. }
            | UploadError::DestinationWrite { source, .. } => source.is_retryable(),
            UploadError::ReadArtifact { .. } => false,
        }
    }
}

/// Final error of a retried operation
#[derive(Debug)]
pub struct RetryFailure<E> {
    /// Error returned by the last attempt
    pub error: E,
    /// Number of attempts made
    pub attempts: u32,
}

impl<E: IsRetryable> RetryFailure<E> {
    /// Whether the loop stopped because the attempt budget ran out
    ///
    /// `false` means the last error was not retryable.
    pub fn exhausted(&self) -> bool {
        self.error.is_retryable()
    }
}

/// Execute an async operation, retrying transient failures
///
/// `operation` receives the 1-based attempt number. `on_retry` is called with
/// the failed attempt number and its error right before the loop sleeps, so
/// callers can publish progress without re-implementing the retry decision.
///
/// Returns the value together with the attempt number that produced it, or a
/// [`RetryFailure`] once the budget is spent or a non-retryable error occurs.
pub async fn with_retry<F, Fut, T, E, R>(
    config: &RetryConfig,
    mut operation: F,
    mut on_retry: R,
) -> Result<(T, u32), RetryFailure<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
    R: FnMut(u32, &E),
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;
    let mut delay = config.initial_delay.min(config.max_delay);

    loop {
        match operation(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "Operation succeeded after retry");
                }
                return Ok((result, attempt));
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = max_attempts,
                    delay_ms = delay.as_millis(),
                    "Attempt failed, retrying"
                );
                on_retry(attempt, &e);

                let jittered_delay = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };
                tokio::time::sleep(jittered_delay).await;

                delay = next_delay(delay, config);
                attempt += 1;
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt,
                        "Operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::error!(
                        error = %e,
                        attempt = attempt,
                        "Operation failed with non-retryable error"
                    );
                }
                return Err(RetryFailure { error: e, attempts: attempt });
            }
        }
    }
}

/// Scale `delay` by the backoff multiplier, capped at `max_delay`
///
/// A product too large for a `Duration` saturates at the cap.
fn next_delay(delay: Duration, config: &RetryConfig) -> Duration {
    Duration::try_from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier)
        .map_or(config.max_delay, |d| d.min(config.max_delay))
}

/// Add random jitter to a delay to prevent thundering herd
///
/// The result lies between `delay` and `2 * delay`, or is `delay` itself when
/// doubling it would not fit in a `Duration`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::try_from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor)).unwrap_or(delay)
}
