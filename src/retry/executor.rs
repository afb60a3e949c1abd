//! Backoff retry executor.

use std::fmt::Display;
use std::future::Future;

use thiserror::Error;
use tracing::{debug, warn};

use super::cancel::{Abort, Cancellation};
use super::policy::RetryPolicy;

/// Failure of a retry sequence run under a [`Cancellation`].
///
/// `Operation` carries the operation's own error, untouched. The abort
/// variants report how many attempts were started and the last error seen
/// before the caller stopped the sequence.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The operation failed and was not retried further
    #[error(transparent)]
    Operation(E),

    /// The caller cancelled the sequence
    #[error("cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32, last_error: Option<E> },

    /// The caller's deadline passed
    #[error("deadline exceeded after {attempts} attempt(s)")]
    DeadlineExceeded { attempts: u32, last_error: Option<E> },
}

impl<E> RetryError<E> {
    fn aborted(abort: Abort, attempts: u32, last_error: Option<E>) -> Self {
        match abort {
            Abort::Cancelled => RetryError::Cancelled { attempts, last_error },
            Abort::DeadlineExceeded => RetryError::DeadlineExceeded { attempts, last_error },
        }
    }
}

/// Run `operation` until it succeeds, fails with an error `classify` rejects,
/// or the policy's attempts are used up.
///
/// The returned error is the operation's own last error.
pub async fn with_retry<T, E, C, F, Fut>(policy: &RetryPolicy, classify: C, mut operation: F) -> Result<T, E>
where
    E: Display,
    C: Fn(&E) -> bool,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.effective_attempts();
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= max_attempts || !classify(&err) {
                    log_final_failure(attempt, max_attempts, &err);
                    return Err(err);
                }

                let delay = policy.backoff(attempt);
                warn!(
                    attempt = attempt,
                    max_attempts = max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retryable upstream failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Like [`with_retry`], but stops as soon as `cancellation` fires.
///
/// The signal is checked before every attempt and before every sleep, and
/// both the attempt and the sleep are abandoned if it fires while they are
/// in progress. A deadline on the signal therefore bounds the whole
/// sequence.
pub async fn with_retry_until<T, E, C, F, Fut>(
    policy: &RetryPolicy,
    classify: C,
    cancellation: &Cancellation,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    E: Display,
    C: Fn(&E) -> bool,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.effective_attempts();
    let mut last_error: Option<E> = None;
    let mut attempt = 1;

    loop {
        if let Some(abort) = cancellation.check() {
            debug!(attempt = attempt, reason = ?abort, "Retry sequence stopped before attempt");
            return Err(RetryError::aborted(abort, attempt - 1, last_error));
        }

        let outcome = tokio::select! {
            biased;
            abort = cancellation.aborted() => Err(abort),
            result = operation() => Ok(result),
        };

        let err = match outcome {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => err,
            Err(abort) => {
                debug!(attempt = attempt, reason = ?abort, "Retry sequence stopped during attempt");
                return Err(RetryError::aborted(abort, attempt, last_error));
            }
        };

        if attempt >= max_attempts || !classify(&err) {
            log_final_failure(attempt, max_attempts, &err);
            return Err(RetryError::Operation(err));
        }

        if let Some(abort) = cancellation.check() {
            debug!(attempt = attempt, reason = ?abort, "Retry sequence stopped before backoff");
            return Err(RetryError::aborted(abort, attempt, Some(err)));
        }

        let delay = policy.backoff(attempt);
        warn!(
            attempt = attempt,
            max_attempts = max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Retryable upstream failure, backing off"
        );
        last_error = Some(err);

        tokio::select! {
            biased;
            abort = cancellation.aborted() => {
                debug!(attempt = attempt, reason = ?abort, "Retry sequence stopped during backoff");
                return Err(RetryError::aborted(abort, attempt, last_error));
            }
            _ = tokio::time::sleep(delay) => {}
        }

        attempt += 1;
    }
}

fn log_final_failure<E: Display>(attempt: u32, max_attempts: u32, err: &E) {
    if attempt >= max_attempts && max_attempts > 1 {
        debug!(attempts = attempt, error = %err, "Retry attempts exhausted");
    } else {
        debug!(attempt = attempt, error = %err, "Upstream failure is not retryable");
    }
}
