//! Retrying upstream calls with exponential backoff.
//!
//! Only wrap operations that are safe to repeat. The executor re-invokes the
//! closure as-is and has no way to know whether a failed attempt had side
//! effects.

mod cancel;
mod executor;
mod policy;

pub use cancel::{Abort, CancelHandle, Cancellation};
pub use executor::{with_retry, with_retry_until, RetryError};
pub use policy::{calculate_backoff, RetryPolicy};

/// Errors that know whether a repeat attempt could succeed.
pub trait Retryable {
    /// Whether the failure is transient.
    fn is_retryable(&self) -> bool;
}

/// Classifier for [`with_retry`] that defers to [`Retryable`].
pub fn retryable<E: Retryable>(err: &E) -> bool {
    err.is_retryable()
}
