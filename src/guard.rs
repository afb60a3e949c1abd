//! Guarded upstream calls.
//!
//! A [`Guard`] chains the three primitives in front of an expensive upstream
//! operation:
//!
//! ```text
//! admit(client) ── denied ──▶ RateLimited
//!      │
//!      ▼
//! cache.get(key) ── hit ──▶ value (cached)
//!      │ miss
//!      ▼
//! with_retry_until(op) ── error ──▶ Upstream / Cancelled / DeadlineExceeded
//!      │ ok
//!      ▼
//! cache.set(key, value) ──▶ value (fresh)
//! ```
//!
//! Multi-step flows can use the individual stages ([`Guard::admit`],
//! [`Guard::cache`], [`Guard::retry`]) directly.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, trace};

use crate::cache::TtlCache;
use crate::ratelimit::SlidingWindowLimiter;
use crate::retry::{retryable, with_retry_until, Cancellation, RetryError, RetryPolicy, Retryable};
use crate::upstream::UpstreamError;

/// Failure of a guarded call.
#[derive(Debug, Error)]
pub enum GuardError<E> {
    /// The client used up its request budget
    #[error("rate limit exceeded")]
    RateLimited { retry_after: Option<Duration> },

    /// The upstream failed and retrying did not help
    #[error(transparent)]
    Upstream(E),

    /// The caller cancelled the request
    #[error("request cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32, last_error: Option<E> },

    /// The caller's deadline passed
    #[error("request deadline exceeded after {attempts} attempt(s)")]
    DeadlineExceeded { attempts: u32, last_error: Option<E> },
}

impl<E> From<RetryError<E>> for GuardError<E> {
    fn from(err: RetryError<E>) -> Self {
        match err {
            RetryError::Operation(err) => GuardError::Upstream(err),
            RetryError::Cancelled { attempts, last_error } => GuardError::Cancelled { attempts, last_error },
            RetryError::DeadlineExceeded { attempts, last_error } => {
                GuardError::DeadlineExceeded { attempts, last_error }
            }
        }
    }
}

impl GuardError<UpstreamError> {
    /// HTTP status a caller would answer with.
    ///
    /// Upstream statuses pass through; transport failures and empty
    /// responses become 500.
    pub fn status_code(&self) -> u16 {
        match self {
            GuardError::RateLimited { .. } => 429,
            GuardError::Upstream(err) => err.http_status().unwrap_or(500),
            GuardError::Cancelled { .. } => 499,
            GuardError::DeadlineExceeded { .. } => 408,
        }
    }
}

/// A value produced by a guarded call.
#[derive(Debug, Clone, PartialEq)]
pub struct Guarded<V> {
    pub value: V,
    /// Whether the value came from the cache
    pub cached: bool,
}

/// Rate limiting, caching and retrying around upstream operations.
///
/// The limiter is shared (`Arc`) because one client budget usually covers
/// several guarded endpoints; the cache handle is already shared storage.
pub struct Guard<V> {
    limiter: Arc<SlidingWindowLimiter>,
    cache: TtlCache<V>,
    policy: RetryPolicy,
}

impl<V> Clone for Guard<V> {
    fn clone(&self) -> Self {
        Self {
            limiter: self.limiter.clone(),
            cache: self.cache.clone(),
            policy: self.policy.clone(),
        }
    }
}

impl<V: Clone> Guard<V> {
    /// Create a guard from its three parts.
    pub fn new(limiter: Arc<SlidingWindowLimiter>, cache: TtlCache<V>, policy: RetryPolicy) -> Self {
        Self { limiter, cache, policy }
    }

    /// Check the client's budget, recording the request if admitted.
    pub fn admit<E>(&self, client_key: &str) -> Result<(), GuardError<E>> {
        if self.limiter.admit(client_key) {
            Ok(())
        } else {
            Err(GuardError::RateLimited {
                retry_after: self.limiter.retry_after(client_key),
            })
        }
    }

    /// Run `operation` with this guard's retry policy.
    ///
    /// Errors are classified through [`Retryable`].
    pub async fn retry<T, E, F, Fut>(&self, cancellation: &Cancellation, operation: F) -> Result<T, GuardError<E>>
    where
        E: Retryable + Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        with_retry_until(&self.policy, retryable::<E>, cancellation, operation)
            .await
            .map_err(GuardError::from)
    }

    /// Admit, consult the cache, and on a miss run `operation` with retries
    /// and cache its result under `cache_key`.
    ///
    /// Failures are never cached.
    pub async fn call<E, F, Fut>(
        &self,
        client_key: &str,
        cache_key: &str,
        cancellation: &Cancellation,
        operation: F,
    ) -> Result<Guarded<V>, GuardError<E>>
    where
        E: Retryable + Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        self.admit(client_key)?;

        if let Some(value) = self.cache.get(cache_key) {
            trace!(client = %client_key, key = %cache_key, "Serving cached upstream result");
            return Ok(Guarded { value, cached: true });
        }

        let value = self.retry(cancellation, operation).await?;
        self.cache.set(cache_key, value.clone());
        debug!(client = %client_key, key = %cache_key, "Cached upstream result");

        Ok(Guarded { value, cached: false })
    }

    /// Admit and run `operation` with retries, without caching.
    pub async fn call_uncached<T, E, F, Fut>(
        &self,
        client_key: &str,
        cancellation: &Cancellation,
        operation: F,
    ) -> Result<T, GuardError<E>>
    where
        E: Retryable + Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.admit(client_key)?;
        self.retry(cancellation, operation).await
    }

    /// The result cache.
    pub fn cache(&self) -> &TtlCache<V> {
        &self.cache
    }

    /// The rate limiter.
    pub fn limiter(&self) -> &Arc<SlidingWindowLimiter> {
        &self.limiter
    }

    /// The retry policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::clock::ManualClock;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(4), 2.0)
    }

    fn guard(max_requests: usize) -> (Guard<String>, ManualClock) {
        let clock = ManualClock::new();
        let limiter = Arc::new(SlidingWindowLimiter::with_clock(
            Duration::from_secs(60),
            max_requests,
            Arc::new(clock.clone()),
        ));
        let cache = TtlCache::with_clock(Duration::from_secs(300), Arc::new(clock.clone()));
        (Guard::new(limiter, cache, fast_policy()), clock)
    }

    fn counting_ok(calls: &Arc<AtomicU32>) -> impl FnMut() -> futures::future::Ready<Result<String, UpstreamError>> {
        let calls = calls.clone();
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            futures::future::ready(Ok(format!("result-{}", n)))
        }
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let (guard, _clock) = guard(10);
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = Cancellation::none();

        let first = guard.call("ip1", "nickname:a", &cancel, counting_ok(&calls)).await.unwrap();
        assert_eq!(first, Guarded { value: "result-1".to_string(), cached: false });

        let second = guard.call("ip1", "nickname:a", &cancel, counting_ok(&calls)).await.unwrap();
        assert_eq!(second, Guarded { value: "result-1".to_string(), cached: true });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cache_expiry_triggers_new_call() {
        let (guard, clock) = guard(10);
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = Cancellation::none();

        guard.call("ip1", "k", &cancel, counting_ok(&calls)).await.unwrap();
        clock.advance(Duration::from_secs(300));

        let again = guard.call("ip1", "k", &cancel, counting_ok(&calls)).await.unwrap();
        assert!(!again.cached);
        assert_eq!(again.value, "result-2");
    }

    #[tokio::test]
    async fn test_rate_limit_applies_before_cache() {
        let (guard, _clock) = guard(1);
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = Cancellation::none();

        guard.call("ip1", "k", &cancel, counting_ok(&calls)).await.unwrap();
        let err = guard.call("ip1", "k", &cancel, counting_ok(&calls)).await.unwrap_err();

        assert_eq!(err.status_code(), 429);
        match err {
            GuardError::RateLimited { retry_after } => assert_eq!(retry_after, Some(Duration::from_secs(60))),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried_and_cached() {
        let (guard, _clock) = guard(10);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let cancel = Cancellation::none();

        let result = guard
            .call("ip1", "k", &cancel, move || {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(UpstreamError::status("llm", 503, "unavailable"))
                    } else {
                        Ok("done".to_string())
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result.value, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(guard.cache().get("k"), Some("done".to_string()));
    }

    #[tokio::test]
    async fn test_non_retryable_error_is_returned_unchanged_and_not_cached() {
        let (guard, _clock) = guard(10);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let cancel = Cancellation::none();

        let err = guard
            .call("ip1", "k", &cancel, move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<String, _>(UpstreamError::status("llm", 401, "bad key")) }
            })
            .await
            .unwrap_err();

        match &err {
            GuardError::Upstream(inner) => assert_eq!(inner, &UpstreamError::status("llm", 401, "bad key")),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(err.status_code(), 401);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(guard.cache().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_call() {
        let (guard, _clock) = guard(10);
        let (handle, cancel) = Cancellation::pair();
        handle.cancel();

        let err = guard
            .call_uncached("ip1", &cancel, || async { Ok::<_, UpstreamError>(1u32) })
            .await
            .unwrap_err();

        assert!(matches!(err, GuardError::Cancelled { attempts: 0, .. }));
        assert_eq!(err.status_code(), 499);
    }

    #[tokio::test]
    async fn test_deadline_status() {
        let err: GuardError<UpstreamError> = GuardError::DeadlineExceeded { attempts: 2, last_error: None };
        assert_eq!(err.status_code(), 408);

        let err: GuardError<UpstreamError> =
            GuardError::Upstream(UpstreamError::network("store", "ECONNRESET", "reset"));
        assert_eq!(err.status_code(), 500);
    }
}
