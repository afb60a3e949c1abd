//! Tollgate - guarding calls to flaky upstream services
//!
//! This crate provides the three primitives that sit in front of expensive,
//! rate-limited upstream APIs: a per-client sliding-window rate limiter, a
//! retry executor with capped exponential backoff, and an in-process TTL
//! cache. The [`guard`] module chains them, and the [`nickname`] and
//! [`gallery`] services show them guarding real upstream contracts.

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod gallery;
pub mod guard;
pub mod nickname;
pub mod ratelimit;
pub mod retry;
pub mod sweep;
pub mod upstream;

pub use cache::{CacheRegistry, TtlCache};
pub use config::TollgateConfig;
pub use error::{Result, TollgateError};
pub use guard::{Guard, GuardError, Guarded};
pub use ratelimit::SlidingWindowLimiter;
pub use retry::{calculate_backoff, with_retry, with_retry_until, Cancellation, RetryError, RetryPolicy};
