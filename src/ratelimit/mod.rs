//! Per-client rate limiting.
//!
//! Only the log-based sliding window is implemented. A counter that is reset
//! on a timer tick would be cheaper, but it admits up to twice the budget
//! around a reset boundary, so it is not offered here.

mod limiter;
mod log;

pub use limiter::{SlidingWindowLimiter, DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW};
pub use log::RequestLog;
