//! Per-client request log for the sliding-window limiter.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// The admitted request timestamps of a single client, oldest first.
///
/// A timestamp `t` is inside the window iff `now - t < window`. Timestamps
/// are appended in arrival order, so expired entries are always at the front.
#[derive(Debug, Default, Clone)]
pub struct RequestLog {
    timestamps: VecDeque<Instant>,
}

impl RequestLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every timestamp that has left the window.
    ///
    /// Returns the number of timestamps removed.
    pub fn prune(&mut self, now: Instant, window: Duration) -> usize {
        let before = self.timestamps.len();
        while let Some(&oldest) = self.timestamps.front() {
            if now.saturating_duration_since(oldest) < window {
                break;
            }
            self.timestamps.pop_front();
        }
        before - self.timestamps.len()
    }

    /// Record an admitted request.
    pub fn record(&mut self, now: Instant) {
        self.timestamps.push_back(now);
    }

    /// Number of timestamps inside the window, without pruning.
    pub fn count_within(&self, now: Instant, window: Duration) -> usize {
        self.timestamps
            .iter()
            .filter(|&&t| now.saturating_duration_since(t) < window)
            .count()
    }

    /// The oldest timestamp still inside the window.
    pub fn oldest_within(&self, now: Instant, window: Duration) -> Option<Instant> {
        self.timestamps
            .iter()
            .copied()
            .find(|&t| now.saturating_duration_since(t) < window)
    }

    /// Number of stored timestamps.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Whether the log holds no timestamps.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}
