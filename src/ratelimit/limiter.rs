//! Sliding-window rate limiter.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::log::RequestLog;
use crate::clock::{Clock, SystemClock};
use crate::config::RateLimitingConfig;
use crate::sweep::Sweep;

/// Default window, matching a "100 requests per 15 minutes" budget.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(15 * 60);
/// Default number of requests admitted per window.
pub const DEFAULT_MAX_REQUESTS: usize = 100;

/// A per-client sliding-window rate limiter.
///
/// Every admitted request is logged with its timestamp. A new request from a
/// client is admitted iff fewer than `max_requests` of that client's
/// timestamps are younger than `window`. This is exact at window boundaries:
/// a client can never get more than `max_requests` admissions in any interval
/// of length `window`.
///
/// All state sits behind a single mutex, so the check-and-record for a key is
/// atomic and decisions for one key follow the order in which callers
/// acquire the lock.
pub struct SlidingWindowLimiter {
    /// Length of the trailing window
    window: Duration,
    /// Admissions allowed per client within one window
    max_requests: usize,
    /// Request logs indexed by client key
    clients: Mutex<HashMap<String, RequestLog>>,
    clock: Arc<dyn Clock>,
}

impl SlidingWindowLimiter {
    /// Create a limiter using the system clock.
    pub fn new(window: Duration, max_requests: usize) -> Self {
        Self::with_clock(window, max_requests, Arc::new(SystemClock))
    }

    /// Create a limiter reading time from `clock`.
    pub fn with_clock(window: Duration, max_requests: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            window,
            max_requests,
            clients: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Create a limiter from the `rate_limiting` configuration section.
    pub fn from_config(config: &RateLimitingConfig) -> Self {
        Self::new(config.window(), config.max_requests)
    }

    /// Decide whether `client_key` may make another request now.
    ///
    /// On admission the current instant is recorded against the client. A
    /// denial records nothing; it only drops timestamps that already left
    /// the window.
    pub fn admit(&self, client_key: &str) -> bool {
        let mut clients = self.clients.lock();
        let now = self.clock.now();

        let admitted = match clients.get_mut(client_key) {
            Some(log) => {
                log.prune(now, self.window);
                if log.len() < self.max_requests {
                    log.record(now);
                    true
                } else {
                    false
                }
            }
            None if self.max_requests > 0 => {
                let mut log = RequestLog::new();
                log.record(now);
                clients.insert(client_key.to_string(), log);
                true
            }
            None => false,
        };

        if admitted {
            trace!(client = %client_key, "Request admitted");
        } else {
            debug!(
                client = %client_key,
                limit = self.max_requests,
                window_secs = self.window.as_secs(),
                "Request denied by rate limiter"
            );
        }

        admitted
    }

    /// Admissions left for `client_key` in the current window.
    pub fn remaining(&self, client_key: &str) -> usize {
        let clients = self.clients.lock();
        let now = self.clock.now();
        let used = clients
            .get(client_key)
            .map(|log| log.count_within(now, self.window))
            .unwrap_or(0);
        self.max_requests.saturating_sub(used)
    }

    /// How long until `client_key` would be admitted again.
    ///
    /// Returns `None` when the client currently has budget left.
    pub fn retry_after(&self, client_key: &str) -> Option<Duration> {
        let clients = self.clients.lock();
        let now = self.clock.now();

        let log = match clients.get(client_key) {
            Some(log) => log,
            None if self.max_requests == 0 => return Some(self.window),
            None => return None,
        };

        if log.count_within(now, self.window) < self.max_requests {
            return None;
        }

        match log.oldest_within(now, self.window) {
            Some(oldest) => Some(self.window.saturating_sub(now.saturating_duration_since(oldest))),
            None => Some(self.window),
        }
    }

    /// Prune every client log and forget clients with nothing left.
    ///
    /// Returns the number of clients removed.
    pub fn purge_expired(&self) -> usize {
        let mut clients = self.clients.lock();
        let now = self.clock.now();
        let before = clients.len();

        clients.retain(|_, log| {
            log.prune(now, self.window);
            !log.is_empty()
        });

        before - clients.len()
    }

    /// Number of clients with a stored log.
    pub fn tracked_clients(&self) -> usize {
        self.clients.lock().len()
    }

    /// Forget all clients.
    pub fn clear(&self) {
        self.clients.lock().clear();
    }

    /// Length of the trailing window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Admissions allowed per client within one window.
    pub fn max_requests(&self) -> usize {
        self.max_requests
    }
}

impl Default for SlidingWindowLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_MAX_REQUESTS)
    }
}

impl Sweep for SlidingWindowLimiter {
    fn name(&self) -> &str {
        "rate_limiter"
    }

    fn sweep(&self) -> usize {
        self.purge_expired()
    }
}
