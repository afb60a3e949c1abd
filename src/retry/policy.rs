//! Retry policy and backoff calculation.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Parameters for retrying an upstream operation.
///
/// Delays are configured in milliseconds. The delay after the `n`th failed
/// attempt is `min(initial_delay * backoff_factor^(n-1), max_delay)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay after the first failed attempt, in milliseconds
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Upper bound for any single delay, in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Growth factor between consecutive delays
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

impl RetryPolicy {
    /// Create a policy from explicit durations.
    ///
    /// Delays are kept at millisecond resolution. A partial millisecond is
    /// rounded up, so a non-zero delay never becomes zero, and delays too
    /// large for `u64` milliseconds saturate.
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts,
            initial_delay_ms: whole_millis(initial_delay),
            max_delay_ms: whole_millis(max_delay),
            backoff_factor,
        }
    }

    /// A policy that tries exactly once.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay after the first failed attempt.
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// Upper bound for any single delay.
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Number of attempts actually made; a zero budget still runs once.
    pub fn effective_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay after `attempt` failed. See [`calculate_backoff`].
    pub fn backoff(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self)
    }

    /// The delays slept between consecutive attempts when every attempt fails.
    pub fn schedule(&self) -> Vec<Duration> {
        (1..self.effective_attempts()).map(|attempt| self.backoff(attempt)).collect()
    }

    /// Worst-case total time spent sleeping.
    pub fn total_delay(&self) -> Duration {
        self.schedule().into_iter().sum()
    }

    /// Check the policy for values that make no sense.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".to_string());
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(format!("backoff_factor must be >= 1.0, got {}", self.backoff_factor));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(format!(
                "max_delay_ms ({}) must not be below initial_delay_ms ({})",
                self.max_delay_ms, self.initial_delay_ms
            ));
        }
        Ok(())
    }
}

fn whole_millis(delay: Duration) -> u64 {
    let partial = u128::from(delay.subsec_nanos() % 1_000_000 != 0);
    u64::try_from(delay.as_millis() + partial).unwrap_or(u64::MAX)
}

/// Delay to sleep after the 1-based `attempt` failed.
///
/// Pure: no clock, no randomness. Attempt 0 yields zero. Factors below 1 are
/// treated as 1 so the result never decreases as `attempt` grows, and it
/// never exceeds `max_delay`.
pub fn calculate_backoff(attempt: u32, policy: &RetryPolicy) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let factor = if policy.backoff_factor.is_finite() {
        policy.backoff_factor.max(1.0)
    } else {
        1.0
    };
    let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
    let max_ms = policy.max_delay_ms as f64;
    let delay_ms = policy.initial_delay_ms as f64 * factor.powi(exponent);

    let capped = if delay_ms.is_finite() { delay_ms.min(max_ms) } else { max_ms };
    Duration::from_millis(capped as u64)
}
