//! Retry policy for provider calls
//!
//! Linear backoff: the k-th retry waits `k * base_delay`.

use loom_core::SessionConfig;
use std::time::Duration;

/// Total attempts per segment, first call included
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Backoff unit between attempts
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(2000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(
            config.retry_attempts,
            Duration::from_millis(config.retry_base_delay_ms),
        )
    }

    /// Delay before retry number `retry` (1-based)
    pub fn delay_before_retry(&self, retry: u32) -> Duration {
        self.base_delay * retry
    }

    /// Whether another attempt is allowed after `attempts_made` attempts
    pub fn has_attempts_left(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_BASE_DELAY)
    }
}
