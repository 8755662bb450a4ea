//! Reconnect backoff schedule
//!
//! The supervisor asks a [`BackoffStrategy`] how long to wait after each
//! failed attempt; `None` means the retry budget is spent.

use std::time::Duration;

pub trait BackoffStrategy: Send + Sync {
    /// Delay before the next attempt, given how many attempts have failed so far (>= 1)
    fn next_delay(&self, failed_attempts: u32) -> Option<Duration>;
}

/// Doubling delay, capped at `max_delay`, for at most `max_attempts` attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_attempts: 8,
        }
    }
}

impl ExponentialBackoff {
    pub fn new(initial_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            initial_delay,
            max_delay,
            max_attempts,
        }
    }
}

impl BackoffStrategy for ExponentialBackoff {
    fn next_delay(&self, failed_attempts: u32) -> Option<Duration> {
        if failed_attempts == 0 || failed_attempts >= self.max_attempts {
            return None;
        }
        let factor = 2u32.checked_pow(failed_attempts - 1).unwrap_or(u32::MAX);
        let delay = self
            .initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay);
        Some(delay.min(self.max_delay))
    }
}

/// Attempts made in the current retry cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    pub attempt: u32,
}

impl RetryState {
    pub fn reset(&mut self) {
        *self = RetryState::default();
    }
}
