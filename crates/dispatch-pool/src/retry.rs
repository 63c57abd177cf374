//! Retry bound and backoff schedule for transient failures

use std::time::Duration;

use crate::error::{Error, Result};

/// Total call attempts per job, first attempt included.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Delay after the 1st, 2nd, 3rd… failed attempt. The last entry repeats.
pub const DEFAULT_BACKOFF: [Duration; 3] = [
    Duration::from_secs(5),
    Duration::from_secs(10),
    Duration::from_secs(20),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_BACKOFF.to_vec(),
        }
    }
}

impl RetryPolicy {
    /// Requires at least one attempt and a non-empty schedule.
    pub fn new(max_attempts: u32, backoff: Vec<Duration>) -> Result<Self> {
        if max_attempts == 0 {
            return Err(Error::Config("max_attempts must be at least 1".into()));
        }
        if backoff.is_empty() {
            return Err(Error::Config("backoff schedule must not be empty".into()));
        }
        Ok(Self {
            max_attempts,
            backoff,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let idx = (attempt.max(1) as usize - 1).min(self.backoff.len() - 1);
        self.backoff[idx]
    }
}
