//! Exponential backoff for retryable job failures.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Backoff applied between attempts of a job.
///
/// The retry ceiling itself is stored per job (`Job::max_attempts`); this
/// policy only decides how long a released job waits before its next lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay after the first failed attempt.
    pub base: Duration,
    /// Upper bound for any single delay.
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Delay before the next attempt of a job that had `attempts` failed
    /// attempts before the one that just failed: `base * 2^attempts`, capped.
    pub fn delay_for(&self, attempts: i32) -> Duration {
        let exponent = attempts.clamp(0, 30) as u32;
        let multiplier = 2_u32.saturating_pow(exponent);
        self.base
            .checked_mul(multiplier)
            .map_or(self.cap, |delay| delay.min(self.cap))
    }
}
