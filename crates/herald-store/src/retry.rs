//! Retry policy for failed publish attempts.

use std::time::Duration;

use chrono::TimeDelta;

/// Default maximum number of retries per schedule.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default backoff sequence in seconds, indexed by attempt number.
pub const DEFAULT_BACKOFF_SECS: [u64; 3] = [30, 60, 120];

/// How many times a schedule may be retried and how long each retry waits.
///
/// This is the only place the retry limit and backoff sequence live; the
/// executor and the schedule repository both read it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Delay before retry `n` (1-based) is `backoff[n - 1]`; later retries
    /// reuse the last entry.
    pub backoff: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_secs(DEFAULT_MAX_RETRIES, &DEFAULT_BACKOFF_SECS)
    }
}

impl RetryPolicy {
    pub fn from_secs(max_retries: u32, backoff_secs: &[u64]) -> Self {
        Self {
            max_retries,
            backoff: backoff_secs.iter().copied().map(Duration::from_secs).collect(),
        }
    }

    /// Whether a schedule that has already been retried `retry_count` times
    /// may be retried again.
    pub fn allows_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }

    /// Delay before the given retry attempt (1 for the first retry).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let index = attempt.saturating_sub(1) as usize;
        self.backoff
            .get(index)
            .or_else(|| self.backoff.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    /// `delay_for_attempt` as a chrono delta for timestamp arithmetic.
    pub fn delta_for_attempt(&self, attempt: u32) -> TimeDelta {
        let millis = self.delay_for_attempt(attempt).as_millis();
        TimeDelta::milliseconds(i64::try_from(millis).unwrap_or(i64::MAX))
    }
}
