//! Pipeline configuration.

use std::time::Duration;

use herald_platforms::DEFAULT_TOKEN_LOOKAHEAD;
use herald_store::RetryPolicy;

use crate::SchedulerError;

/// Default interval between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Default number of schedules claimed per sweep.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Default number of publish workers.
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Default capacity of the publish queue.
pub const DEFAULT_QUEUE_SIZE: usize = 100;

/// Default age after which a `processing` claim is treated as stuck.
pub const DEFAULT_STUCK_AFTER: Duration = Duration::from_secs(60 * 60);

/// Default interval between checks for stuck claims.
pub const DEFAULT_RECOVERY_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Default interval between background token checks.
pub const DEFAULT_TOKEN_CHECK_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Tunables for the sweeper and executor. Read-only once the pipeline starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub sweep_interval: Duration,
    pub batch_size: usize,
    pub worker_count: usize,
    pub queue_size: usize,
    /// Tokens expiring within this window are refreshed before publishing.
    pub token_lookahead: Duration,
    pub retry: RetryPolicy,
    /// Claims older than this are returned to `pending`. Must exceed the
    /// longest publish attempt, or a live attempt could be claimed twice.
    pub stuck_after: Duration,
    pub recovery_interval: Duration,
    pub token_check_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
            worker_count: DEFAULT_WORKER_COUNT,
            queue_size: DEFAULT_QUEUE_SIZE,
            token_lookahead: DEFAULT_TOKEN_LOOKAHEAD,
            retry: RetryPolicy::default(),
            stuck_after: DEFAULT_STUCK_AFTER,
            recovery_interval: DEFAULT_RECOVERY_INTERVAL,
            token_check_interval: DEFAULT_TOKEN_CHECK_INTERVAL,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.sweep_interval.is_zero() {
            return Err(SchedulerError::InvalidConfig(
                "sweep interval must be positive".to_string(),
            ));
        }
        if self.stuck_after.is_zero() {
            return Err(SchedulerError::InvalidConfig(
                "stuck-claim age must be positive".to_string(),
            ));
        }
        if self.recovery_interval.is_zero() || self.token_check_interval.is_zero() {
            return Err(SchedulerError::InvalidConfig(
                "recovery and token check intervals must be positive".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(SchedulerError::InvalidConfig(
                "batch size must be at least 1".to_string(),
            ));
        }
        if self.worker_count == 0 {
            return Err(SchedulerError::InvalidConfig(
                "worker count must be at least 1".to_string(),
            ));
        }
        if self.queue_size == 0 {
            return Err(SchedulerError::InvalidConfig(
                "queue size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.stuck_after, Duration::from_secs(3600));
    }

    #[test]
    fn test_zero_stuck_after_rejected() {
        let config = PipelineConfig {
            stuck_after: Duration::ZERO,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SchedulerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config = PipelineConfig {
            worker_count: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SchedulerError::InvalidConfig(_))
        ));
    }
}
