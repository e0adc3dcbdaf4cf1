//! Periodic sweep: claim due schedules and hand them to the executor.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use herald_store::{AuditEntry, Store};
use serde_json::json;
use tokio::sync::{Mutex, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::{AttemptOutcome, AuditSink, ExecutorHandle, PipelineConfig, SchedulerError};

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    /// A previous sweep was still running, so this one did nothing.
    pub skipped: bool,
    /// Schedules claimed and submitted.
    pub claimed: usize,
    /// Outcomes, for sweeps that wait on their attempts.
    pub outcomes: Vec<AttemptOutcome>,
}

impl SweepReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

/// Claims due schedules in batches. At most one sweep runs at a time.
///
/// Also returns claims stuck in `processing` to `pending` on a slower
/// interval.
pub struct Sweeper {
    store: Arc<Store>,
    executor: ExecutorHandle,
    audit: Arc<dyn AuditSink>,
    batch_size: usize,
    interval: Duration,
    stuck_after: Duration,
    recovery_interval: Duration,
    running: Mutex<()>,
}

impl Sweeper {
    pub fn new(
        store: Arc<Store>,
        executor: ExecutorHandle,
        audit: Arc<dyn AuditSink>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            store,
            executor,
            audit,
            batch_size: config.batch_size,
            interval: config.sweep_interval,
            stuck_after: config.stuck_after,
            recovery_interval: config.recovery_interval,
            running: Mutex::new(()),
        }
    }

    /// Return claims older than the stuck-claim age to `pending`.
    pub fn recover_stuck(&self) -> Result<usize, SchedulerError> {
        let recovered = self
            .store
            .recover_interrupted(Utc::now(), self.stuck_after)?;
        if recovered > 0 {
            self.audit.record(
                AuditEntry::warning(format!("Recovered {} stuck schedule(s)", recovered))
                    .with_context(json!({
                        "recovered": recovered,
                        "stuck_after_secs": self.stuck_after.as_secs(),
                    })),
            );
        }
        Ok(recovered)
    }

    /// Claim one batch and submit it without waiting for the attempts.
    pub async fn tick(&self) -> Result<SweepReport, SchedulerError> {
        let Ok(_guard) = self.running.try_lock() else {
            debug!("previous sweep still running, skipping");
            return Ok(SweepReport::skipped());
        };

        let claimed = self.store.claim_due(Utc::now(), self.batch_size)?;
        let count = claimed.len();
        for schedule in claimed {
            let id = schedule.id;
            if let Err(e) = self.executor.submit(schedule).await {
                // Left `processing` until recover_stuck picks it up
                warn!(schedule_id = id, error = %e, "could not submit claimed schedule");
                return Err(e);
            }
        }

        if count > 0 {
            info!(claimed = count, "sweep submitted due schedules");
        }
        Ok(SweepReport {
            skipped: false,
            claimed: count,
            outcomes: Vec::new(),
        })
    }

    /// Claim one batch and wait for every attempt in it to finish.
    ///
    /// Holds the sweep lock throughout, so a periodic tick arriving meanwhile
    /// is skipped.
    pub async fn sweep_tracked(&self) -> Result<SweepReport, SchedulerError> {
        let Ok(_guard) = self.running.try_lock() else {
            debug!("previous sweep still running, skipping");
            return Ok(SweepReport::skipped());
        };

        let claimed = self.store.claim_due(Utc::now(), self.batch_size)?;
        let count = claimed.len();
        let mut pending = Vec::with_capacity(count);
        for schedule in claimed {
            pending.push(self.executor.submit_tracked(schedule).await?);
        }

        let mut outcomes = Vec::with_capacity(count);
        for rx in pending {
            match rx.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(_) => warn!("publish worker dropped an attempt without reporting"),
            }
        }

        Ok(SweepReport {
            skipped: false,
            claimed: count,
            outcomes,
        })
    }

    /// Sweep every `interval` and recover stuck claims every
    /// `recovery_interval` until shutdown is signalled.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            recovery_interval_secs = self.recovery_interval.as_secs(),
            "sweeper starting"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut recovery = tokio::time::interval(self.recovery_interval);
        recovery.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("sweeper received shutdown signal");
                        break;
                    }
                }
                _ = recovery.tick() => {
                    if let Err(e) = self.recover_stuck() {
                        error!(error = %e, "stuck claim recovery failed");
                    }
                }
                _ = ticker.tick() => {
                    // A full queue can hold the tick; shutdown must still get through
                    tokio::select! {
                        biased;

                        changed = shutdown_rx.changed() => {
                            if changed.is_err() || *shutdown_rx.borrow() {
                                info!("sweeper received shutdown signal mid-sweep");
                                break;
                            }
                        }
                        result = self.tick() => {
                            if let Err(e) = result {
                                error!(error = %e, "sweep failed");
                            }
                        }
                    }
                }
            }
        }

        info!("sweeper shut down gracefully");
    }
}
