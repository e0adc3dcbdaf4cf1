//! Publish pipeline for Herald.
//!
//! This crate drives content from `pending` to a terminal state:
//! - A sweeper claims due schedules on a fixed tick, never overlapping itself
//! - A bounded worker pool runs one publish attempt per claimed schedule
//! - Failures are classified and either retried after a backoff delay or
//!   recorded as terminal
//! - Claims stuck in `processing` past a time limit are returned to `pending`
//! - Every outcome is written to the audit log, and published or failed items
//!   are announced on a status broadcast channel

mod audit;
mod config;
mod error;
mod events;
mod executor;
mod pipeline;
mod sweeper;

pub use audit::{AuditSink, StoreAuditSink};
pub use config::{
    DEFAULT_BATCH_SIZE, DEFAULT_QUEUE_SIZE, DEFAULT_RECOVERY_INTERVAL, DEFAULT_STUCK_AFTER,
    DEFAULT_SWEEP_INTERVAL, DEFAULT_TOKEN_CHECK_INTERVAL, DEFAULT_WORKER_COUNT, PipelineConfig,
};
pub use error::SchedulerError;
pub use events::{STATUS_CHANNEL_CAPACITY, StatusEvent};
pub use executor::{AttemptOutcome, Executor, ExecutorContext, ExecutorHandle};
pub use pipeline::{Pipeline, TokenReport};
pub use sweeper::{SweepReport, Sweeper};
