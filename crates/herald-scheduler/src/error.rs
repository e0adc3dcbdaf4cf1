//! Error types for the scheduler.

use herald_platforms::PlatformError;
use herald_store::StoreError;
use thiserror::Error;

/// Errors that can occur in pipeline operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Platform error.
    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),

    /// The executor queue is closed; the pipeline is shutting down.
    #[error("publish queue closed")]
    QueueClosed,

    /// Invalid pipeline configuration.
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),
}
