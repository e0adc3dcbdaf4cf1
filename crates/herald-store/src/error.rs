//! Error types for the store.

use thiserror::Error;

use crate::ScheduleStatus;

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite error.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The connection mutex was poisoned by a panicking writer.
    #[error("database connection poisoned")]
    Poisoned,

    /// Content item not found.
    #[error("content item not found: {0}")]
    ContentItemNotFound(i64),

    /// Schedule not found.
    #[error("schedule not found: {0}")]
    ScheduleNotFound(i64),

    /// Platform account not found.
    #[error("platform account not found: {0}")]
    AccountNotFound(i64),

    /// The content item already has a pending or processing schedule.
    #[error("content item {0} already has an active schedule")]
    DuplicateSchedule(i64),

    /// Published content items cannot be rescheduled.
    #[error("content item {0} is already published")]
    AlreadyPublished(i64),

    /// The schedule is not in a state that allows the requested move.
    #[error("schedule {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: i64,
        from: ScheduleStatus,
        to: ScheduleStatus,
    },

    /// A platform tag outside the supported set.
    #[error("unknown platform: {0}")]
    UnknownPlatform(String),
}
