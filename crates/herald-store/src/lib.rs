//! SQLite persistence for Herald.
//!
//! This crate owns the durable state of the publish pipeline:
//! - Content items and the platform accounts they publish through
//! - Schedules and the state machine that moves them from `pending` to a
//!   terminal state
//! - The append-only audit event table
//! - The retry policy consulted when a publish attempt fails
//!
//! Every mutation that touches both a schedule and its content item runs in a
//! single transaction. Claiming due schedules is one conditional `UPDATE`, so
//! two sweepers can never claim the same row.

mod audit;
mod db;
mod error;
mod retry;
mod schedules;
mod types;

pub use audit::AuditFilter;
pub use db::Store;
pub use error::StoreError;
pub use retry::RetryPolicy;
pub use schedules::RetryDecision;
pub use types::*;
