//! Schedule repository and state machine.
//!
//! ```text
//! pending --claim--> processing --success--> completed
//! processing --retryable failure, retries left--> pending
//! processing --retryable failure, retries exhausted--> failed
//! processing --terminal failure--> failed
//! pending --cancel--> cancelled
//! ```
//!
//! `completed`, `failed` and `cancelled` are terminal.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use tracing::{debug, info, warn};

use crate::db::{from_millis, load_account, load_item, millis, set_item_status};
use crate::{
    ContentStatus, Platform, PublishReceipt, RetryPolicy, Schedule, ScheduleStatus, Store,
    StoreError,
};

const SCHEDULE_COLUMNS: &str = "id, content_item_id, due_at, not_before, status, retry_count, \
     last_attempt_at, failure_reason, created_at, updated_at";

const JOINED_SCHEDULE_COLUMNS: &str = "s.id, s.content_item_id, s.due_at, s.not_before, s.status, \
     s.retry_count, s.last_attempt_at, s.failure_reason, s.created_at, s.updated_at";

/// What happened to a schedule after a retryable failure.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Back to `pending`, claimable again after `delay`.
    Requeued { schedule: Schedule, delay: Duration },
    /// No retries left; the schedule is now `failed`.
    Exhausted { schedule: Schedule },
}

impl RetryDecision {
    pub fn schedule(&self) -> &Schedule {
        match self {
            RetryDecision::Requeued { schedule, .. } | RetryDecision::Exhausted { schedule } => {
                schedule
            }
        }
    }
}

impl Store {
    /// Create a pending schedule for a content item and mark the item `scheduled`.
    #[tracing::instrument(skip(self))]
    pub fn create_schedule(
        &self,
        content_item_id: i64,
        due_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Schedule, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let schedule = insert_schedule(&tx, content_item_id, due_at, now)?;
        tx.commit()?;

        info!(id = schedule.id, content_item_id, due_at = %due_at, "created schedule");
        Ok(schedule)
    }

    /// Get a schedule by id.
    pub fn get_schedule(&self, id: i64) -> Result<Schedule, StoreError> {
        let conn = self.conn()?;
        load_schedule(&conn, id)
    }

    /// Every schedule ever created for a content item, oldest first.
    pub fn schedules_for_item(&self, content_item_id: i64) -> Result<Vec<Schedule>, StoreError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE content_item_id = ?1 ORDER BY id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let schedules = stmt
            .query_map(params![content_item_id], schedule_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(schedules)
    }

    /// Claim up to `limit` due schedules, moving each to `processing`.
    ///
    /// The select and the status change are one `UPDATE` statement guarded by
    /// `status = 'pending'`, so concurrent claimers never receive the same row.
    pub fn claim_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Schedule>, StoreError> {
        let conn = self.conn()?;
        let sql = format!(
            "UPDATE schedules
             SET status = 'processing', last_attempt_at = ?1, updated_at = ?1
             WHERE id IN (
                 SELECT id FROM schedules
                 WHERE status = 'pending' AND due_at <= ?1 AND not_before <= ?1
                 ORDER BY not_before, id
                 LIMIT ?2
             ) AND status = 'pending'
             RETURNING {SCHEDULE_COLUMNS}"
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let mut stmt = conn.prepare(&sql)?;
        let mut claimed = stmt
            .query_map(params![millis(now), limit], schedule_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        claimed.sort_by_key(|s| (s.not_before, s.id));

        if !claimed.is_empty() {
            debug!(count = claimed.len(), "claimed due schedules");
        }
        Ok(claimed)
    }

    /// Resolve a processing schedule as published.
    ///
    /// Calling this on a schedule that is not `processing` (including one that
    /// already completed) is rejected.
    #[tracing::instrument(skip(self, receipt))]
    pub fn mark_completed(
        &self,
        id: i64,
        receipt: &PublishReceipt,
        now: DateTime<Utc>,
    ) -> Result<Schedule, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let schedule = load_schedule(&tx, id)?;
        expect_status(&schedule, ScheduleStatus::Processing, ScheduleStatus::Completed)?;

        tx.execute(
            "UPDATE schedules SET status = 'completed', failure_reason = NULL, updated_at = ?1
             WHERE id = ?2",
            params![millis(now), id],
        )?;
        tx.execute(
            "UPDATE content_items
             SET status = 'published', published_at = ?1, remote_id = ?2, remote_url = ?3,
                 updated_at = ?1
             WHERE id = ?4",
            params![
                millis(now),
                receipt.remote_id,
                receipt.remote_url,
                schedule.content_item_id
            ],
        )?;

        let schedule = load_schedule(&tx, id)?;
        tx.commit()?;
        Ok(schedule)
    }

    /// Record a retryable failure.
    ///
    /// With retries left, the schedule returns to `pending` with `not_before`
    /// pushed out by the policy's delay for this attempt. Otherwise it becomes
    /// `failed` and the content item follows. The retry count never exceeds
    /// `policy.max_retries`.
    #[tracing::instrument(skip(self, policy))]
    pub fn mark_retry(
        &self,
        id: i64,
        reason: &str,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> Result<RetryDecision, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let schedule = load_schedule(&tx, id)?;

        let decision = if policy.allows_retry(schedule.retry_count) {
            expect_status(&schedule, ScheduleStatus::Processing, ScheduleStatus::Pending)?;

            let attempt = schedule.retry_count + 1;
            let not_before = now + policy.delta_for_attempt(attempt);
            tx.execute(
                "UPDATE schedules
                 SET status = 'pending', retry_count = ?1, not_before = ?2, failure_reason = ?3,
                     updated_at = ?4
                 WHERE id = ?5",
                params![attempt, millis(not_before), reason, millis(now), id],
            )?;

            RetryDecision::Requeued {
                schedule: load_schedule(&tx, id)?,
                delay: policy.delay_for_attempt(attempt),
            }
        } else {
            expect_status(&schedule, ScheduleStatus::Processing, ScheduleStatus::Failed)?;
            fail_schedule(&tx, &schedule, reason, now)?;

            RetryDecision::Exhausted {
                schedule: load_schedule(&tx, id)?,
            }
        };

        tx.commit()?;
        Ok(decision)
    }

    /// Record a terminal failure.
    #[tracing::instrument(skip(self))]
    pub fn mark_failed(
        &self,
        id: i64,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Schedule, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let schedule = load_schedule(&tx, id)?;
        expect_status(&schedule, ScheduleStatus::Processing, ScheduleStatus::Failed)?;
        fail_schedule(&tx, &schedule, reason, now)?;

        let schedule = load_schedule(&tx, id)?;
        tx.commit()?;
        Ok(schedule)
    }

    /// Cancel a pending schedule and return its content item to `draft`.
    #[tracing::instrument(skip(self))]
    pub fn cancel_schedule(&self, id: i64, now: DateTime<Utc>) -> Result<Schedule, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let schedule = load_schedule(&tx, id)?;
        expect_status(&schedule, ScheduleStatus::Pending, ScheduleStatus::Cancelled)?;
        cancel_pending(&tx, &schedule, now)?;

        let schedule = load_schedule(&tx, id)?;
        tx.commit()?;
        info!(id, "cancelled schedule");
        Ok(schedule)
    }

    /// Give a failed schedule's content item a fresh schedule due `now`.
    ///
    /// The failed schedule itself stays failed; the new one starts with a zero
    /// retry count.
    #[tracing::instrument(skip(self))]
    pub fn requeue_failed(&self, id: i64, now: DateTime<Utc>) -> Result<Schedule, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let failed = load_schedule(&tx, id)?;
        expect_status(&failed, ScheduleStatus::Failed, ScheduleStatus::Pending)?;

        let schedule = insert_schedule(&tx, failed.content_item_id, now, now)?;
        tx.commit()?;

        info!(failed_id = id, id = schedule.id, "requeued failed schedule");
        Ok(schedule)
    }

    /// Return schedules stuck in `processing` to `pending`.
    ///
    /// A schedule counts as stuck once its attempt started at least
    /// `stuck_after` before `now`. Claims younger than that may still belong
    /// to a live worker in this or another process and are left alone. Does
    /// not consume a retry slot.
    pub fn recover_interrupted(
        &self,
        now: DateTime<Utc>,
        stuck_after: Duration,
    ) -> Result<usize, StoreError> {
        let Some(cutoff) = chrono::Duration::from_std(stuck_after)
            .ok()
            .and_then(|age| now.checked_sub_signed(age))
        else {
            return Ok(0);
        };

        let conn = self.conn()?;
        let recovered = conn.execute(
            "UPDATE schedules SET status = 'pending', updated_at = ?1
             WHERE status = 'processing' AND last_attempt_at <= ?2",
            params![millis(now), millis(cutoff)],
        )?;
        if recovered > 0 {
            warn!(count = recovered, "recovered stuck schedules");
        }
        Ok(recovered)
    }

    /// Delete a platform account and cancel its owner's pending schedules on
    /// that platform. Returns the cancelled schedules.
    ///
    /// Schedules already `processing` are left to resolve; their attempt fails
    /// when the account can no longer be found.
    #[tracing::instrument(skip(self))]
    pub fn disconnect_account(
        &self,
        account_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<Schedule>, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let account = load_account(&tx, account_id)?;
        let pending = pending_for_owner(&tx, account.owner_id, account.platform)?;
        for schedule in &pending {
            cancel_pending(&tx, schedule, now)?;
        }
        tx.execute(
            "DELETE FROM platform_accounts WHERE id = ?1",
            params![account_id],
        )?;

        let cancelled = pending
            .iter()
            .map(|s| load_schedule(&tx, s.id))
            .collect::<Result<Vec<_>, _>>()?;
        tx.commit()?;

        info!(
            account_id,
            platform = %account.platform,
            cancelled = cancelled.len(),
            "disconnected platform account"
        );
        Ok(cancelled)
    }

    /// Pending schedules for an owner that are still in the future, soonest first.
    pub fn list_upcoming(
        &self,
        owner_id: i64,
        platform: Option<Platform>,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Schedule>, StoreError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {JOINED_SCHEDULE_COLUMNS}
             FROM schedules s JOIN content_items c ON c.id = s.content_item_id
             WHERE c.owner_id = ?1
               AND (?2 IS NULL OR c.platform = ?2)
               AND s.status = 'pending'
               AND s.due_at > ?3
             ORDER BY s.due_at, s.id
             LIMIT ?4"
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = conn.prepare(&sql)?;
        let schedules = stmt
            .query_map(
                params![owner_id, platform, millis(now), limit],
                schedule_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(schedules)
    }
}

fn insert_schedule(
    conn: &Connection,
    content_item_id: i64,
    due_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<Schedule, StoreError> {
    let item = load_item(conn, content_item_id)?;
    if item.status == ContentStatus::Published {
        return Err(StoreError::AlreadyPublished(content_item_id));
    }

    let active: Option<i64> = conn
        .query_row(
            "SELECT id FROM schedules
             WHERE content_item_id = ?1 AND status IN ('pending', 'processing')",
            params![content_item_id],
            |row| row.get(0),
        )
        .optional()?;
    if active.is_some() {
        return Err(StoreError::DuplicateSchedule(content_item_id));
    }

    conn.execute(
        "INSERT INTO schedules
         (content_item_id, due_at, not_before, status, retry_count, created_at, updated_at)
         VALUES (?1, ?2, ?2, 'pending', 0, ?3, ?3)",
        params![content_item_id, millis(due_at), millis(now)],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(ref err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StoreError::DuplicateSchedule(content_item_id)
        }
        other => StoreError::Database(other),
    })?;
    let id = conn.last_insert_rowid();

    set_item_status(conn, content_item_id, ContentStatus::Scheduled, now)?;
    load_schedule(conn, id)
}

fn fail_schedule(
    conn: &Connection,
    schedule: &Schedule,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE schedules SET status = 'failed', failure_reason = ?1, updated_at = ?2
         WHERE id = ?3",
        params![reason, millis(now), schedule.id],
    )?;
    set_item_status(conn, schedule.content_item_id, ContentStatus::Failed, now)
}

fn cancel_pending(
    conn: &Connection,
    schedule: &Schedule,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE schedules SET status = 'cancelled', updated_at = ?1 WHERE id = ?2",
        params![millis(now), schedule.id],
    )?;
    set_item_status(conn, schedule.content_item_id, ContentStatus::Draft, now)
}

fn pending_for_owner(
    conn: &Connection,
    owner_id: i64,
    platform: Platform,
) -> Result<Vec<Schedule>, StoreError> {
    let sql = format!(
        "SELECT {JOINED_SCHEDULE_COLUMNS}
         FROM schedules s JOIN content_items c ON c.id = s.content_item_id
         WHERE c.owner_id = ?1 AND c.platform = ?2 AND s.status = 'pending'
         ORDER BY s.id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let schedules = stmt
        .query_map(params![owner_id, platform], schedule_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(schedules)
}

fn expect_status(
    schedule: &Schedule,
    expected: ScheduleStatus,
    to: ScheduleStatus,
) -> Result<(), StoreError> {
    if schedule.status == expected {
        Ok(())
    } else {
        Err(StoreError::InvalidTransition {
            id: schedule.id,
            from: schedule.status,
            to,
        })
    }
}

fn load_schedule(conn: &Connection, id: i64) -> Result<Schedule, StoreError> {
    let sql = format!("SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE id = ?1");
    conn.query_row(&sql, params![id], schedule_from_row)
        .optional()?
        .ok_or(StoreError::ScheduleNotFound(id))
}

fn schedule_from_row(row: &Row<'_>) -> rusqlite::Result<Schedule> {
    Ok(Schedule {
        id: row.get(0)?,
        content_item_id: row.get(1)?,
        due_at: from_millis(row.get(2)?),
        not_before: from_millis(row.get(3)?),
        status: row.get(4)?,
        retry_count: row.get(5)?,
        last_attempt_at: row.get::<_, Option<i64>>(6)?.map(from_millis),
        failure_reason: row.get(7)?,
        created_at: from_millis(row.get(8)?),
        updated_at: from_millis(row.get(9)?),
    })
}
