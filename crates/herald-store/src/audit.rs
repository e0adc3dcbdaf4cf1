//! Append-only audit event table.

use chrono::{DateTime, Utc};
use rusqlite::{Row, params};

use crate::db::{from_millis, json_column, millis};
use crate::{AuditEntry, AuditEvent, Severity, Store, StoreError};

/// Filter for reading audit events back.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub owner_id: Option<i64>,
    pub content_item_id: Option<i64>,
    pub severity: Option<Severity>,
    /// Defaults to 100 when unset.
    pub limit: Option<usize>,
}

impl Store {
    /// Append an audit event.
    pub fn insert_audit_event(
        &self,
        entry: &AuditEntry,
        recorded_at: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let context = serde_json::to_string(&entry.context)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO audit_events
             (recorded_at, severity, message, context, owner_id, content_item_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                millis(recorded_at),
                entry.severity,
                entry.message,
                context,
                entry.owner_id,
                entry.content_item_id,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent audit events matching `filter`, newest first.
    pub fn list_audit_events(&self, filter: &AuditFilter) -> Result<Vec<AuditEvent>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, recorded_at, severity, message, context, owner_id, content_item_id
             FROM audit_events
             WHERE (?1 IS NULL OR owner_id = ?1)
               AND (?2 IS NULL OR content_item_id = ?2)
               AND (?3 IS NULL OR severity = ?3)
             ORDER BY recorded_at DESC, id DESC
             LIMIT ?4",
        )?;
        let limit = i64::try_from(filter.limit.unwrap_or(100)).unwrap_or(i64::MAX);
        let events = stmt
            .query_map(
                params![
                    filter.owner_id,
                    filter.content_item_id,
                    filter.severity,
                    limit
                ],
                event_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }

    /// Delete events recorded before `cutoff`. Retention is an operator
    /// decision; the pipeline itself never calls this.
    pub fn prune_audit_events(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM audit_events WHERE recorded_at < ?1",
            params![millis(cutoff)],
        )?;
        Ok(deleted)
    }
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<AuditEvent> {
    Ok(AuditEvent {
        id: row.get(0)?,
        recorded_at: from_millis(row.get(1)?),
        severity: row.get(2)?,
        message: row.get(3)?,
        context: json_column(row, 4)?,
        owner_id: row.get(5)?,
        content_item_id: row.get(6)?,
    })
}
