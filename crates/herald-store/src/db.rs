//! SQLite connection, schema, content items and platform accounts.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Type, ValueRef};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{debug, info};

use crate::{
    ContentItem, ContentStatus, NewContentItem, NewPlatformAccount, Platform, PlatformAccount,
    ScheduleStatus, Severity, StoreError, TokenGrant,
};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS content_items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        owner_id INTEGER NOT NULL,
        platform TEXT NOT NULL,
        body TEXT NOT NULL,
        hashtags TEXT,
        media_url TEXT,
        status TEXT NOT NULL DEFAULT 'draft',
        published_at INTEGER,
        remote_id TEXT,
        remote_url TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_items_owner ON content_items(owner_id, platform);

    CREATE TABLE IF NOT EXISTS schedules (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        content_item_id INTEGER NOT NULL REFERENCES content_items(id) ON DELETE CASCADE,
        due_at INTEGER NOT NULL,
        not_before INTEGER NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        retry_count INTEGER NOT NULL DEFAULT 0,
        last_attempt_at INTEGER,
        failure_reason TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_schedules_claim ON schedules(status, not_before);
    CREATE UNIQUE INDEX IF NOT EXISTS idx_schedules_one_active
        ON schedules(content_item_id) WHERE status IN ('pending', 'processing');

    CREATE TABLE IF NOT EXISTS platform_accounts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        owner_id INTEGER NOT NULL,
        platform TEXT NOT NULL,
        remote_account_id TEXT NOT NULL,
        username TEXT NOT NULL,
        access_token TEXT NOT NULL,
        refresh_token TEXT,
        token_expires_at INTEGER,
        settings TEXT NOT NULL DEFAULT 'null',
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        UNIQUE (owner_id, platform)
    );
    CREATE INDEX IF NOT EXISTS idx_accounts_expiry ON platform_accounts(token_expires_at);

    CREATE TABLE IF NOT EXISTS audit_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        recorded_at INTEGER NOT NULL,
        severity TEXT NOT NULL,
        message TEXT NOT NULL,
        context TEXT NOT NULL DEFAULT 'null',
        owner_id INTEGER,
        content_item_id INTEGER
    );
    CREATE INDEX IF NOT EXISTS idx_audit_owner ON audit_events(owner_id, severity);
    CREATE INDEX IF NOT EXISTS idx_audit_item ON audit_events(content_item_id, severity);
    CREATE INDEX IF NOT EXISTS idx_audit_recorded ON audit_events(recorded_at);
";

pub(crate) const ITEM_COLUMNS: &str = "id, owner_id, platform, body, hashtags, media_url, status, \
     published_at, remote_id, remote_url, created_at, updated_at";

const ACCOUNT_COLUMNS: &str = "id, owner_id, platform, remote_account_id, username, access_token, \
     refresh_token, token_expires_at, settings, created_at, updated_at";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed store for the publish pipeline.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open or create the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        // Other herald processes may hold the write lock briefly
        conn.busy_timeout(BUSY_TIMEOUT)?;

        // WAL lets the audit log and readers proceed while a claim is committing
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self::init(conn)?;
        info!(path = %path.display(), "herald database initialized");
        Ok(store)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    // =========================================================================
    // Content items
    // =========================================================================

    /// Insert a new draft content item.
    pub fn insert_content_item(
        &self,
        item: &NewContentItem,
        now: DateTime<Utc>,
    ) -> Result<ContentItem, StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO content_items
             (owner_id, platform, body, hashtags, media_url, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'draft', ?6, ?6)",
            params![
                item.owner_id,
                item.platform,
                item.body,
                item.hashtags,
                item.media_url,
                millis(now),
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!(id, platform = %item.platform, "inserted content item");
        load_item(&conn, id)
    }

    /// Get a content item by id.
    pub fn get_content_item(&self, id: i64) -> Result<ContentItem, StoreError> {
        let conn = self.conn()?;
        load_item(&conn, id)
    }

    // =========================================================================
    // Platform accounts
    // =========================================================================

    /// Create or replace the account for `(owner, platform)`.
    pub fn upsert_account(
        &self,
        account: &NewPlatformAccount,
        now: DateTime<Utc>,
    ) -> Result<PlatformAccount, StoreError> {
        let settings = serde_json::to_string(&account.settings)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO platform_accounts
             (owner_id, platform, remote_account_id, username, access_token, refresh_token,
              token_expires_at, settings, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
             ON CONFLICT (owner_id, platform) DO UPDATE SET
                remote_account_id = excluded.remote_account_id,
                username = excluded.username,
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                token_expires_at = excluded.token_expires_at,
                settings = excluded.settings,
                updated_at = excluded.updated_at",
            params![
                account.owner_id,
                account.platform,
                account.remote_account_id,
                account.username,
                account.access_token,
                account.refresh_token,
                account.token_expires_at.map(millis),
                settings,
                millis(now),
            ],
        )?;

        let sql = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM platform_accounts WHERE owner_id = ?1 AND platform = ?2"
        );
        let stored = conn.query_row(&sql, params![account.owner_id, account.platform], account_from_row)?;
        Ok(stored)
    }

    /// Get an account by id.
    pub fn get_account(&self, id: i64) -> Result<PlatformAccount, StoreError> {
        let conn = self.conn()?;
        load_account(&conn, id)
    }

    /// Find the owner's account for a platform.
    pub fn find_account(
        &self,
        owner_id: i64,
        platform: Platform,
    ) -> Result<Option<PlatformAccount>, StoreError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM platform_accounts WHERE owner_id = ?1 AND platform = ?2"
        );
        let account = conn
            .query_row(&sql, params![owner_id, platform], account_from_row)
            .optional()?;
        Ok(account)
    }

    /// List every connected account.
    pub fn list_accounts(&self) -> Result<Vec<PlatformAccount>, StoreError> {
        let conn = self.conn()?;
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM platform_accounts ORDER BY id");
        let mut stmt = conn.prepare(&sql)?;
        let accounts = stmt
            .query_map([], account_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(accounts)
    }

    /// Persist a refreshed token in one statement.
    ///
    /// A grant without a refresh token keeps the stored one.
    pub fn update_account_token(
        &self,
        id: i64,
        grant: &TokenGrant,
        now: DateTime<Utc>,
    ) -> Result<PlatformAccount, StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE platform_accounts
             SET access_token = ?1,
                 refresh_token = COALESCE(?2, refresh_token),
                 token_expires_at = ?3,
                 updated_at = ?4
             WHERE id = ?5",
            params![
                grant.access_token,
                grant.refresh_token,
                millis(grant.expires_at),
                millis(now),
                id,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::AccountNotFound(id));
        }
        load_account(&conn, id)
    }
}

pub(crate) fn load_item(conn: &Connection, id: i64) -> Result<ContentItem, StoreError> {
    let sql = format!("SELECT {ITEM_COLUMNS} FROM content_items WHERE id = ?1");
    conn.query_row(&sql, params![id], item_from_row)
        .optional()?
        .ok_or(StoreError::ContentItemNotFound(id))
}

pub(crate) fn load_account(conn: &Connection, id: i64) -> Result<PlatformAccount, StoreError> {
    let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM platform_accounts WHERE id = ?1");
    conn.query_row(&sql, params![id], account_from_row)
        .optional()?
        .ok_or(StoreError::AccountNotFound(id))
}

pub(crate) fn set_item_status(
    conn: &Connection,
    id: i64,
    status: ContentStatus,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE content_items SET status = ?1, updated_at = ?2 WHERE id = ?3",
        params![status, millis(now), id],
    )?;
    Ok(())
}

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<ContentItem> {
    Ok(ContentItem {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        platform: row.get(2)?,
        body: row.get(3)?,
        hashtags: row.get(4)?,
        media_url: row.get(5)?,
        status: row.get(6)?,
        published_at: row.get::<_, Option<i64>>(7)?.map(from_millis),
        remote_id: row.get(8)?,
        remote_url: row.get(9)?,
        created_at: from_millis(row.get(10)?),
        updated_at: from_millis(row.get(11)?),
    })
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<PlatformAccount> {
    Ok(PlatformAccount {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        platform: row.get(2)?,
        remote_account_id: row.get(3)?,
        username: row.get(4)?,
        access_token: row.get(5)?,
        refresh_token: row.get(6)?,
        token_expires_at: row.get::<_, Option<i64>>(7)?.map(from_millis),
        settings: json_column(row, 8)?,
        created_at: from_millis(row.get(9)?),
        updated_at: from_millis(row.get(10)?),
    })
}

pub(crate) fn json_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<serde_json::Value> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Timestamps are stored as Unix milliseconds.
pub(crate) fn millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Store string-tagged enums as their lowercase names.
macro_rules! text_column {
    ($($ty:ty),* $(,)?) => {$(
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse::<$ty>()
                    .map_err(|e| FromSqlError::Other(e.to_string().into()))
            }
        }
    )*};
}

text_column!(Platform, ContentStatus, ScheduleStatus, Severity);
