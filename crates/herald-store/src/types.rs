//! Data model types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::StoreError;

/// A third-party publishing platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Facebook,
    Instagram,
    Twitter,
    Linkedin,
    Tiktok,
    Youtube,
}

impl Platform {
    /// Every supported platform.
    pub const ALL: [Platform; 6] = [
        Platform::Facebook,
        Platform::Instagram,
        Platform::Twitter,
        Platform::Linkedin,
        Platform::Tiktok,
        Platform::Youtube,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Facebook => "facebook",
            Platform::Instagram => "instagram",
            Platform::Twitter => "twitter",
            Platform::Linkedin => "linkedin",
            Platform::Tiktok => "tiktok",
            Platform::Youtube => "youtube",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| StoreError::UnknownPlatform(s.to_string()))
    }
}

/// Lifecycle status of a content item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentStatus {
    #[default]
    Draft,
    Scheduled,
    Published,
    Failed,
}

impl ContentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentStatus::Draft => "draft",
            ContentStatus::Scheduled => "scheduled",
            ContentStatus::Published => "published",
            ContentStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ContentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(ContentStatus::Draft),
            "scheduled" => Ok(ContentStatus::Scheduled),
            "published" => Ok(ContentStatus::Published),
            "failed" => Ok(ContentStatus::Failed),
            other => Err(format!("unknown content status: {other}")),
        }
    }
}

/// Current status of a schedule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    /// Waiting for its due time (or retry deferral) to pass.
    #[default]
    Pending,
    /// Claimed by a sweeper; a publish attempt is in flight.
    Processing,
    /// Published successfully.
    Completed,
    /// Gave up, either on a terminal error or after exhausting retries.
    Failed,
    /// Cancelled by the user while pending.
    Cancelled,
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Pending => "pending",
            ScheduleStatus::Processing => "processing",
            ScheduleStatus::Completed => "completed",
            ScheduleStatus::Failed => "failed",
            ScheduleStatus::Cancelled => "cancelled",
        }
    }

    /// No transition leaves a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScheduleStatus::Completed | ScheduleStatus::Failed | ScheduleStatus::Cancelled
        )
    }
}

impl fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScheduleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ScheduleStatus::Pending),
            "processing" => Ok(ScheduleStatus::Processing),
            "completed" => Ok(ScheduleStatus::Completed),
            "failed" => Ok(ScheduleStatus::Failed),
            "cancelled" => Ok(ScheduleStatus::Cancelled),
            other => Err(format!("unknown schedule status: {other}")),
        }
    }
}

/// A user-authored unit of content bound for one platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: i64,
    pub owner_id: i64,
    pub platform: Platform,
    pub body: String,
    pub hashtags: Option<String>,
    /// Image or video the platform should attach, for platforms that need one.
    pub media_url: Option<String>,
    pub status: ContentStatus,
    pub published_at: Option<DateTime<Utc>>,
    /// Identifier the platform assigned to the published post.
    pub remote_id: Option<String>,
    pub remote_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContentItem {
    /// The text actually sent to the platform: body, then hashtags after a blank line.
    pub fn composed_text(&self) -> String {
        match self.hashtags.as_deref().map(str::trim) {
            Some(tags) if !tags.is_empty() => format!("{}\n\n{}", self.body, tags),
            _ => self.body.clone(),
        }
    }
}

/// Fields supplied by the authoring collaborator when creating a draft.
#[derive(Debug, Clone)]
pub struct NewContentItem {
    pub owner_id: i64,
    pub platform: Platform,
    pub body: String,
    pub hashtags: Option<String>,
    pub media_url: Option<String>,
}

/// One promotion attempt binding a content item to a due time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: i64,
    pub content_item_id: i64,
    /// When the user asked for the item to go out.
    pub due_at: DateTime<Utc>,
    /// Earliest time the schedule may be claimed. Equals `due_at` until a retry
    /// defers it by the backoff delay.
    pub not_before: DateTime<Utc>,
    pub status: ScheduleStatus,
    pub retry_count: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Schedule {
    /// Whether a sweep at `now` would claim this schedule.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.status == ScheduleStatus::Pending && self.due_at <= now && self.not_before <= now
    }
}

/// A user's credential bundle for one platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformAccount {
    pub id: i64,
    pub owner_id: i64,
    pub platform: Platform,
    pub remote_account_id: String,
    pub username: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub settings: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PlatformAccount {
    /// Whether the access token expires within `lookahead` of `now`.
    ///
    /// Tokens without a recorded expiry are treated as long-lived.
    pub fn token_expires_within(&self, lookahead: Duration, now: DateTime<Utc>) -> bool {
        self.token_expires_at
            .is_some_and(|expires_at| expires_at <= now + lookahead)
    }
}

/// Fields supplied by the account-management collaborator on OAuth connect.
#[derive(Debug, Clone)]
pub struct NewPlatformAccount {
    pub owner_id: i64,
    pub platform: Platform,
    pub remote_account_id: String,
    pub username: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub settings: serde_json::Value,
}

/// Credentials returned by a successful OAuth refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    /// `None` keeps the stored refresh token.
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Where a published item landed on the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub remote_id: String,
    pub remote_url: String,
}

/// Severity tag of an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Success => "success",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Severity::Info),
            "success" => Ok(Severity::Success),
            "warning" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// An immutable record of a pipeline transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: i64,
    pub recorded_at: DateTime<Utc>,
    pub severity: Severity,
    pub message: String,
    pub context: serde_json::Value,
    pub owner_id: Option<i64>,
    pub content_item_id: Option<i64>,
}

/// An audit event that has not been written yet.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub severity: Severity,
    pub message: String,
    pub context: serde_json::Value,
    pub owner_id: Option<i64>,
    pub content_item_id: Option<i64>,
}

impl AuditEntry {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            context: serde_json::Value::Null,
            owner_id: None,
            content_item_id: None,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(Severity::Info, message)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(Severity::Success, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }

    pub fn with_owner(mut self, owner_id: i64) -> Self {
        self.owner_id = Some(owner_id);
        self
    }

    pub fn with_item(mut self, content_item_id: i64) -> Self {
        self.content_item_id = Some(content_item_id);
        self
    }

    /// Attach both back-references of a content item.
    pub fn for_item(self, item: &ContentItem) -> Self {
        self.with_owner(item.owner_id).with_item(item.id)
    }
}
