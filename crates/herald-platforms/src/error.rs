//! Error types for platform adapters.

use herald_store::{Platform, StoreError};
use thiserror::Error;

/// How the executor should treat a failed publish attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Network trouble, rate limiting or a 5xx. Retried with backoff.
    Transient,
    /// The token cannot be refreshed or the platform revoked access. Terminal.
    Auth,
    /// The content breaks a platform rule or targets a platform with no
    /// adapter. Terminal.
    Validation,
    /// Anything unclassified. Retried, consuming a retry slot.
    Unknown,
}

impl FailureClass {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureClass::Transient | FailureClass::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::Transient => "transient",
            FailureClass::Auth => "auth",
            FailureClass::Validation => "validation",
            FailureClass::Unknown => "unknown",
        }
    }
}

/// Errors that can occur when talking to a publishing platform.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// No adapter is registered for the platform.
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// Content rejected locally before any network call.
    #[error("content rejected for {platform}: {reason}")]
    ContentValidation { platform: Platform, reason: String },

    /// The OAuth refresh call failed.
    #[error("token refresh failed for {platform}: {reason}")]
    TokenRefresh { platform: Platform, reason: String },

    /// The token is expiring and there is nothing to refresh it with.
    #[error("no refresh token stored for {platform} account {account_id}")]
    NoRefreshToken { platform: Platform, account_id: i64 },

    /// The owner has no connected account for the platform.
    #[error("no {platform} account connected for owner {owner_id}")]
    AccountNotConnected { platform: Platform, owner_id: i64 },

    /// The platform rejected the credentials.
    #[error("{platform} rejected credentials ({status}): {message}")]
    Auth {
        platform: Platform,
        status: u16,
        message: String,
    },

    /// Rate limited.
    #[error("rate limited by {platform}{}", match retry_after_secs {
        Some(secs) => format!(" (retry after {}s)", secs),
        None => String::new(),
    })]
    RateLimited {
        platform: Platform,
        /// Seconds to wait before retrying (from Retry-After header, optional).
        retry_after_secs: Option<u64>,
    },

    /// The platform returned a 5xx.
    #[error("{platform} server error ({status}): {message}")]
    Server {
        platform: Platform,
        status: u16,
        message: String,
    },

    /// The platform refused the request for a reason tied to its content.
    #[error("{platform} rejected request ({status}): {message}")]
    Rejected {
        platform: Platform,
        status: u16,
        message: String,
    },

    /// A response we could not make sense of.
    #[error("unexpected response from {platform}: {message}")]
    UnexpectedResponse { platform: Platform, message: String },

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Persisting a refreshed token failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl PlatformError {
    /// Classify this error for retry decisions.
    pub fn failure_class(&self) -> FailureClass {
        match self {
            PlatformError::RateLimited { .. } | PlatformError::Server { .. } => {
                FailureClass::Transient
            }
            PlatformError::Http(e) if e.is_timeout() || e.is_connect() || e.is_request() => {
                FailureClass::Transient
            }
            PlatformError::TokenRefresh { .. }
            | PlatformError::NoRefreshToken { .. }
            | PlatformError::AccountNotConnected { .. }
            | PlatformError::Auth { .. } => FailureClass::Auth,
            PlatformError::UnsupportedPlatform(_)
            | PlatformError::ContentValidation { .. }
            | PlatformError::Rejected { .. } => FailureClass::Validation,
            PlatformError::UnexpectedResponse { .. }
            | PlatformError::Http(_)
            | PlatformError::Store(_) => FailureClass::Unknown,
        }
    }

    /// Short machine-readable name for audit context.
    pub fn kind(&self) -> &'static str {
        match self {
            PlatformError::UnsupportedPlatform(_) => "unsupported_platform",
            PlatformError::ContentValidation { .. } => "content_validation",
            PlatformError::TokenRefresh { .. } => "token_refresh",
            PlatformError::NoRefreshToken { .. } => "no_refresh_token",
            PlatformError::AccountNotConnected { .. } => "account_not_connected",
            PlatformError::Auth { .. } => "auth",
            PlatformError::RateLimited { .. } => "rate_limited",
            PlatformError::Server { .. } => "server",
            PlatformError::Rejected { .. } => "rejected",
            PlatformError::UnexpectedResponse { .. } => "unexpected_response",
            PlatformError::Http(_) => "http",
            PlatformError::Store(_) => "store",
        }
    }

    /// Failure reason safe to show the content owner. Raw error text stays in
    /// the audit log.
    pub fn user_message(&self) -> String {
        match self {
            PlatformError::ContentValidation { platform, reason } => {
                format!("Content does not meet {} rules: {}", platform, reason)
            }
            PlatformError::UnsupportedPlatform(platform) => {
                format!("Publishing to {} is not supported", platform)
            }
            PlatformError::TokenRefresh { platform, .. }
            | PlatformError::NoRefreshToken { platform, .. }
            | PlatformError::AccountNotConnected { platform, .. }
            | PlatformError::Auth { platform, .. } => {
                format!("The {} account needs to be reconnected", platform)
            }
            PlatformError::RateLimited { platform, .. } | PlatformError::Server { platform, .. } => {
                format!("{} is temporarily unavailable", platform)
            }
            PlatformError::Rejected { platform, .. } => format!("{} rejected the post", platform),
            PlatformError::UnexpectedResponse { .. }
            | PlatformError::Http(_)
            | PlatformError::Store(_) => "Publishing failed unexpectedly".to_string(),
        }
    }
}
