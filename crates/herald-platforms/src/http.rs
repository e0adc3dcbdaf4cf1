//! Shared HTTP plumbing for the adapters.

use chrono::{DateTime, Duration, Utc};
use herald_store::{Platform, TokenGrant};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde_json::Value;
use tracing::debug;

use crate::PlatformError;

/// Expiry assumed when a refresh response omits `expires_in` (60 days).
pub(crate) const DEFAULT_GRANT_LIFETIME_SECS: i64 = 60 * 24 * 60 * 60;

/// Send a request and map any non-success status to a classified error.
pub(crate) async fn send(
    platform: Platform,
    request: RequestBuilder,
) -> Result<Response, PlatformError> {
    let response = request.send().await?;
    let status = response.status();
    debug!(%platform, status = status.as_u16(), url = %response.url(), "platform response");

    if status.is_success() {
        return Ok(response);
    }
    Err(error_for_status(platform, response).await)
}

/// Send a request and decode the success body as JSON.
pub(crate) async fn send_json(
    platform: Platform,
    request: RequestBuilder,
) -> Result<Value, PlatformError> {
    let response = send(platform, request).await?;
    response
        .json::<Value>()
        .await
        .map_err(|e| PlatformError::UnexpectedResponse {
            platform,
            message: format!("invalid JSON body: {}", e),
        })
}

async fn error_for_status(platform: Platform, response: Response) -> PlatformError {
    let status = response.status();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_secs = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok());
        return PlatformError::RateLimited {
            platform,
            retry_after_secs,
        };
    }

    let message = response
        .text()
        .await
        .unwrap_or_else(|e| format!("failed to read response: {}", e));
    let code = status.as_u16();

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        PlatformError::Auth {
            platform,
            status: code,
            message,
        }
    } else if status.is_server_error() {
        PlatformError::Server {
            platform,
            status: code,
            message,
        }
    } else if status == StatusCode::BAD_REQUEST || status == StatusCode::UNPROCESSABLE_ENTITY {
        PlatformError::Rejected {
            platform,
            status: code,
            message,
        }
    } else {
        PlatformError::UnexpectedResponse {
            platform,
            message: format!("{} {}", code, message),
        }
    }
}

/// Read a string or numeric id at `pointer`.
pub(crate) fn id_at(
    platform: Platform,
    body: &Value,
    pointer: &str,
) -> Result<String, PlatformError> {
    match body.pointer(pointer) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(PlatformError::UnexpectedResponse {
            platform,
            message: format!("missing {} in {}", pointer, body),
        }),
    }
}

/// Build a token grant from an OAuth refresh response body.
pub(crate) fn token_grant(
    platform: Platform,
    body: &Value,
    now: DateTime<Utc>,
) -> Result<TokenGrant, PlatformError> {
    let access_token = body
        .get("access_token")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| PlatformError::TokenRefresh {
            platform,
            reason: format!("no access_token in response: {}", body),
        })?;

    let refresh_token = body
        .get("refresh_token")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(String::from);

    let expires_in = body
        .get("expires_in")
        .and_then(|v| v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
        .unwrap_or(DEFAULT_GRANT_LIFETIME_SECS);

    Ok(TokenGrant {
        access_token: access_token.to_string(),
        refresh_token,
        expires_at: now + Duration::seconds(expires_in),
    })
}

/// Wrap a refresh failure as terminal unless it is worth retrying.
pub(crate) fn refresh_failure(platform: Platform, err: PlatformError) -> PlatformError {
    match err {
        PlatformError::TokenRefresh { .. } | PlatformError::NoRefreshToken { .. } => err,
        e if e.failure_class() == crate::FailureClass::Transient => e,
        e => PlatformError::TokenRefresh {
            platform,
            reason: e.to_string(),
        },
    }
}

/// The stored refresh token, or an error if there is none.
pub(crate) fn require_refresh_token(
    account: &herald_store::PlatformAccount,
) -> Result<&str, PlatformError> {
    account
        .refresh_token
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or(PlatformError::NoRefreshToken {
            platform: account.platform,
            account_id: account.id,
        })
}
