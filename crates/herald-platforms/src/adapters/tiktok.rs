//! TikTok Content Posting API adapter.

use async_trait::async_trait;
use chrono::Utc;
use herald_store::{ContentItem, Platform, PlatformAccount, PublishReceipt, TokenGrant};
use reqwest::Client;
use serde_json::{Value, json};
use tracing::info;

use crate::config::ClientCredentials;
use crate::http::{id_at, refresh_failure, require_refresh_token, send_json, token_grant};
use crate::{PlatformAdapter, PlatformError, ProfileInfo};

const PLATFORM: Platform = Platform::Tiktok;

pub struct TiktokAdapter {
    http: Client,
    base_url: String,
    credentials: ClientCredentials,
}

impl TiktokAdapter {
    pub fn new(http: Client, base_url: impl Into<String>, credentials: ClientCredentials) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            credentials,
        }
    }
}

/// TikTok wraps most payloads in a `data` envelope.
fn unwrap_data(body: &Value) -> &Value {
    body.get("data").filter(|d| d.is_object()).unwrap_or(body)
}

#[async_trait]
impl PlatformAdapter for TiktokAdapter {
    fn platform(&self) -> Platform {
        PLATFORM
    }

    async fn publish(
        &self,
        item: &ContentItem,
        account: &PlatformAccount,
    ) -> Result<PublishReceipt, PlatformError> {
        self.validate(item)?;

        let body = send_json(
            PLATFORM,
            self.http
                .post(format!("{}/video/upload/", self.base_url))
                .bearer_auth(&account.access_token)
                .json(&json!({
                    "video_url": item.media_url,
                    "description": item.composed_text(),
                })),
        )
        .await?;

        let remote_id = id_at(PLATFORM, &body, "/data/video_id")?;
        info!(item_id = item.id, %remote_id, "published to tiktok");
        Ok(PublishReceipt {
            remote_url: format!(
                "https://www.tiktok.com/@{}/video/{}",
                account.username, remote_id
            ),
            remote_id,
        })
    }

    async fn refresh_token(&self, account: &PlatformAccount) -> Result<TokenGrant, PlatformError> {
        let refresh_token = require_refresh_token(account)?;

        let body = send_json(
            PLATFORM,
            self.http
                .post(format!("{}/oauth/token/", self.base_url))
                .form(&[
                    ("client_key", self.credentials.client_id.as_str()),
                    ("client_secret", self.credentials.client_secret.as_str()),
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh_token),
                ]),
        )
        .await
        .map_err(|e| refresh_failure(PLATFORM, e))?;

        token_grant(PLATFORM, unwrap_data(&body), Utc::now())
    }

    async fn account_details(
        &self,
        account: &PlatformAccount,
    ) -> Result<ProfileInfo, PlatformError> {
        let body = send_json(
            PLATFORM,
            self.http
                .get(format!("{}/user/info/", self.base_url))
                .bearer_auth(&account.access_token)
                .query(&[("fields", "open_id,username,display_name,follower_count")]),
        )
        .await?;

        let user = body.pointer("/data/user").unwrap_or(&Value::Null);
        let username = user.get("username").and_then(Value::as_str).map(String::from);
        Ok(ProfileInfo {
            remote_id: id_at(PLATFORM, &body, "/data/user/open_id")?,
            profile_url: username
                .as_ref()
                .map(|u| format!("https://www.tiktok.com/@{}", u)),
            username,
            display_name: user
                .get("display_name")
                .and_then(Value::as_str)
                .map(String::from),
            followers: user.get("follower_count").and_then(Value::as_u64),
        })
    }
}
