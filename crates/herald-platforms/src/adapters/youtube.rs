//! YouTube Data API adapter.
//!
//! Uses a resumable upload: open a session with the video metadata, fetch the
//! media from the item's URL, then upload it to the session.

use async_trait::async_trait;
use chrono::Utc;
use herald_store::{ContentItem, Platform, PlatformAccount, PublishReceipt, TokenGrant};
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::config::ClientCredentials;
use crate::http::{id_at, refresh_failure, require_refresh_token, send, send_json, token_grant};
use crate::{PlatformAdapter, PlatformError, ProfileInfo};

const PLATFORM: Platform = Platform::Youtube;

const TITLE_LIMIT: usize = 100;

/// People & Blogs.
const CATEGORY_ID: &str = "22";

pub struct YoutubeAdapter {
    http: Client,
    base_url: String,
    oauth_url: String,
    credentials: ClientCredentials,
}

impl YoutubeAdapter {
    pub fn new(
        http: Client,
        base_url: impl Into<String>,
        oauth_url: impl Into<String>,
        credentials: ClientCredentials,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            oauth_url: oauth_url.into(),
            credentials,
        }
    }
}

fn video_metadata(item: &ContentItem) -> Value {
    let title: String = item.body.chars().take(TITLE_LIMIT).collect();
    let tags: Vec<String> = item
        .hashtags
        .as_deref()
        .unwrap_or_default()
        .split_whitespace()
        .map(|t| t.trim_start_matches('#').to_string())
        .filter(|t| !t.is_empty())
        .collect();

    json!({
        "snippet": {
            "title": title,
            "description": item.composed_text(),
            "categoryId": CATEGORY_ID,
            "tags": tags,
        },
        "status": { "privacyStatus": "public" },
    })
}

#[async_trait]
impl PlatformAdapter for YoutubeAdapter {
    fn platform(&self) -> Platform {
        PLATFORM
    }

    async fn publish(
        &self,
        item: &ContentItem,
        account: &PlatformAccount,
    ) -> Result<PublishReceipt, PlatformError> {
        self.validate(item)?;
        let media_url = item.media_url.as_deref().unwrap_or_default();

        let session = send(
            PLATFORM,
            self.http
                .post(format!("{}/upload/youtube/v3/videos", self.base_url))
                .bearer_auth(&account.access_token)
                .query(&[("uploadType", "resumable"), ("part", "snippet,status")])
                .header("X-Upload-Content-Type", "video/*")
                .json(&video_metadata(item)),
        )
        .await?;
        let upload_url = session
            .headers()
            .get("Location")
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .ok_or_else(|| PlatformError::UnexpectedResponse {
                platform: PLATFORM,
                message: "upload session has no Location header".to_string(),
            })?;
        debug!(item_id = item.id, "opened youtube upload session");

        let media = send(PLATFORM, self.http.get(media_url)).await?.bytes().await?;

        let body = send_json(
            PLATFORM,
            self.http
                .put(&upload_url)
                .bearer_auth(&account.access_token)
                .header("Content-Type", "video/*")
                .body(media),
        )
        .await?;

        let remote_id = id_at(PLATFORM, &body, "/id")?;
        info!(item_id = item.id, %remote_id, "published to youtube");
        Ok(PublishReceipt {
            remote_url: format!("https://www.youtube.com/watch?v={}", remote_id),
            remote_id,
        })
    }

    async fn refresh_token(&self, account: &PlatformAccount) -> Result<TokenGrant, PlatformError> {
        let refresh_token = require_refresh_token(account)?;

        let body = send_json(
            PLATFORM,
            self.http
                .post(format!("{}/token", self.oauth_url))
                .form(&[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh_token),
                    ("client_id", self.credentials.client_id.as_str()),
                    ("client_secret", self.credentials.client_secret.as_str()),
                ]),
        )
        .await
        .map_err(|e| refresh_failure(PLATFORM, e))?;

        token_grant(PLATFORM, &body, Utc::now())
    }

    async fn account_details(
        &self,
        account: &PlatformAccount,
    ) -> Result<ProfileInfo, PlatformError> {
        let body = send_json(
            PLATFORM,
            self.http
                .get(format!("{}/youtube/v3/channels", self.base_url))
                .bearer_auth(&account.access_token)
                .query(&[("part", "snippet,statistics"), ("mine", "true")]),
        )
        .await?;

        let channel = body.pointer("/items/0").unwrap_or(&Value::Null);
        let remote_id = id_at(PLATFORM, &body, "/items/0/id")?;
        Ok(ProfileInfo {
            profile_url: Some(format!("https://www.youtube.com/channel/{}", remote_id)),
            remote_id,
            username: channel
                .pointer("/snippet/customUrl")
                .and_then(Value::as_str)
                .map(String::from),
            display_name: channel
                .pointer("/snippet/title")
                .and_then(Value::as_str)
                .map(String::from),
            // The API reports counts as strings
            followers: channel
                .pointer("/statistics/subscriberCount")
                .and_then(Value::as_str)
                .and_then(|s| s.parse().ok()),
        })
    }
}
