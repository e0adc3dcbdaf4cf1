//! LinkedIn Posts API adapter.

use async_trait::async_trait;
use chrono::Utc;
use herald_store::{ContentItem, Platform, PlatformAccount, PublishReceipt, TokenGrant};
use reqwest::Client;
use serde_json::{Value, json};
use tracing::info;

use crate::config::ClientCredentials;
use crate::http::{id_at, refresh_failure, require_refresh_token, send, send_json, token_grant};
use crate::{PlatformAdapter, PlatformError, ProfileInfo};

const PLATFORM: Platform = Platform::Linkedin;

pub struct LinkedinAdapter {
    http: Client,
    base_url: String,
    oauth_url: String,
    credentials: ClientCredentials,
}

impl LinkedinAdapter {
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

#[async_trait]
impl PlatformAdapter for LinkedinAdapter {
    fn platform(&self) -> Platform {
        PLATFORM
    }

    async fn publish(
        &self,
        item: &ContentItem,
        account: &PlatformAccount,
    ) -> Result<PublishReceipt, PlatformError> {
        self.validate(item)?;

        let payload = json!({
            "author": format!("urn:li:person:{}", account.remote_account_id),
            "commentary": item.composed_text(),
            "visibility": "PUBLIC",
            "distribution": { "feedDistribution": "MAIN_FEED" },
            "lifecycleState": "PUBLISHED",
        });

        let response = send(
            PLATFORM,
            self.http
                .post(format!("{}/rest/posts", self.base_url))
                .bearer_auth(&account.access_token)
                .header("X-Restli-Protocol-Version", "2.0.0")
                .json(&payload),
        )
        .await?;

        // The post URN comes back in a header; older API versions put it in the body
        let header_id = response
            .headers()
            .get("x-restli-id")
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let remote_id = match header_id {
            Some(id) => id,
            None => {
                let body: Value = response.json().await.unwrap_or(Value::Null);
                id_at(PLATFORM, &body, "/id")?
            }
        };

        info!(item_id = item.id, %remote_id, "published to linkedin");
        Ok(PublishReceipt {
            remote_url: format!("https://www.linkedin.com/feed/update/{}", remote_id),
            remote_id,
        })
    }

    async fn refresh_token(&self, account: &PlatformAccount) -> Result<TokenGrant, PlatformError> {
        let refresh_token = require_refresh_token(account)?;

        let body = send_json(
            PLATFORM,
            self.http
                .post(format!("{}/accessToken", self.oauth_url))
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
                .get(format!("{}/v2/userinfo", self.base_url))
                .bearer_auth(&account.access_token),
        )
        .await?;

        Ok(ProfileInfo {
            remote_id: id_at(PLATFORM, &body, "/sub")?,
            username: body.get("email").and_then(Value::as_str).map(String::from),
            display_name: body.get("name").and_then(Value::as_str).map(String::from),
            followers: None,
            profile_url: None,
        })
    }
}
