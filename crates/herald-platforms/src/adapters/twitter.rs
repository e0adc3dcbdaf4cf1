//! Twitter (X) API v2 adapter.

use async_trait::async_trait;
use chrono::Utc;
use herald_store::{ContentItem, Platform, PlatformAccount, PublishReceipt, TokenGrant};
use reqwest::Client;
use serde_json::{Value, json};
use tracing::info;

use crate::config::ClientCredentials;
use crate::http::{id_at, refresh_failure, require_refresh_token, send_json, token_grant};
use crate::{PlatformAdapter, PlatformError, ProfileInfo};

const PLATFORM: Platform = Platform::Twitter;

pub struct TwitterAdapter {
    http: Client,
    base_url: String,
    credentials: ClientCredentials,
}

impl TwitterAdapter {
    pub fn new(http: Client, base_url: impl Into<String>, credentials: ClientCredentials) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            credentials,
        }
    }
}

#[async_trait]
impl PlatformAdapter for TwitterAdapter {
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
                .post(format!("{}/tweets", self.base_url))
                .bearer_auth(&account.access_token)
                .json(&json!({ "text": item.composed_text() })),
        )
        .await?;

        let remote_id = id_at(PLATFORM, &body, "/data/id")?;
        info!(item_id = item.id, %remote_id, "published tweet");
        Ok(PublishReceipt {
            remote_url: format!("https://twitter.com/user/status/{}", remote_id),
            remote_id,
        })
    }

    async fn refresh_token(&self, account: &PlatformAccount) -> Result<TokenGrant, PlatformError> {
        let refresh_token = require_refresh_token(account)?;

        let body = send_json(
            PLATFORM,
            self.http
                .post(format!("{}/oauth2/token", self.base_url))
                .basic_auth(
                    &self.credentials.client_id,
                    Some(&self.credentials.client_secret),
                )
                .form(&[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh_token),
                    ("client_id", self.credentials.client_id.as_str()),
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
                .get(format!("{}/users/me", self.base_url))
                .bearer_auth(&account.access_token)
                .query(&[("user.fields", "public_metrics")]),
        )
        .await?;

        let username = body
            .pointer("/data/username")
            .and_then(Value::as_str)
            .map(String::from);
        Ok(ProfileInfo {
            remote_id: id_at(PLATFORM, &body, "/data/id")?,
            profile_url: username.as_ref().map(|u| format!("https://twitter.com/{}", u)),
            username,
            display_name: body
                .pointer("/data/name")
                .and_then(Value::as_str)
                .map(String::from),
            followers: body
                .pointer("/data/public_metrics/followers_count")
                .and_then(Value::as_u64),
        })
    }
}
