//! Instagram Graph API adapter.
//!
//! Publishing is two calls: create a media container, then publish it.

use async_trait::async_trait;
use chrono::Utc;
use herald_store::{ContentItem, Platform, PlatformAccount, PublishReceipt, TokenGrant};
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::ClientCredentials;
use crate::http::{id_at, refresh_failure, send_json, token_grant};
use crate::{PlatformAdapter, PlatformError, ProfileInfo};

const PLATFORM: Platform = Platform::Instagram;

pub struct InstagramAdapter {
    http: Client,
    base_url: String,
    credentials: ClientCredentials,
}

impl InstagramAdapter {
    pub fn new(http: Client, base_url: impl Into<String>, credentials: ClientCredentials) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            credentials,
        }
    }
}

#[async_trait]
impl PlatformAdapter for InstagramAdapter {
    fn platform(&self) -> Platform {
        PLATFORM
    }

    async fn publish(
        &self,
        item: &ContentItem,
        account: &PlatformAccount,
    ) -> Result<PublishReceipt, PlatformError> {
        self.validate(item)?;
        let image_url = item.media_url.as_deref().unwrap_or_default();

        let container = send_json(
            PLATFORM,
            self.http
                .post(format!("{}/{}/media", self.base_url, account.remote_account_id))
                .bearer_auth(&account.access_token)
                .form(&[("caption", item.composed_text().as_str()), ("image_url", image_url)]),
        )
        .await?;
        let creation_id = id_at(PLATFORM, &container, "/id")?;
        debug!(item_id = item.id, %creation_id, "created instagram media container");

        let published = send_json(
            PLATFORM,
            self.http
                .post(format!(
                    "{}/{}/media_publish",
                    self.base_url, account.remote_account_id
                ))
                .bearer_auth(&account.access_token)
                .form(&[("creation_id", creation_id.as_str())]),
        )
        .await?;

        let remote_id = id_at(PLATFORM, &published, "/id")?;
        info!(item_id = item.id, %remote_id, "published to instagram");
        Ok(PublishReceipt {
            remote_url: format!("https://instagram.com/p/{}", remote_id),
            remote_id,
        })
    }

    async fn refresh_token(&self, account: &PlatformAccount) -> Result<TokenGrant, PlatformError> {
        let url = format!("{}/oauth/access_token", self.base_url);
        let body = send_json(
            PLATFORM,
            self.http.get(&url).query(&[
                ("grant_type", "ig_exchange_token"),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("access_token", account.access_token.as_str()),
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
                .get(format!("{}/{}", self.base_url, account.remote_account_id))
                .bearer_auth(&account.access_token)
                .query(&[("fields", "id,username,followers_count")]),
        )
        .await?;

        let username = body.get("username").and_then(Value::as_str).map(String::from);
        Ok(ProfileInfo {
            remote_id: id_at(PLATFORM, &body, "/id")?,
            profile_url: username
                .as_ref()
                .map(|u| format!("https://instagram.com/{}", u)),
            display_name: username.clone(),
            username,
            followers: body.get("followers_count").and_then(Value::as_u64),
        })
    }
}
