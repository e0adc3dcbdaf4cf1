//! Facebook Graph API adapter.

use async_trait::async_trait;
use chrono::Utc;
use herald_store::{ContentItem, Platform, PlatformAccount, PublishReceipt, TokenGrant};
use reqwest::Client;
use serde_json::Value;
use tracing::info;

use crate::config::ClientCredentials;
use crate::http::{id_at, refresh_failure, send_json, token_grant};
use crate::{PlatformAdapter, PlatformError, ProfileInfo};

const PLATFORM: Platform = Platform::Facebook;

/// Publishes to a page or profile feed.
pub struct FacebookAdapter {
    http: Client,
    base_url: String,
    credentials: ClientCredentials,
}

impl FacebookAdapter {
    pub fn new(http: Client, base_url: impl Into<String>, credentials: ClientCredentials) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            credentials,
        }
    }
}

#[async_trait]
impl PlatformAdapter for FacebookAdapter {
    fn platform(&self) -> Platform {
        PLATFORM
    }

    async fn publish(
        &self,
        item: &ContentItem,
        account: &PlatformAccount,
    ) -> Result<PublishReceipt, PlatformError> {
        self.validate(item)?;

        let url = format!("{}/{}/feed", self.base_url, account.remote_account_id);
        let mut form = vec![("message", item.composed_text())];
        if let Some(link) = item.media_url.as_deref() {
            form.push(("link", link.to_string()));
        }

        let body = send_json(
            PLATFORM,
            self.http
                .post(&url)
                .bearer_auth(&account.access_token)
                .form(&form),
        )
        .await?;

        let remote_id = id_at(PLATFORM, &body, "/id")?;
        info!(item_id = item.id, %remote_id, "published to facebook");
        Ok(PublishReceipt {
            remote_url: format!("https://facebook.com/{}", remote_id),
            remote_id,
        })
    }

    async fn refresh_token(&self, account: &PlatformAccount) -> Result<TokenGrant, PlatformError> {
        // Long-lived token exchange; no refresh token involved
        let url = format!("{}/oauth/access_token", self.base_url);
        let body = send_json(
            PLATFORM,
            self.http.get(&url).query(&[
                ("grant_type", "fb_exchange_token"),
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("fb_exchange_token", account.access_token.as_str()),
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
        let url = format!("{}/me", self.base_url);
        let body = send_json(
            PLATFORM,
            self.http
                .get(&url)
                .bearer_auth(&account.access_token)
                .query(&[("fields", "id,name")]),
        )
        .await?;

        let remote_id = id_at(PLATFORM, &body, "/id")?;
        Ok(ProfileInfo {
            profile_url: Some(format!("https://facebook.com/{}", remote_id)),
            remote_id,
            username: None,
            display_name: body.get("name").and_then(Value::as_str).map(String::from),
            followers: None,
        })
    }
}
