//! The capability contract every platform adapter implements.

use async_trait::async_trait;
use herald_store::{ContentItem, Platform, PlatformAccount, PublishReceipt, TokenGrant};
use serde::{Deserialize, Serialize};

use crate::PlatformError;

/// Maximum composed-text length a platform accepts, in characters.
pub const fn content_limit(platform: Platform) -> usize {
    match platform {
        Platform::Facebook => 63_206,
        Platform::Instagram => 2_200,
        Platform::Twitter => 280,
        Platform::Linkedin => 3_000,
        Platform::Tiktok => 2_200,
        Platform::Youtube => 5_000,
    }
}

/// Whether a platform only accepts posts with an attached image or video.
pub const fn requires_media(platform: Platform) -> bool {
    matches!(
        platform,
        Platform::Instagram | Platform::Tiktok | Platform::Youtube
    )
}

/// Check an item against a platform's rules without touching the network.
pub fn validate_content(platform: Platform, item: &ContentItem) -> Result<(), PlatformError> {
    let length = item.composed_text().chars().count();
    let limit = content_limit(platform);
    if length > limit {
        return Err(PlatformError::ContentValidation {
            platform,
            reason: format!("{} characters exceeds the {} character limit", length, limit),
        });
    }

    let has_media = item.media_url.as_deref().is_some_and(|u| !u.trim().is_empty());
    if requires_media(platform) && !has_media {
        return Err(PlatformError::ContentValidation {
            platform,
            reason: "a media attachment is required".to_string(),
        });
    }

    Ok(())
}

/// Read-only profile summary for account-status surfaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileInfo {
    pub remote_id: String,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub followers: Option<u64>,
    pub profile_url: Option<String>,
}

/// One publishing platform.
///
/// Adapters are stateless strategies keyed by [`Platform`]; the registry maps
/// each tag to exactly one implementation. Token freshness is handled by
/// [`crate::TokenManager`], which calls back into [`refresh_token`].
///
/// [`refresh_token`]: PlatformAdapter::refresh_token
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    fn max_content_length(&self) -> usize {
        content_limit(self.platform())
    }

    /// Reject content this platform would refuse. Runs before any network call.
    fn validate(&self, item: &ContentItem) -> Result<(), PlatformError> {
        validate_content(self.platform(), item)
    }

    /// Publish the item with the account's current access token.
    async fn publish(
        &self,
        item: &ContentItem,
        account: &PlatformAccount,
    ) -> Result<PublishReceipt, PlatformError>;

    /// Exchange the account's credentials for a fresh access token.
    async fn refresh_token(&self, account: &PlatformAccount) -> Result<TokenGrant, PlatformError>;

    async fn account_details(&self, account: &PlatformAccount)
    -> Result<ProfileInfo, PlatformError>;
}
