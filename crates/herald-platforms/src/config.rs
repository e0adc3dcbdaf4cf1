//! Adapter configuration: API base URLs and OAuth client credentials.

use std::time::Duration;

use herald_store::Platform;

/// Default lookahead before token expiry that triggers a refresh.
pub const DEFAULT_TOKEN_LOOKAHEAD: Duration = Duration::from_secs(60 * 60);

/// Base URLs for each platform API.
///
/// Defaults point at the production APIs. Tests point them all at a mock server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformEndpoints {
    pub facebook: String,
    pub instagram: String,
    pub twitter: String,
    pub linkedin: String,
    pub linkedin_oauth: String,
    pub tiktok: String,
    pub youtube: String,
    pub google_oauth: String,
}

impl Default for PlatformEndpoints {
    fn default() -> Self {
        Self {
            facebook: "https://graph.facebook.com/v18.0".to_string(),
            instagram: "https://graph.facebook.com/v18.0".to_string(),
            twitter: "https://api.twitter.com/2".to_string(),
            linkedin: "https://api.linkedin.com".to_string(),
            linkedin_oauth: "https://www.linkedin.com/oauth/v2".to_string(),
            tiktok: "https://open.tiktokapis.com/v2".to_string(),
            youtube: "https://www.googleapis.com".to_string(),
            google_oauth: "https://oauth2.googleapis.com".to_string(),
        }
    }
}

impl PlatformEndpoints {
    /// Every endpoint rooted at the same base URL.
    pub fn uniform(base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            facebook: base.clone(),
            instagram: base.clone(),
            twitter: base.clone(),
            linkedin: base.clone(),
            linkedin_oauth: base.clone(),
            tiktok: base.clone(),
            youtube: base.clone(),
            google_oauth: base,
        }
    }
}

/// OAuth application credentials for one platform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl ClientCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

/// OAuth application credentials for every platform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlatformCredentials {
    pub facebook: ClientCredentials,
    pub instagram: ClientCredentials,
    pub twitter: ClientCredentials,
    pub linkedin: ClientCredentials,
    pub tiktok: ClientCredentials,
    pub youtube: ClientCredentials,
}

impl PlatformCredentials {
    pub fn get(&self, platform: Platform) -> &ClientCredentials {
        match platform {
            Platform::Facebook => &self.facebook,
            Platform::Instagram => &self.instagram,
            Platform::Twitter => &self.twitter,
            Platform::Linkedin => &self.linkedin,
            Platform::Tiktok => &self.tiktok,
            Platform::Youtube => &self.youtube,
        }
    }

    pub fn get_mut(&mut self, platform: Platform) -> &mut ClientCredentials {
        match platform {
            Platform::Facebook => &mut self.facebook,
            Platform::Instagram => &mut self.instagram,
            Platform::Twitter => &mut self.twitter,
            Platform::Linkedin => &mut self.linkedin,
            Platform::Tiktok => &mut self.tiktok,
            Platform::Youtube => &mut self.youtube,
        }
    }
}

/// Everything needed to build the adapter registry.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub endpoints: PlatformEndpoints,
    pub credentials: PlatformCredentials,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            endpoints: PlatformEndpoints::default(),
            credentials: PlatformCredentials::default(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}
