//! Tagged-variant registry mapping each platform to its adapter.

use std::collections::HashMap;
use std::sync::Arc;

use herald_store::Platform;
use reqwest::Client;
use tracing::debug;

use crate::adapters::{
    FacebookAdapter, InstagramAdapter, LinkedinAdapter, TiktokAdapter, TwitterAdapter,
    YoutubeAdapter,
};
use crate::{AdapterConfig, PlatformAdapter, PlatformError};

/// Resolves a platform tag to its adapter. Read-only once built.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<Platform, Arc<dyn PlatformAdapter>>,
}

impl AdapterRegistry {
    /// A registry with no adapters; every lookup fails.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build the HTTP adapters for every platform, sharing one client.
    pub fn from_config(config: &AdapterConfig) -> Result<Self, PlatformError> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;

        let endpoints = &config.endpoints;
        let creds = &config.credentials;

        Ok(Self::empty()
            .with(Arc::new(FacebookAdapter::new(
                http.clone(),
                &endpoints.facebook,
                creds.facebook.clone(),
            )))
            .with(Arc::new(InstagramAdapter::new(
                http.clone(),
                &endpoints.instagram,
                creds.instagram.clone(),
            )))
            .with(Arc::new(TwitterAdapter::new(
                http.clone(),
                &endpoints.twitter,
                creds.twitter.clone(),
            )))
            .with(Arc::new(LinkedinAdapter::new(
                http.clone(),
                &endpoints.linkedin,
                &endpoints.linkedin_oauth,
                creds.linkedin.clone(),
            )))
            .with(Arc::new(TiktokAdapter::new(
                http.clone(),
                &endpoints.tiktok,
                creds.tiktok.clone(),
            )))
            .with(Arc::new(YoutubeAdapter::new(
                http,
                &endpoints.youtube,
                &endpoints.google_oauth,
                creds.youtube.clone(),
            ))))
    }

    /// Register an adapter under its own platform tag, replacing any previous one.
    pub fn with(mut self, adapter: Arc<dyn PlatformAdapter>) -> Self {
        let platform = adapter.platform();
        debug!(%platform, "registered platform adapter");
        self.adapters.insert(platform, adapter);
        self
    }

    /// The adapter for `platform`.
    pub fn get(&self, platform: Platform) -> Result<Arc<dyn PlatformAdapter>, PlatformError> {
        self.adapters
            .get(&platform)
            .cloned()
            .ok_or_else(|| PlatformError::UnsupportedPlatform(platform.to_string()))
    }

    /// The adapter for a free-form platform tag.
    pub fn resolve(&self, tag: &str) -> Result<Arc<dyn PlatformAdapter>, PlatformError> {
        let platform: Platform = tag
            .parse()
            .map_err(|_| PlatformError::UnsupportedPlatform(tag.to_string()))?;
        self.get(platform)
    }

    /// Registered platforms in a stable order.
    pub fn platforms(&self) -> Vec<Platform> {
        Platform::ALL
            .into_iter()
            .filter(|p| self.adapters.contains_key(p))
            .collect()
    }
}
