//! Platform adapters for Herald.
//!
//! Each supported platform has one [`PlatformAdapter`] implementation that
//! knows how to publish, refresh OAuth tokens and read profile details. The
//! [`AdapterRegistry`] maps platform tags to adapters and fails closed for
//! anything it does not know. [`TokenManager`] wraps token refresh so every
//! adapter goes through the same read-check-refresh-write sequence.
//!
//! Errors carry a [`FailureClass`] so callers can tell retryable failures from
//! terminal ones without inspecting messages.

mod adapter;
pub mod adapters;
mod config;
mod error;
mod http;
mod registry;
mod token;

pub use adapter::{PlatformAdapter, ProfileInfo, content_limit, requires_media, validate_content};
pub use config::{
    AdapterConfig, ClientCredentials, DEFAULT_TOKEN_LOOKAHEAD, PlatformCredentials,
    PlatformEndpoints,
};
pub use error::{FailureClass, PlatformError};
pub use registry::AdapterRegistry;
pub use token::{TokenCheck, TokenManager};
