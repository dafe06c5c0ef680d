//! Client configuration loaded from environment variables.
//!
//! The backend URL and public key are required; without them no backend
//! connection is possible, so their absence stops the client at startup.
//! Everything else has a default.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use anonchat_net::BackendConfig;
use anonchat_shared::constants::DEFAULT_REALTIME_CHANNEL;

pub const ENV_URL: &str = "ANONCHAT_URL";
pub const ENV_ANON_KEY: &str = "ANONCHAT_ANON_KEY";
pub const ENV_DATA_DIR: &str = "ANONCHAT_DATA_DIR";
pub const ENV_CHANNEL: &str = "ANONCHAT_CHANNEL";
pub const ENV_REQUEST_TIMEOUT: &str = "ANONCHAT_REQUEST_TIMEOUT_SECS";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend project URL.
    /// Env: `ANONCHAT_URL` (required)
    pub url: String,

    /// Public API key of the backend.
    /// Env: `ANONCHAT_ANON_KEY` (required)
    pub anon_key: String,

    /// Directory of the local state database.
    /// Env: `ANONCHAT_DATA_DIR`
    /// Default: the platform data directory.
    pub data_dir: Option<PathBuf>,

    /// Realtime channel name.
    /// Env: `ANONCHAT_CHANNEL`
    /// Default: `messages-channel`
    pub channel: String,

    /// Per-request timeout for backend calls.
    /// Env: `ANONCHAT_REQUEST_TIMEOUT_SECS`
    /// Default: none, calls wait as long as the backend takes.
    pub request_timeout: Option<Duration>,
}

impl ClientConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |var: &'static str| {
            lookup(var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::Missing(var))
        };

        let url = required(ENV_URL)?;
        let anon_key = required(ENV_ANON_KEY)?;

        let data_dir = lookup(ENV_DATA_DIR)
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        let channel = lookup(ENV_CHANNEL)
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_REALTIME_CHANNEL.to_string());

        let request_timeout = match lookup(ENV_REQUEST_TIMEOUT) {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(0) => None,
                Ok(secs) => Some(Duration::from_secs(secs)),
                Err(_) => {
                    tracing::warn!(
                        value = %raw,
                        "Invalid {ENV_REQUEST_TIMEOUT}, using no timeout"
                    );
                    None
                }
            },
            None => None,
        };

        Ok(Self {
            url,
            anon_key,
            data_dir,
            channel,
            request_timeout,
        })
    }

    /// Connection settings for the gateway. Fails on a malformed URL.
    pub fn backend(&self) -> Result<BackendConfig, ConfigError> {
        let backend = BackendConfig::new(&self.url, self.anon_key.clone()).map_err(|e| {
            ConfigError::Invalid {
                var: ENV_URL,
                reason: e.to_string(),
            }
        })?;
        Ok(backend
            .with_channel(self.channel.clone())
            .with_request_timeout(self.request_timeout))
    }
}
