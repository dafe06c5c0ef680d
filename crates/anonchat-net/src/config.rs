use std::time::Duration;

use url::Url;

use anonchat_shared::constants::DEFAULT_REALTIME_CHANNEL;

use crate::error::Result;

/// Connection settings for the hosted backend.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Project base URL, always ending in `/`.
    pub url: Url,
    /// Public (anonymous) API key, sent as `apikey` and bearer token.
    pub anon_key: String,
    /// Realtime channel name.
    pub channel: String,
    /// Per-request timeout. `None` waits indefinitely.
    pub request_timeout: Option<Duration>,
}

impl BackendConfig {
    pub fn new(url: &str, anon_key: impl Into<String>) -> Result<Self> {
        let mut normalised = url.trim().to_string();
        if !normalised.ends_with('/') {
            normalised.push('/');
        }
        Ok(Self {
            url: Url::parse(&normalised)?,
            anon_key: anon_key.into(),
            channel: DEFAULT_REALTIME_CHANNEL.to_string(),
            request_timeout: None,
        })
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// `{base}rest/v1/{path}`
    pub fn rest_url(&self, path: &str) -> Result<Url> {
        Ok(self.url.join(&format!("rest/v1/{path}"))?)
    }

    /// `ws(s)://{host}/realtime/v1/websocket?apikey=..&vsn=1.0.0`
    pub fn realtime_url(&self) -> Result<Url> {
        let mut url = self.url.join("realtime/v1/websocket")?;
        let scheme = match url.scheme() {
            "https" => "wss",
            "http" => "ws",
            other => other,
        }
        .to_string();
        // http(s) -> ws(s) is always an allowed scheme change
        let _ = url.set_scheme(&scheme);
        url.query_pairs_mut()
            .append_pair("apikey", &self.anon_key)
            .append_pair("vsn", "1.0.0");
        Ok(url)
    }
}
