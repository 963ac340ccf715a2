//! Client configuration loaded from environment variables.
//!
//! Every setting has a default pointing at a local backend, so the client
//! starts with nothing but `PARLOR_TOKEN` set.

use std::time::Duration;

use parlor_chat::SessionConfig;
use parlor_shared::constants::{
    DEFAULT_API_URL, DEFAULT_POLL_INTERVAL_MS, DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_WS_URL,
};
use parlor_shared::types::UserId;

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// REST base URL.
    /// Env: `PARLOR_API_URL`
    /// Default: `http://127.0.0.1:5000/api`
    pub api_url: String,

    /// Live channel URL; `None` disables it and the client relies on polling.
    /// Env: `PARLOR_WS_URL` (`off` or empty disables)
    /// Default: `ws://127.0.0.1:5000/ws`
    pub ws_url: Option<String>,

    /// Signed-in user, when already known. Otherwise it is fetched from the
    /// backend after the conversation opens.
    /// Env: `PARLOR_USER_ID`
    pub user_id: Option<UserId>,

    /// Env: `PARLOR_POLL_INTERVAL_MS`
    /// Default: `2500`
    pub poll_interval: Duration,

    /// Env: `PARLOR_REQUEST_TIMEOUT_SECS`
    /// Default: `12`
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            ws_url: Some(DEFAULT_WS_URL.to_string()),
            user_id: None,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("PARLOR_API_URL") {
            if !url.trim().is_empty() {
                config.api_url = url.trim().to_string();
            }
        }

        if let Some(url) = lookup("PARLOR_WS_URL") {
            let url = url.trim();
            config.ws_url = match url {
                "" | "off" | "none" => None,
                url => Some(url.to_string()),
            };
        }

        if let Some(id) = lookup("PARLOR_USER_ID") {
            config.user_id = UserId::parse(id);
        }

        if let Some(val) = lookup("PARLOR_POLL_INTERVAL_MS") {
            match val.trim().parse::<u64>() {
                Ok(ms) => config.poll_interval = Duration::from_millis(ms),
                Err(_) => tracing::warn!(value = %val, "Invalid PARLOR_POLL_INTERVAL_MS, using default"),
            }
        }

        if let Some(val) = lookup("PARLOR_REQUEST_TIMEOUT_SECS") {
            match val.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => config.request_timeout = Duration::from_secs(secs),
                _ => tracing::warn!(value = %val, "Invalid PARLOR_REQUEST_TIMEOUT_SECS, using default"),
            }
        }

        config
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            poll_interval: self.poll_interval,
            request_timeout: self.request_timeout,
            ..SessionConfig::default()
        }
    }
}
