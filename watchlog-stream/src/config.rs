//! Stream client configuration.
//!
//! Loaded from JSON; every field has a default so a partial file (or `{}`)
//! is valid:
//! ```json
//! {
//!   "base_url": "http://localhost:8080",
//!   "capacity": 100,
//!   "reconnect": { "initial_delay_ms": 250, "max_delay_ms": 30000 }
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backoff::BackoffConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Backend HTTP base URL.
    pub base_url: String,
    /// Live channel URL. Derived from `base_url` when unset.
    pub ws_url: Option<String>,
    /// Maximum number of records kept for display.
    pub capacity: usize,
    /// Timeout for each historical fetch.
    pub request_timeout_secs: u64,
    /// Reconnect backoff for the live channel.
    pub reconnect: BackoffConfig,
    /// Depth of the operator control queue.
    pub control_buffer: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            ws_url: None,
            capacity: watchlog_core::DEFAULT_CAPACITY,
            request_timeout_secs: 10,
            reconnect: BackoffConfig::default(),
            control_buffer: 64,
        }
    }
}

impl StreamConfig {
    /// Config pointed at `base_url`, defaults otherwise.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::Invalid("capacity must be at least 1".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be at least 1".into(),
            ));
        }
        if self.control_buffer == 0 {
            return Err(ConfigError::Invalid("control_buffer must be at least 1".into()));
        }
        if self.reconnect.max_delay_ms < self.reconnect.initial_delay_ms {
            return Err(ConfigError::Invalid(
                "reconnect.max_delay_ms is below reconnect.initial_delay_ms".into(),
            ));
        }

        let base = parse_url(&self.base_url)?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "base_url must be http or https, got '{}'",
                base.scheme()
            )));
        }
        self.live_url()?;
        Ok(())
    }

    /// Live channel URL: `ws_url` if set, otherwise `base_url` with the
    /// scheme switched to ws/wss and `/ws` appended to the path.
    pub fn live_url(&self) -> Result<String, ConfigError> {
        if let Some(ws_url) = &self.ws_url {
            let url = parse_url(ws_url)?;
            if !matches!(url.scheme(), "ws" | "wss") {
                return Err(ConfigError::Invalid(format!(
                    "ws_url must be ws or wss, got '{}'",
                    url.scheme()
                )));
            }
            return Ok(url.to_string());
        }

        let mut url = parse_url(&self.base_url)?;
        let scheme = match url.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|_| ConfigError::Invalid(format!("cannot derive ws url from {url}")))?;
        let path = format!("{}/ws", url.path().trim_end_matches('/'));
        url.set_path(&path);
        Ok(url.to_string())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn parse_url(raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|e| ConfigError::Invalid(format!("bad url '{raw}': {e}")))
}
