//! # watchlog-stream — Async transport for the reconciliation engine
//!
//! Connects a [`watchlog_core::Reconciler`] to a log backend:
//!
//! ```text
//!  StreamHandle ──control──► StreamDriver ──► Reconciler
//!       ▲                      │      ▲
//!       │ watch<StreamView>    │      ├── LiveChannel   (WebSocket /ws)
//!       └──────────────────────┘      └── HistoricalFetcher (HTTP /v1/logs*)
//! ```
//!
//! ## Modules
//!
//! - [`driver`] — Event loop, handle and published view
//! - [`live`] — Live channel trait and WebSocket implementation
//! - [`fetcher`] — Historical fetcher trait and response decoding
//! - [`http`] — HTTP fetcher
//! - [`backoff`] — Reconnect delays
//! - [`config`] — JSON configuration

pub mod backoff;
pub mod config;
pub mod driver;
pub mod fetcher;
pub mod http;
pub mod live;

pub use backoff::BackoffConfig;
pub use config::{ConfigError, StreamConfig};
pub use driver::{HandleError, StreamDriver, StreamHandle, StreamView};
pub use fetcher::{parse_records, HistoricalFetcher};
pub use http::HttpFetcher;
pub use live::{LiveChannel, LiveConnection, LiveEvent, WsLiveChannel};

/// Start a driver against the backend described by `config`, using the HTTP
/// fetcher and the WebSocket live channel.
pub fn connect(config: &StreamConfig) -> Result<StreamHandle, ConfigError> {
    config.validate()?;
    let fetcher = HttpFetcher::new(config)?;
    let channel = WsLiveChannel::new(config.live_url()?);
    log::info!(
        "Streaming from {} (live: {})",
        fetcher.base_url(),
        channel.url()
    );
    Ok(StreamDriver::spawn(config, fetcher, channel))
}
