//! HTTP adapter for the historical fetcher.
//!
//! ```text
//! FetchQuery::Recent        GET /v1/logs
//! FetchQuery::Since(t)      GET /v1/logs/since?timestamp=<RFC 3339, ns>
//! FetchQuery::Range(s, e)   GET /v1/logs/timerange?start=<epoch s>&end=<epoch s>
//! ```
//!
//! The range endpoint only takes whole seconds, so the end bound is rounded
//! up and the response is trimmed back to the exact window.

use chrono::SecondsFormat;
use reqwest::Client;
use watchlog_core::{FetchQuery, LogRecord, StreamError};

use crate::config::{ConfigError, StreamConfig};
use crate::fetcher::{parse_records, HistoricalFetcher};

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    base_url: String,
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &StreamConfig) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ConfigError::Invalid(format!("http client: {e}")))?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Path and query parameters for a query.
    pub fn endpoint(query: &FetchQuery) -> (&'static str, Vec<(&'static str, String)>) {
        match query {
            FetchQuery::Recent => ("/v1/logs", Vec::new()),
            FetchQuery::Since(cursor) => (
                "/v1/logs/since",
                vec![(
                    "timestamp",
                    cursor.to_rfc3339_opts(SecondsFormat::Nanos, true),
                )],
            ),
            FetchQuery::Range(range) => {
                let end = range.end();
                let end_secs = if end.timestamp_subsec_nanos() > 0 {
                    end.timestamp() + 1
                } else {
                    end.timestamp()
                };
                (
                    "/v1/logs/timerange",
                    vec![
                        ("start", range.start().timestamp().to_string()),
                        ("end", end_secs.to_string()),
                    ],
                )
            }
        }
    }

    async fn get(&self, query: FetchQuery) -> Result<Vec<LogRecord>, StreamError> {
        let (path, params) = Self::endpoint(&query);
        let url = format!("{}{}", self.base_url, path);
        log::debug!("GET {url} {params:?}");

        let resp = self
            .client
            .get(&url)
            .query(&params)
            .send()
            .await
            .map_err(|e| StreamError::FetchFailed(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(StreamError::FetchFailed(format!(
                "{path} returned {}",
                resp.status()
            )));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| StreamError::FetchFailed(e.to_string()))?;
        let records = parse_records(&body)?;

        Ok(match query {
            FetchQuery::Range(range) => records
                .into_iter()
                .filter(|r| range.contains(r.timestamp))
                .collect(),
            FetchQuery::Since(cursor) => records
                .into_iter()
                .filter(|r| r.timestamp > cursor)
                .collect(),
            FetchQuery::Recent => records,
        })
    }
}

impl HistoricalFetcher for HttpFetcher {
    async fn fetch(&self, query: FetchQuery) -> Result<Vec<LogRecord>, StreamError> {
        self.get(query).await
    }
}
