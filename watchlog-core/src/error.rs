//! Error taxonomy for the reconciliation engine.
//!
//! Nothing here is fatal: every variant degrades to "keep showing the last
//! known good state" plus a retry path owned by the reconciler.

use thiserror::Error;

use crate::reconciler::FetchKind;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// Payload could not be decoded into a record. Discard and continue.
    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    /// A historical query failed (transport or non-success status).
    #[error("Fetch failed: {0}")]
    FetchFailed(String),

    /// The live channel dropped or could not be opened.
    #[error("Live channel disconnected: {0}")]
    ChannelDisconnected(String),

    /// A fetch completed after a newer request of the same kind was issued.
    #[error("Stale {kind:?} response discarded (seq {seq}, latest {latest:?})")]
    StaleResponse {
        kind: FetchKind,
        seq: u64,
        latest: Option<u64>,
    },

    /// A time range whose start is after its end.
    #[error("Invalid time range: start {start} is after end {end}")]
    InvalidRange { start: String, end: String },
}

impl StreamError {
    /// Whether the error should be shown to the operator.
    ///
    /// Stale responses and single malformed messages are routine and only
    /// logged.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            Self::FetchFailed(_) | Self::ChannelDisconnected(_) | Self::InvalidRange { .. }
        )
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(e: serde_json::Error) -> Self {
        StreamError::MalformedRecord(e.to_string())
    }
}
