//! # watchlog-core — Log stream reconciliation engine
//!
//! Merges a push-based live feed with pull-based historical fetches into one
//! consistent, deduplicated, bounded, time-ordered record set.
//!
//! ## Architecture
//!
//! ```text
//!  Live channel ──► Input::LiveRecord ──┐
//!                                       ▼
//!  Operator ──► Input::{Pause, ...} ─► Reconciler ──► Vec<Command> ──► driver
//!                                       ▲   │
//!  Fetcher ──► Input::FetchCompleted ───┘   ▼
//!                                      RecordBuffer ──► snapshot() ──► display
//! ```
//!
//! ## Modules
//!
//! - [`record`] — Log record model, identity key, severity
//! - [`buffer`] — Bounded, deduplicating, time-ordered store
//! - [`reconciler`] — Live / paused / historical state machine (no I/O)
//! - [`error`] — Error taxonomy

pub mod buffer;
pub mod error;
pub mod reconciler;
pub mod record;

// Re-exports for convenience
pub use buffer::{RecordBuffer, DEFAULT_CAPACITY};
pub use error::StreamError;
pub use reconciler::{
    Command, ConnectionState, FetchKind, FetchQuery, FetchTicket, Input, Mode, Reconciler,
    ReconcilerStats, StreamStatus, TimeRange,
};
pub use record::{compare_by_time, identity_key, LogRecord, RecordKey, Severity, Timestamp};
