//! Historical fetcher interface.
//!
//! Implementations run one [`FetchQuery`] against the backend and return the
//! matching records in ascending time order.

use std::future::Future;

use serde_json::Value;
use watchlog_core::{FetchQuery, LogRecord, StreamError};

pub trait HistoricalFetcher: Clone + Send + Sync + 'static {
    fn fetch(
        &self,
        query: FetchQuery,
    ) -> impl Future<Output = Result<Vec<LogRecord>, StreamError>> + Send;
}

/// Decode a JSON array response body into records.
///
/// A body that is not an array fails the whole fetch; individual elements
/// that are not valid records are logged and skipped. `null` (an empty Go
/// slice) decodes to no records. The result is sorted ascending because the
/// backend's order differs between endpoints.
pub fn parse_records(body: &[u8]) -> Result<Vec<LogRecord>, StreamError> {
    let items: Option<Vec<Value>> = serde_json::from_slice(body)
        .map_err(|e| StreamError::FetchFailed(format!("invalid response body: {e}")))?;

    let mut records = Vec::new();
    let mut skipped = 0usize;
    for item in items.unwrap_or_default() {
        match LogRecord::from_value(item) {
            Ok(record) => records.push(record),
            Err(err) => {
                skipped += 1;
                log::warn!("Skipping record in fetch response: {err}");
            }
        }
    }
    if skipped > 0 {
        log::debug!("Fetch response: kept {}, skipped {skipped}", records.len());
    }

    Ok(into_ascending(records))
}

/// Sort records into identity-key order (time first, stable for ties).
pub fn into_ascending(mut records: Vec<LogRecord>) -> Vec<LogRecord> {
    records.sort_by_cached_key(LogRecord::key);
    records
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_newest_first_becomes_ascending() {
        let body = br#"[
            {"timestamp": "2025-06-01T12:00:03Z", "body": "c"},
            {"timestamp": "2025-06-01T12:00:02Z", "body": "b"},
            {"timestamp": "2025-06-01T12:00:01Z", "body": "a"}
        ]"#;
        let records = parse_records(body).unwrap();
        let bodies: Vec<&str> = records.iter().map(|r| r.body.as_str()).collect();
        assert_eq!(bodies, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_parse_skips_malformed_elements() {
        let body = br#"[
            {"timestamp": "2025-06-01T12:00:01Z", "body": "ok"},
            {"body": "no timestamp"},
            42
        ]"#;
        let records = parse_records(body).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].body, "ok");
    }

    #[test]
    fn test_parse_null_is_empty() {
        assert!(parse_records(b"null").unwrap().is_empty());
        assert!(parse_records(b"[]").unwrap().is_empty());
    }

    #[test]
    fn test_parse_non_array_fails() {
        assert!(matches!(
            parse_records(br#"{"error": "boom"}"#),
            Err(StreamError::FetchFailed(_))
        ));
        assert!(matches!(
            parse_records(b"<html>"),
            Err(StreamError::FetchFailed(_))
        ));
    }
}
