//! Canonical log record shape and its identity key.
//!
//! Wire format is the backend's JSON encoding of an OpenTelemetry log record:
//! ```text
//! {
//!   "timestamp": "2025-06-01T12:00:00.123456789Z",   required
//!   "observed_time": "...",
//!   "severity_number": 9, "severity_text": "INFO",
//!   "body": "...",
//!   "attributes": [...],
//!   "resource": { "attributes": [{ "key": "service.name", "value": ... }] },
//!   "trace_id": "...", "span_id": "...",               omitted when empty
//!   "trace_flags": 1, "flags": 0, "dropped_attributes_count": 0
//! }
//! ```
//!
//! Go encodes empty slices as `null`, so every optional field tolerates both
//! absence and `null`.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::StreamError;

/// Event time of a record.
pub type Timestamp = DateTime<Utc>;

/// Resource attribute naming the emitting service.
pub const SERVICE_NAME_KEY: &str = "service.name";
/// Fallback resource attribute used by some collectors.
pub const SOURCE_NAME_KEY: &str = "source.name";

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// One structured log event. Immutable once decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: Timestamp,
    #[serde(default)]
    pub observed_time: Option<Timestamp>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub severity_number: i32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub severity_text: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub body: String,
    /// Opaque structured attributes.
    #[serde(default)]
    pub attributes: Value,
    /// Opaque resource map, usually `{ "attributes": [{key, value}, ...] }`.
    #[serde(default)]
    pub resource: Value,
    #[serde(default, deserialize_with = "null_as_default")]
    pub trace_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub span_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub trace_flags: u8,
    #[serde(default, deserialize_with = "null_as_default")]
    pub flags: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub dropped_attributes_count: u32,
}

/// De-duplication key: `(timestamp, trace_id, span_id)`.
///
/// Ordered time-first, so a sorted collection of keys is in timestamp order
/// with a deterministic tie-break for records sharing a timestamp.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordKey {
    pub timestamp: Timestamp,
    pub trace_id: String,
    pub span_id: String,
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.timestamp.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true),
            self.trace_id,
            self.span_id
        )
    }
}

/// Identity key of a record. Pure and total.
pub fn identity_key(record: &LogRecord) -> RecordKey {
    RecordKey {
        timestamp: record.timestamp,
        trace_id: record.trace_id.clone(),
        span_id: record.span_id.clone(),
    }
}

/// Orders two records by event time only.
pub fn compare_by_time(a: &LogRecord, b: &LogRecord) -> Ordering {
    a.timestamp.cmp(&b.timestamp)
}

impl LogRecord {
    /// Minimal record, mostly useful for tests and fixtures.
    pub fn new(timestamp: Timestamp, body: impl Into<String>) -> Self {
        Self {
            timestamp,
            observed_time: Some(timestamp),
            severity_number: 9,
            severity_text: "INFO".to_string(),
            body: body.into(),
            attributes: Value::Null,
            resource: Value::Null,
            trace_id: String::new(),
            span_id: String::new(),
            trace_flags: 0,
            flags: 0,
            dropped_attributes_count: 0,
        }
    }

    pub fn with_trace(mut self, trace_id: impl Into<String>, span_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self.span_id = span_id.into();
        self
    }

    pub fn with_severity(mut self, severity_text: impl Into<String>) -> Self {
        self.severity_text = severity_text.into();
        self.severity_number = Severity::from_text(&self.severity_text).number();
        self
    }

    pub fn with_resource(mut self, resource: Value) -> Self {
        self.resource = resource;
        self
    }

    /// Decode one record from a JSON payload.
    ///
    /// This is the ingestion boundary: anything without a parseable
    /// `timestamp` is rejected as [`StreamError::MalformedRecord`].
    pub fn decode(bytes: &[u8]) -> Result<Self, StreamError> {
        serde_json::from_slice(bytes).map_err(StreamError::from)
    }

    /// Decode one record from an already-parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self, StreamError> {
        serde_json::from_value(value).map_err(StreamError::from)
    }

    pub fn key(&self) -> RecordKey {
        identity_key(self)
    }

    pub fn severity(&self) -> Severity {
        Severity::from_text(&self.severity_text)
    }

    /// Name of the emitting service, from `service.name` or `source.name`.
    pub fn service_name(&self) -> Option<&str> {
        self.resource_attribute(SERVICE_NAME_KEY)
            .or_else(|| self.resource_attribute(SOURCE_NAME_KEY))
    }

    fn resource_attribute(&self, key: &str) -> Option<&str> {
        let attributes = self.resource.get("attributes")?.as_array()?;
        attributes
            .iter()
            .find(|kv| kv.get("key").and_then(Value::as_str) == Some(key))
            .and_then(|kv| kv.get("value"))
            .and_then(value_as_str)
    }
}

/// Attribute values arrive either as bare strings or as tagged objects such
/// as `{"stringValue": "api"}`.
fn value_as_str(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) => Some(s),
        Value::Object(map) => map.values().find_map(Value::as_str),
        _ => None,
    }
}

/// Severity level, parsed case-insensitively from `severity_text`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
    Critical,
    Unknown,
}

impl Severity {
    pub fn from_text(text: &str) -> Self {
        text.parse().unwrap_or(Severity::Unknown)
    }

    /// OpenTelemetry severity number at the bottom of each level's range.
    pub fn number(self) -> i32 {
        match self {
            Severity::Debug => 5,
            Severity::Info => 9,
            Severity::Warn => 13,
            Severity::Error => 17,
            Severity::Critical => 21,
            Severity::Unknown => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
            Severity::Unknown => "UNKNOWN",
        }
    }
}

impl FromStr for Severity {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEBUG" | "TRACE" => Ok(Severity::Debug),
            "INFO" => Ok(Severity::Info),
            "WARN" | "WARNING" => Ok(Severity::Warn),
            "ERROR" => Ok(Severity::Error),
            "CRITICAL" | "FATAL" => Ok(Severity::Critical),
            other => Err(StreamError::MalformedRecord(format!(
                "unknown severity '{other}'"
            ))),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn ts(secs: i64) -> Timestamp {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_decode_full_record() {
        let payload = json!({
            "timestamp": "2025-06-01T12:00:00.5Z",
            "observed_time": "2025-06-01T12:00:01Z",
            "severity_number": 17,
            "severity_text": "error",
            "body": "disk full",
            "attributes": [{"key": "path", "value": "/var"}],
            "resource": {"attributes": [{"key": "service.name", "value": "api"}]},
            "trace_id": "abc",
            "span_id": "def",
            "trace_flags": 1,
            "flags": 0,
            "dropped_attributes_count": 2
        });
        let record = LogRecord::decode(payload.to_string().as_bytes()).unwrap();

        assert_eq!(record.body, "disk full");
        assert_eq!(record.severity(), Severity::Error);
        assert_eq!(record.trace_id, "abc");
        assert_eq!(record.dropped_attributes_count, 2);
        assert_eq!(record.service_name(), Some("api"));
        assert_eq!(record.timestamp.timestamp_subsec_millis(), 500);
    }

    #[test]
    fn test_decode_omitted_and_null_fields() {
        let payload = r#"{"timestamp":"2025-06-01T12:00:00Z","body":"hi","attributes":null,"trace_id":null}"#;
        let record = LogRecord::decode(payload.as_bytes()).unwrap();
        assert_eq!(record.trace_id, "");
        assert_eq!(record.span_id, "");
        assert_eq!(record.flags, 0);
        assert!(record.observed_time.is_none());
    }

    #[test]
    fn test_decode_missing_timestamp_is_malformed() {
        let err = LogRecord::decode(br#"{"body":"no time"}"#).unwrap_err();
        match err {
            StreamError::MalformedRecord(msg) => assert!(msg.contains("timestamp")),
            other => panic!("expected MalformedRecord, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_garbage_is_malformed() {
        assert!(matches!(
            LogRecord::decode(b"not json"),
            Err(StreamError::MalformedRecord(_))
        ));
        assert!(matches!(
            LogRecord::decode(br#"{"timestamp":"yesterday"}"#),
            Err(StreamError::MalformedRecord(_))
        ));
    }

    #[test]
    fn test_identity_key_distinguishes_shared_timestamp() {
        let a = LogRecord::new(ts(10), "a").with_trace("t1", "s1");
        let b = LogRecord::new(ts(10), "b").with_trace("t1", "s2");
        assert_ne!(identity_key(&a), identity_key(&b));
        assert_eq!(compare_by_time(&a, &b), Ordering::Equal);
    }

    #[test]
    fn test_identity_key_ignores_body() {
        let a = LogRecord::new(ts(10), "first").with_trace("t", "s");
        let b = LogRecord::new(ts(10), "second").with_trace("t", "s");
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn test_key_orders_time_first() {
        let early = LogRecord::new(ts(1), "").with_trace("zzz", "zzz");
        let late = LogRecord::new(ts(2), "").with_trace("aaa", "aaa");
        assert!(early.key() < late.key());
        assert_eq!(compare_by_time(&early, &late), Ordering::Less);
    }

    #[test]
    fn test_severity_case_insensitive() {
        assert_eq!(Severity::from_text("warn"), Severity::Warn);
        assert_eq!(Severity::from_text("Warning"), Severity::Warn);
        assert_eq!(Severity::from_text("CRITICAL"), Severity::Critical);
        assert_eq!(Severity::from_text(" debug "), Severity::Debug);
        assert_eq!(Severity::from_text("verbose"), Severity::Unknown);
        assert!("verbose".parse::<Severity>().is_err());
    }

    #[test]
    fn test_service_name_fallbacks() {
        let tagged = LogRecord::new(ts(1), "")
            .with_resource(json!({"attributes": [{"key": "source.name", "value": {"stringValue": "nginx"}}]}));
        assert_eq!(tagged.service_name(), Some("nginx"));

        let both = LogRecord::new(ts(1), "").with_resource(json!({"attributes": [
            {"key": "source.name", "value": "fallback"},
            {"key": "service.name", "value": "primary"}
        ]}));
        assert_eq!(both.service_name(), Some("primary"));

        let none = LogRecord::new(ts(1), "").with_resource(json!("opaque"));
        assert_eq!(none.service_name(), None);
    }

    #[test]
    fn test_with_severity_sets_number() {
        let record = LogRecord::new(ts(1), "x").with_severity("error");
        assert_eq!(record.severity_number, 17);
    }
}
