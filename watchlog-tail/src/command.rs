//! Operator commands read from stdin, one per line.

use chrono::{DateTime, TimeZone, Utc};
use thiserror::Error;
use watchlog_core::Timestamp;

pub const HELP: &str = "\
commands:
  pause                 stop following; incoming records are dropped
  resume                catch up and follow again
  live                  return to live mode from a range or pause
  range <start> <end>   show a time window (RFC 3339 or epoch seconds)
  help                  show this message
  quit                  exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    Pause,
    Resume,
    Live,
    Range { start: Timestamp, end: Timestamp },
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown command '{0}' (try 'help')")]
    Unknown(String),
    #[error("Usage: range <start> <end>")]
    RangeUsage,
    #[error("Invalid time '{0}': expected RFC 3339 or epoch seconds")]
    InvalidTime(String),
}

impl OperatorCommand {
    /// Parse one input line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>, CommandError> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };

        let command = match verb.to_ascii_lowercase().as_str() {
            "pause" | "p" => Self::Pause,
            "resume" | "r" => Self::Resume,
            "live" | "l" => Self::Live,
            "help" | "?" => Self::Help,
            "quit" | "exit" | "q" => Self::Quit,
            "range" => {
                let (Some(start), Some(end), None) = (words.next(), words.next(), words.next())
                else {
                    return Err(CommandError::RangeUsage);
                };
                Self::Range {
                    start: parse_time(start)?,
                    end: parse_time(end)?,
                }
            }
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(Some(command))
    }
}

/// RFC 3339 (any offset) or integer epoch seconds.
pub fn parse_time(raw: &str) -> Result<Timestamp, CommandError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    raw.parse::<i64>()
        .ok()
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .ok_or_else(|| CommandError::InvalidTime(raw.to_string()))
}
