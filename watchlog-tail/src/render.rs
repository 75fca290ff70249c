//! Terminal output for published stream views.

use std::collections::HashSet;
use std::io::{self, Write};

use chrono::SecondsFormat;
use watchlog_core::{
    ConnectionState, LogRecord, Mode, RecordKey, StreamError, StreamStatus, TimeRange,
};
use watchlog_stream::StreamView;

/// `[timestamp] LEVEL service: body (trace_id=… span_id=…)`
pub fn format_record(record: &LogRecord) -> String {
    let timestamp = record
        .timestamp
        .to_rfc3339_opts(SecondsFormat::Millis, true);
    let mut line = match record.service_name() {
        Some(service) => format!(
            "[{timestamp}] {} {service}: {}",
            record.severity(),
            record.body
        ),
        None => format!("[{timestamp}] {}: {}", record.severity(), record.body),
    };
    if !record.trace_id.is_empty() || !record.span_id.is_empty() {
        line.push_str(&format!(
            " (trace_id={} span_id={})",
            record.trace_id, record.span_id
        ));
    }
    line
}

pub fn format_status(status: &StreamStatus) -> String {
    let mode = match status.mode {
        Mode::Live => "live".to_string(),
        Mode::Paused => "paused".to_string(),
        Mode::Historical(range) => format!("range {range}"),
    };
    let connection = match status.connection {
        ConnectionState::Disconnected => "disconnected".to_string(),
        ConnectionState::Connecting => "connecting".to_string(),
        ConnectionState::Connected => "connected".to_string(),
        ConnectionState::Reconnecting { attempt } => format!("reconnecting (attempt {attempt})"),
    };
    let mut line = format!("-- {mode} | {connection}");
    if status.loading {
        line.push_str(" | loading");
    }
    line.push_str(" --");
    line
}

/// Prints records the terminal has not shown yet, plus status transitions.
///
/// Entering a range, or leaving one, prints the new record set in full.
/// Pausing and resuming do not.
pub struct Printer<W: Write> {
    out: W,
    shown: HashSet<RecordKey>,
    last_status: Option<String>,
    last_error: Option<StreamError>,
    last_window: Option<Option<TimeRange>>,
}

impl<W: Write> Printer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            shown: HashSet::new(),
            last_status: None,
            last_error: None,
            last_window: None,
        }
    }

    pub fn show(&mut self, view: &StreamView) -> io::Result<()> {
        let status = &view.status;
        let window = match status.mode {
            Mode::Historical(range) => Some(range),
            Mode::Live | Mode::Paused => None,
        };
        if self.last_window != Some(window) {
            self.shown.clear();
            self.last_window = Some(window);
        }

        let status_line = format_status(status);
        if self.last_status.as_deref() != Some(status_line.as_str()) {
            writeln!(self.out, "{status_line}")?;
            self.last_status = Some(status_line);
        }

        if status.last_error != self.last_error {
            if let Some(err) = status.last_error.as_ref().filter(|e| e.is_user_visible()) {
                writeln!(self.out, "!! {err}")?;
            }
            self.last_error = status.last_error.clone();
        }

        let mut visible = HashSet::with_capacity(view.records.len());
        for record in view.records.iter() {
            let key = record.key();
            if !self.shown.contains(&key) {
                writeln!(self.out, "{}", format_record(record))?;
            }
            visible.insert(key);
        }
        self.shown = visible;
        self.out.flush()
    }

    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        writeln!(self.out, "{line}")?;
        self.out.flush()
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }
}
