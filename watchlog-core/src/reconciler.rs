//! Stream reconciler: merges the live feed and historical fetches into one
//! bounded, deduplicated, time-ordered record set.
//!
//! The reconciler does no I/O. It consumes discrete [`Input`]s (operator
//! requests, live channel events, fetch completions) and returns the
//! [`Command`]s the caller must execute (open/close the channel, issue a
//! fetch, schedule a reconnect). Feeding every callback through `handle`
//! keeps buffer mutations atomic with respect to each other.
//!
//! ```text
//!              pause                     select range
//!   ┌──────┐ ───────► ┌────────┐  ───────────────────────► ┌────────────┐
//!   │ Live │          │ Paused │                           │ Historical │
//!   └──────┘ ◄─────── └────────┘                           └────────────┘
//!      ▲  │   resume (catch-up)                                  │
//!      │  └──────────────── select range ──────────────────────► │
//!      └──────────────────── enable live (reload) ───────────────┘
//! ```
//!
//! Fetches carry a [`FetchTicket`]. Only the most recently issued ticket of
//! each [`FetchKind`] is applied; older completions are stale and dropped.
//! Issuing a snapshot load also retires any outstanding catch-up, so a
//! catch-up started for the previous view never merges into the new one.
//!
//! Catch-up is at-least-once: the cursor of a gap (disconnect or failed
//! catch-up) is kept until a catch-up for it succeeds, so live appends that
//! advance `last_seen` in the meantime cannot skip the missing range.
//! Likewise a failed most-recent load in live mode is retried (on the next
//! `EnableLive`, resume or reconnect) instead of being patched by a catch-up
//! from whatever the buffer held before.

use std::fmt;

use crate::buffer::RecordBuffer;
use crate::error::StreamError;
use crate::record::{LogRecord, Timestamp};

/// Closed time window `[start, end]` selected by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    start: Timestamp,
    end: Timestamp,
}

impl TimeRange {
    pub fn new(start: Timestamp, end: Timestamp) -> Result<Self, StreamError> {
        if start > end {
            return Err(StreamError::InvalidRange {
                start: start.to_rfc3339(),
                end: end.to_rfc3339(),
            });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> Timestamp {
        self.start
    }

    pub fn end(&self) -> Timestamp {
        self.end
    }

    pub fn contains(&self, ts: Timestamp) -> bool {
        self.start <= ts && ts <= self.end
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} .. {}]", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// Which records the operator is looking at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Live,
    Paused,
    Historical(TimeRange),
}

impl Mode {
    /// Whether this mode keeps the live channel open.
    pub fn wants_channel(&self) -> bool {
        !matches!(self, Mode::Historical(_))
    }
}

/// Live channel state as seen by the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
}

/// Sequencing domain of a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchKind {
    /// Replaces the buffer (most-recent or time-range load).
    Snapshot,
    /// Merged into the buffer (gap fill after pause or reconnect).
    CatchUp,
}

/// Identifies one issued fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FetchTicket {
    pub kind: FetchKind,
    pub seq: u64,
}

/// Query against the historical backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchQuery {
    /// Most recent records.
    Recent,
    /// Records strictly newer than the cursor.
    Since(Timestamp),
    /// Records inside the window.
    Range(TimeRange),
}

/// Side effect requested by the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Open the live channel, closing any previous connection first.
    OpenChannel,
    /// Close the live channel.
    CloseChannel,
    /// Run the query and report back with `Input::FetchCompleted`.
    Fetch { ticket: FetchTicket, query: FetchQuery },
    /// Wait out the backoff for `attempt`, then report `Input::ReconnectDue`.
    ScheduleReconnect { attempt: u32 },
}

/// Event fed into the reconciler.
#[derive(Debug, Clone)]
pub enum Input {
    Mount,
    Pause,
    Resume,
    SelectRange(TimeRange),
    EnableLive,
    ChannelOpened,
    LiveRecord(LogRecord),
    /// A live message that failed to decode.
    LiveMalformed(StreamError),
    ChannelLost(StreamError),
    ReconnectDue,
    /// An operator request that could not be applied (e.g. an inverted range).
    Rejected(StreamError),
    FetchCompleted {
        ticket: FetchTicket,
        result: Result<Vec<LogRecord>, StreamError>,
    },
}

/// Counters exposed to the presentation layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcilerStats {
    pub live_appended: u64,
    pub live_dropped: u64,
    pub backfilled: u64,
    pub malformed: u64,
    pub stale_discarded: u64,
    pub fetch_failures: u64,
    pub reconnects: u64,
}

/// Everything the presentation layer shows besides the records.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamStatus {
    pub mode: Mode,
    pub connection: ConnectionState,
    pub loading: bool,
    pub last_error: Option<StreamError>,
    pub stats: ReconcilerStats,
}

/// A range of records that may be missing from the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Gap {
    /// `None` when the buffer was empty; filled with a most-recent fetch.
    since: Option<Timestamp>,
}

pub struct Reconciler {
    mode: Mode,
    buffer: RecordBuffer,
    connection: ConnectionState,
    mounted: bool,
    next_seq: u64,
    pending_snapshot: Option<u64>,
    pending_catch_up: Option<u64>,
    gap: Option<Gap>,
    /// The last most-recent load in live mode failed and must be reissued.
    reload_failed: bool,
    /// Live arrivals received while a most-recent load is in flight.
    racing: RecordBuffer,
    reconnect_attempt: u32,
    last_error: Option<StreamError>,
    stats: ReconcilerStats,
}

impl Reconciler {
    pub fn new(capacity: usize) -> Self {
        Self {
            mode: Mode::Live,
            buffer: RecordBuffer::new(capacity),
            connection: ConnectionState::Disconnected,
            mounted: false,
            next_seq: 0,
            pending_snapshot: None,
            pending_catch_up: None,
            gap: None,
            reload_failed: false,
            racing: RecordBuffer::new(capacity),
            reconnect_attempt: 0,
            last_error: None,
            stats: ReconcilerStats::default(),
        }
    }

    /// Apply one input and return the commands to execute, in order.
    pub fn handle(&mut self, input: Input) -> Vec<Command> {
        match input {
            Input::Mount => self.mount(),
            Input::Pause => self.pause(),
            Input::Resume => self.resume(),
            Input::SelectRange(range) => self.select_range(range),
            Input::EnableLive => self.enable_live(),
            Input::ChannelOpened => self.on_channel_opened(),
            Input::LiveRecord(record) => {
                self.on_live_record(record);
                Vec::new()
            }
            Input::LiveMalformed(err) => {
                self.stats.malformed += 1;
                log::warn!("Discarding live message: {err}");
                Vec::new()
            }
            Input::ChannelLost(err) => self.on_channel_lost(err),
            Input::ReconnectDue => self.on_reconnect_due(),
            Input::Rejected(err) => {
                log::warn!("Request rejected: {err}");
                self.last_error = Some(err);
                Vec::new()
            }
            Input::FetchCompleted { ticket, result } => {
                self.on_fetch_completed(ticket, result);
                Vec::new()
            }
        }
    }

    /// Commands to release the live channel on teardown.
    pub fn shutdown(&mut self) -> Vec<Command> {
        let was_open = self.connection != ConnectionState::Disconnected;
        self.connection = ConnectionState::Disconnected;
        self.reconnect_attempt = 0;
        if was_open {
            vec![Command::CloseChannel]
        } else {
            Vec::new()
        }
    }

    fn mount(&mut self) -> Vec<Command> {
        if self.mounted {
            log::debug!("Reconciler already mounted");
            return Vec::new();
        }
        self.mounted = true;
        self.mode = Mode::Live;
        log::info!("Mounting in live mode");

        let mut commands = vec![self.open_channel()];
        commands.push(self.issue_snapshot(FetchQuery::Recent));
        commands
    }

    fn pause(&mut self) -> Vec<Command> {
        if self.mode == Mode::Live {
            self.mode = Mode::Paused;
            log::info!("Paused; live arrivals are dropped until resume");
        } else {
            log::debug!("Pause ignored in {:?}", self.mode);
        }
        Vec::new()
    }

    fn resume(&mut self) -> Vec<Command> {
        if self.mode != Mode::Paused {
            log::debug!("Resume ignored in {:?}", self.mode);
            return Vec::new();
        }
        self.mode = Mode::Live;
        self.clear_rejection();
        log::info!("Resumed live mode");

        if self.connection == ConnectionState::Connected {
            vec![self.catch_up_or_reload()]
        } else {
            // The catch-up runs once the channel is back.
            self.open_gap();
            Vec::new()
        }
    }

    fn select_range(&mut self, range: TimeRange) -> Vec<Command> {
        log::info!("Switching to historical range {range}");
        self.clear_rejection();
        let mut commands = Vec::new();
        if self.connection != ConnectionState::Disconnected {
            commands.push(Command::CloseChannel);
        }
        self.connection = ConnectionState::Disconnected;
        self.reconnect_attempt = 0;
        self.mode = Mode::Historical(range);
        commands.push(self.issue_snapshot(FetchQuery::Range(range)));
        commands
    }

    fn enable_live(&mut self) -> Vec<Command> {
        match self.mode {
            Mode::Live if self.reload_failed => {
                log::info!("Retrying most-recent load");
                self.clear_rejection();
                vec![self.issue_snapshot(FetchQuery::Recent)]
            }
            Mode::Live => {
                self.clear_rejection();
                Vec::new()
            }
            Mode::Paused => self.resume(),
            Mode::Historical(range) => {
                log::info!("Leaving historical range {range} for live mode");
                self.clear_rejection();
                self.mode = Mode::Live;
                let mut commands = vec![self.open_channel()];
                commands.push(self.issue_snapshot(FetchQuery::Recent));
                commands
            }
        }
    }

    fn on_channel_opened(&mut self) -> Vec<Command> {
        if !self.mode.wants_channel() || self.connection == ConnectionState::Disconnected {
            log::debug!("Ignoring channel open while channel is not wanted");
            return Vec::new();
        }
        log::info!("Live channel connected");
        self.connection = ConnectionState::Connected;
        self.reconnect_attempt = 0;
        if matches!(self.last_error, Some(StreamError::ChannelDisconnected(_))) {
            self.last_error = None;
        }

        if self.mode == Mode::Live && (self.gap.is_some() || self.reload_failed) {
            vec![self.catch_up_or_reload()]
        } else {
            Vec::new()
        }
    }

    fn on_live_record(&mut self, record: LogRecord) {
        match self.mode {
            Mode::Live => {
                if self.pending_snapshot.is_some() {
                    self.racing.append_live(record.clone());
                }
                if self.buffer.append_live(record) {
                    self.stats.live_appended += 1;
                }
            }
            Mode::Paused | Mode::Historical(_) => {
                self.stats.live_dropped += 1;
            }
        }
    }

    fn on_channel_lost(&mut self, err: StreamError) -> Vec<Command> {
        if !self.mode.wants_channel() || self.connection == ConnectionState::Disconnected {
            log::debug!("Ignoring channel loss while channel is closed: {err}");
            return Vec::new();
        }
        log::warn!("Live channel lost: {err}");
        self.open_gap();
        self.reconnect_attempt = self.reconnect_attempt.saturating_add(1);
        self.connection = ConnectionState::Reconnecting {
            attempt: self.reconnect_attempt,
        };
        self.last_error = Some(err);
        vec![Command::ScheduleReconnect {
            attempt: self.reconnect_attempt,
        }]
    }

    fn on_reconnect_due(&mut self) -> Vec<Command> {
        match self.connection {
            ConnectionState::Reconnecting { attempt } if self.mode.wants_channel() => {
                log::info!("Reconnecting live channel (attempt {attempt})");
                self.stats.reconnects += 1;
                self.connection = ConnectionState::Connecting;
                vec![Command::OpenChannel]
            }
            _ => Vec::new(),
        }
    }

    fn on_fetch_completed(
        &mut self,
        ticket: FetchTicket,
        result: Result<Vec<LogRecord>, StreamError>,
    ) {
        let pending = match ticket.kind {
            FetchKind::Snapshot => &mut self.pending_snapshot,
            FetchKind::CatchUp => &mut self.pending_catch_up,
        };
        if *pending != Some(ticket.seq) {
            let stale = StreamError::StaleResponse {
                kind: ticket.kind,
                seq: ticket.seq,
                latest: *pending,
            };
            self.stats.stale_discarded += 1;
            log::debug!("{stale}");
            return;
        }
        *pending = None;

        match (ticket.kind, result) {
            (FetchKind::Snapshot, Ok(records)) => {
                log::debug!("Snapshot #{} loaded {} records", ticket.seq, records.len());
                self.buffer.initialize(records);
                if self.mode == Mode::Live && !self.racing.is_empty() {
                    self.buffer.merge_backfill(self.racing.snapshot());
                }
                self.racing.clear();
                self.clear_fetch_error();
            }
            (FetchKind::CatchUp, Ok(records)) => {
                let fetched = records.len();
                let gained = self.buffer.merge_backfill(records);
                self.stats.backfilled += gained as u64;
                self.gap = None;
                log::debug!("Catch-up #{} merged {gained}/{fetched} records", ticket.seq);
                self.clear_fetch_error();
            }
            (kind, Err(err)) => {
                if kind == FetchKind::Snapshot {
                    self.racing.clear();
                    // A failed range load keeps its window. A failed live
                    // reload is reissued, never patched by a catch-up from
                    // the stale buffer.
                    self.reload_failed = self.mode.wants_channel();
                }
                self.stats.fetch_failures += 1;
                log::error!("{kind:?} fetch #{} failed: {err}", ticket.seq);
                self.last_error = Some(err);
            }
        }
    }

    fn open_channel(&mut self) -> Command {
        self.connection = ConnectionState::Connecting;
        self.reconnect_attempt = 0;
        Command::OpenChannel
    }

    fn issue_snapshot(&mut self, query: FetchQuery) -> Command {
        let seq = self.bump_seq();
        self.pending_snapshot = Some(seq);
        self.pending_catch_up = None;
        self.gap = None;
        self.reload_failed = false;
        self.racing.clear();
        log::debug!("Issuing snapshot #{seq}: {query:?}");
        Command::Fetch {
            ticket: FetchTicket {
                kind: FetchKind::Snapshot,
                seq,
            },
            query,
        }
    }

    fn issue_catch_up(&mut self) -> Command {
        self.open_gap();
        let since = self.gap.and_then(|gap| gap.since);
        let query = match since {
            Some(ts) => FetchQuery::Since(ts),
            None => FetchQuery::Recent,
        };
        let seq = self.bump_seq();
        self.pending_catch_up = Some(seq);
        log::debug!("Issuing catch-up #{seq}: {query:?}");
        Command::Fetch {
            ticket: FetchTicket {
                kind: FetchKind::CatchUp,
                seq,
            },
            query,
        }
    }

    fn catch_up_or_reload(&mut self) -> Command {
        if self.reload_failed {
            self.issue_snapshot(FetchQuery::Recent)
        } else {
            self.issue_catch_up()
        }
    }

    /// Record a possible gap starting at the current last-seen timestamp,
    /// unless an older one is still unfilled.
    fn open_gap(&mut self) {
        if self.gap.is_none() {
            self.gap = Some(Gap {
                since: self.buffer.last_seen(),
            });
        }
    }

    fn bump_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn clear_fetch_error(&mut self) {
        if matches!(self.last_error, Some(StreamError::FetchFailed(_))) {
            self.last_error = None;
        }
    }

    fn clear_rejection(&mut self) {
        if matches!(self.last_error, Some(StreamError::InvalidRange { .. })) {
            self.last_error = None;
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn buffer(&self) -> &RecordBuffer {
        &self.buffer
    }

    pub fn snapshot(&self) -> Vec<LogRecord> {
        self.buffer.snapshot()
    }

    pub fn last_seen(&self) -> Option<Timestamp> {
        self.buffer.last_seen()
    }

    /// Cursor the next catch-up will use, if a gap is currently open.
    pub fn pending_gap(&self) -> Option<Option<Timestamp>> {
        self.gap.map(|gap| gap.since)
    }

    pub fn stats(&self) -> ReconcilerStats {
        self.stats
    }

    pub fn status(&self) -> StreamStatus {
        StreamStatus {
            mode: self.mode,
            connection: self.connection,
            loading: self.pending_snapshot.is_some() || self.pending_catch_up.is_some(),
            last_error: self.last_error.clone(),
            stats: self.stats,
        }
    }
}
