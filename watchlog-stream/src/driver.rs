//! Async driver for the reconciler.
//!
//! One task owns the [`Reconciler`] and runs a `tokio::select!` loop over
//! operator controls, live channel events, fetch completions and the
//! reconnect timer. Every event becomes one `Reconciler::handle` call, whose
//! commands are executed before the next event is taken, and the resulting
//! view is published on a `watch` channel.

use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout, Duration, Sleep};
use watchlog_core::{
    Command, Input, LogRecord, Reconciler, StreamError, StreamStatus, TimeRange, Timestamp,
};

use crate::backoff::BackoffConfig;
use crate::config::StreamConfig;
use crate::fetcher::HistoricalFetcher;
use crate::live::{LiveChannel, LiveConnection, LiveEvent};

/// Depth of the per-connection live event queue.
const LIVE_EVENT_BUFFER: usize = 256;

/// Upper bound on waiting for a connection task to finish closing.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// What the presentation layer renders: the visible records, ascending, plus
/// status.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamView {
    pub records: Arc<Vec<LogRecord>>,
    pub status: StreamStatus,
}

impl StreamView {
    fn of(reconciler: &Reconciler) -> Self {
        Self {
            records: Arc::new(reconciler.snapshot()),
            status: reconciler.status(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandleError {
    #[error("Stream driver has stopped")]
    Stopped,
}

#[derive(Debug)]
enum Control {
    Pause,
    Resume,
    SelectRange { start: Timestamp, end: Timestamp },
    EnableLive,
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable handle to a running [`StreamDriver`].
#[derive(Debug, Clone)]
pub struct StreamHandle {
    control: mpsc::Sender<Control>,
    view: watch::Receiver<StreamView>,
}

impl StreamHandle {
    pub async fn pause(&self) -> Result<(), HandleError> {
        self.send(Control::Pause).await
    }

    pub async fn resume(&self) -> Result<(), HandleError> {
        self.send(Control::Resume).await
    }

    /// Switch to a historical window. An inverted window is rejected by the
    /// driver and reported through `StreamStatus::last_error`.
    pub async fn select_range(&self, start: Timestamp, end: Timestamp) -> Result<(), HandleError> {
        self.send(Control::SelectRange { start, end }).await
    }

    pub async fn enable_live(&self) -> Result<(), HandleError> {
        self.send(Control::EnableLive).await
    }

    /// Close the live channel, cancel fetches and stop the driver. Returns
    /// once teardown is complete.
    pub async fn shutdown(&self) -> Result<(), HandleError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.send(Control::Shutdown(ack_tx)).await?;
        ack_rx.await.map_err(|_| HandleError::Stopped)
    }

    pub fn subscribe(&self) -> watch::Receiver<StreamView> {
        self.view.clone()
    }

    /// Latest published view.
    pub fn view(&self) -> StreamView {
        self.view.borrow().clone()
    }

    async fn send(&self, control: Control) -> Result<(), HandleError> {
        self.control
            .send(control)
            .await
            .map_err(|_| HandleError::Stopped)
    }
}

pub struct StreamDriver<F, C> {
    reconciler: Reconciler,
    fetcher: F,
    channel: C,
    backoff: BackoffConfig,
    connection: Option<LiveConnection>,
    live_rx: Option<mpsc::Receiver<LiveEvent>>,
    fetches: JoinSet<Input>,
    reconnect: Option<Pin<Box<Sleep>>>,
    view_tx: watch::Sender<StreamView>,
}

impl<F, C> StreamDriver<F, C>
where
    F: HistoricalFetcher,
    C: LiveChannel,
{
    /// Start the driver on the current runtime and mount it in live mode.
    pub fn spawn(config: &StreamConfig, fetcher: F, channel: C) -> StreamHandle {
        let (control_tx, control_rx) = mpsc::channel(config.control_buffer.max(1));
        let reconciler = Reconciler::new(config.capacity);
        let (view_tx, view_rx) = watch::channel(StreamView::of(&reconciler));

        let driver = Self {
            reconciler,
            fetcher,
            channel,
            backoff: config.reconnect.clone(),
            connection: None,
            live_rx: None,
            fetches: JoinSet::new(),
            reconnect: None,
            view_tx,
        };
        tokio::spawn(driver.run(control_rx));

        StreamHandle {
            control: control_tx,
            view: view_rx,
        }
    }

    async fn run(mut self, mut control_rx: mpsc::Receiver<Control>) {
        self.apply(Input::Mount).await;

        let ack = loop {
            tokio::select! {
                control = control_rx.recv() => match control {
                    Some(Control::Pause) => self.apply(Input::Pause).await,
                    Some(Control::Resume) => self.apply(Input::Resume).await,
                    Some(Control::SelectRange { start, end }) => match TimeRange::new(start, end) {
                        Ok(range) => self.apply(Input::SelectRange(range)).await,
                        Err(err) => self.apply(Input::Rejected(err)).await,
                    },
                    Some(Control::EnableLive) => self.apply(Input::EnableLive).await,
                    Some(Control::Shutdown(ack)) => break Some(ack),
                    None => {
                        log::debug!("All stream handles dropped");
                        break None;
                    }
                },

                event = next_live_event(&mut self.live_rx) => match event {
                    Some(LiveEvent::Opened) => self.apply(Input::ChannelOpened).await,
                    Some(LiveEvent::Record(record)) => self.apply(Input::LiveRecord(record)).await,
                    Some(LiveEvent::Malformed(err)) => self.apply(Input::LiveMalformed(err)).await,
                    Some(LiveEvent::Lost(err)) => self.apply(Input::ChannelLost(err)).await,
                    None => {
                        // Connection task ended without reporting why.
                        self.live_rx = None;
                        self.apply(Input::ChannelLost(StreamError::ChannelDisconnected(
                            "live channel ended".into(),
                        )))
                        .await;
                    }
                },

                Some(joined) = self.fetches.join_next(), if !self.fetches.is_empty() => {
                    match joined {
                        Ok(input) => self.apply(input).await,
                        Err(e) if e.is_cancelled() => {}
                        Err(e) => log::error!("Fetch task failed: {e}"),
                    }
                }

                _ = reconnect_elapsed(&mut self.reconnect) => {
                    self.reconnect = None;
                    self.apply(Input::ReconnectDue).await;
                }
            }
        };

        self.teardown().await;
        // Controls sent after shutdown must fail rather than queue.
        drop(control_rx);
        if let Some(ack) = ack {
            let _ = ack.send(());
        }
        log::info!("Stream driver stopped");
    }

    async fn apply(&mut self, input: Input) {
        for command in self.reconciler.handle(input) {
            self.execute(command).await;
        }
        self.publish();
    }

    async fn execute(&mut self, command: Command) {
        match command {
            Command::OpenChannel => {
                self.close_channel().await;
                let (events_tx, events_rx) = mpsc::channel(LIVE_EVENT_BUFFER);
                self.connection = Some(self.channel.open(events_tx));
                self.live_rx = Some(events_rx);
            }
            Command::CloseChannel => self.close_channel().await,
            Command::Fetch { ticket, query } => {
                let fetcher = self.fetcher.clone();
                self.fetches.spawn(async move {
                    let result = fetcher.fetch(query).await;
                    Input::FetchCompleted { ticket, result }
                });
            }
            Command::ScheduleReconnect { attempt } => {
                // The lost connection's task is done; reap what is left of it.
                self.close_channel().await;
                let delay = self.backoff.delay_for(attempt);
                log::info!("Reconnecting in {delay:?} (attempt {attempt})");
                self.reconnect = Some(Box::pin(sleep(delay)));
            }
        }
    }

    /// Close the current connection and wait for its task, then drop its
    /// event queue and any pending reconnect. Events still queued from it are
    /// never delivered.
    async fn close_channel(&mut self) {
        // Dropping the queue first unblocks a task stuck on a full send.
        self.live_rx = None;
        self.reconnect = None;
        if let Some(connection) = self.connection.take() {
            if timeout(CLOSE_TIMEOUT, connection.close()).await.is_err() {
                log::warn!("Live connection did not close within {CLOSE_TIMEOUT:?}");
            }
        }
    }

    async fn teardown(&mut self) {
        self.fetches.abort_all();
        self.close_channel().await;
        for command in self.reconciler.shutdown() {
            self.execute(command).await;
        }
        self.publish();
    }

    fn publish(&self) {
        let view = StreamView::of(&self.reconciler);
        self.view_tx.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                *current = view;
                true
            }
        });
    }
}

async fn next_live_event(rx: &mut Option<mpsc::Receiver<LiveEvent>>) -> Option<LiveEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}

async fn reconnect_elapsed(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => pending().await,
    }
}
