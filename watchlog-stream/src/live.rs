//! Live channel: a persistent push connection delivering one record per
//! message.
//!
//! Each call to [`LiveChannel::open`] starts one connection task that reports
//! [`LiveEvent`]s on the given sender. The returned [`LiveConnection`] owns
//! that task; dropping it closes the connection, so at most one connection
//! exists as long as the owner keeps a single handle.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use watchlog_core::{LogRecord, StreamError};

/// Events emitted by a live connection, in order.
#[derive(Debug, Clone)]
pub enum LiveEvent {
    /// Connection established.
    Opened,
    /// One decoded record.
    Record(LogRecord),
    /// A message that failed to decode; the connection stays up.
    Malformed(StreamError),
    /// Connection failed or closed. No further events follow.
    Lost(StreamError),
}

pub trait LiveChannel: Send + Sync + 'static {
    /// Start a connection; events flow into `events` until the handle drops.
    fn open(&self, events: mpsc::Sender<LiveEvent>) -> LiveConnection;
}

/// Owned handle to a running connection task.
pub struct LiveConnection {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl LiveConnection {
    pub fn new(shutdown: oneshot::Sender<()>, task: JoinHandle<()>) -> Self {
        Self {
            shutdown: Some(shutdown),
            task,
        }
    }

    /// Ask the connection to close and wait for its task to finish.
    pub async fn close(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.task).await;
    }
}

impl Drop for LiveConnection {
    fn drop(&mut self) {
        // Dropping the sender wakes the task, which sends a close frame.
        self.shutdown.take();
    }
}

/// WebSocket live channel (`/ws` on the backend).
#[derive(Debug, Clone)]
pub struct WsLiveChannel {
    url: String,
}

impl WsLiveChannel {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Decode one live payload into an event.
pub fn decode_message(payload: &[u8]) -> LiveEvent {
    match LogRecord::decode(payload) {
        Ok(record) => LiveEvent::Record(record),
        Err(err) => LiveEvent::Malformed(err),
    }
}

impl LiveChannel for WsLiveChannel {
    fn open(&self, events: mpsc::Sender<LiveEvent>) -> LiveConnection {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let url = self.url.clone();

        let task = tokio::spawn(async move {
            let ws_stream = tokio::select! {
                _ = &mut shutdown_rx => return,
                result = tokio_tungstenite::connect_async(url.as_str()) => match result {
                    Ok((ws_stream, _)) => ws_stream,
                    Err(e) => {
                        log::warn!("Live channel connect to {url} failed: {e}");
                        let _ = events
                            .send(LiveEvent::Lost(StreamError::ChannelDisconnected(e.to_string())))
                            .await;
                        return;
                    }
                },
            };

            log::info!("Live channel connected to {url}");
            if events.send(LiveEvent::Opened).await.is_err() {
                return;
            }

            let (mut ws_writer, mut ws_reader) = ws_stream.split();
            let lost = loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        let _ = ws_writer.send(Message::Close(None)).await;
                        log::debug!("Live channel to {url} closed locally");
                        return;
                    }
                    msg = ws_reader.next() => {
                        let event = match msg {
                            Some(Ok(Message::Text(text))) => decode_message(text.as_bytes()),
                            Some(Ok(Message::Binary(data))) => decode_message(&data),
                            Some(Ok(Message::Ping(data))) => {
                                if let Err(e) = ws_writer.send(Message::Pong(data)).await {
                                    break StreamError::ChannelDisconnected(e.to_string());
                                }
                                continue;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                break StreamError::ChannelDisconnected("closed by server".into());
                            }
                            Some(Err(e)) => break StreamError::ChannelDisconnected(e.to_string()),
                            _ => continue,
                        };
                        if let LiveEvent::Malformed(err) = &event {
                            log::warn!("Malformed live message: {err}");
                        }
                        if events.send(event).await.is_err() {
                            return;
                        }
                    }
                }
            };

            log::warn!("Live channel to {url} lost: {lost}");
            let _ = events.send(LiveEvent::Lost(lost)).await;
        });

        LiveConnection::new(shutdown_tx, task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[test]
    fn test_decode_message() {
        let ok = decode_message(br#"{"timestamp":"2025-06-01T12:00:00Z","body":"x"}"#);
        assert!(matches!(ok, LiveEvent::Record(r) if r.body == "x"));

        let bad = decode_message(b"{}");
        assert!(matches!(
            bad,
            LiveEvent::Malformed(StreamError::MalformedRecord(_))
        ));
    }

    #[tokio::test]
    async fn test_open_unreachable_reports_lost() {
        let port = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let channel = WsLiveChannel::new(format!("ws://127.0.0.1:{port}/ws"));
        let (tx, mut rx) = mpsc::channel(8);
        let _conn = channel.open(tx);

        let event = timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        match event {
            Some(LiveEvent::Lost(StreamError::ChannelDisconnected(_))) => {}
            other => panic!("Expected Lost event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_close_finishes_task() {
        let channel = WsLiveChannel::new("ws://127.0.0.1:9/ws");
        let (tx, _rx) = mpsc::channel(8);
        let conn = channel.open(tx);
        timeout(Duration::from_secs(2), conn.close()).await.unwrap();
    }
}
