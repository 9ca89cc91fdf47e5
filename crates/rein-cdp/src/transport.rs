//! One WebSocket, many in-flight commands.
//!
//! A writer task owns the sink and a reader task owns the stream. The reader
//! is the only code that resolves pending commands; every other caller only
//! inserts or (on timeout) removes its own entry. When the reader stops for
//! any reason the pending map is closed and drained, so no caller waits past
//! the end of the connection.

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tracing::{debug, error, warn};

use rein_config::TransportConfig;
use rein_core::{ReinError, Result};

use crate::protocol::{self, CdpEvent, CommandFrame, Incoming};

/// Handler invoked for each matching event. Errors are logged, panics are
/// caught; neither reaches the read loop.
pub type EventHandler = Arc<dyn Fn(&CdpEvent) -> anyhow::Result<()> + Send + Sync>;

type Waiter = oneshot::Sender<Result<Value>>;

#[derive(Default)]
struct PendingMap {
    closed: bool,
    waiters: HashMap<u64, Waiter>,
}

struct Shared {
    pending: Mutex<PendingMap>,
    events: broadcast::Sender<CdpEvent>,
}

impl Shared {
    /// Reject every outstanding command and refuse new ones.
    fn fail_all(&self) {
        let drained: Vec<Waiter> = {
            let mut pending = self.pending.lock();
            pending.closed = true;
            pending.waiters.drain().map(|(_, tx)| tx).collect()
        };
        if !drained.is_empty() {
            debug!(count = drained.len(), "rejecting pending commands");
        }
        for tx in drained {
            let _ = tx.send(Err(ReinError::ConnectionClosed));
        }
    }

    fn resolve(&self, id: u64, outcome: Result<Value>) {
        let waiter = self.pending.lock().waiters.remove(&id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(outcome);
            }
            None => debug!(id, "response for unknown or expired command"),
        }
    }

    fn dispatch_text(&self, text: &str) {
        match protocol::decode(text) {
            Ok(Some(Incoming::Response { id, outcome })) => self.resolve(id, outcome),
            Ok(Some(Incoming::Event(event))) => {
                // No receivers is fine.
                let _ = self.events.send(event);
            }
            Ok(None) => debug!("ignoring frame without id or method"),
            Err(e) => warn!(error = %e, "undecodable frame"),
        }
    }
}

/// A multiplexed DevTools connection.
pub struct Transport {
    shared: Arc<Shared>,
    outgoing: mpsc::Sender<Message>,
    next_id: AtomicU64,
    command_timeout: Duration,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Transport {
    /// Open a WebSocket to `ws_url` with the configured frame-size ceiling.
    /// The handshake is bounded by the command timeout.
    pub async fn connect(ws_url: &str, config: &TransportConfig) -> Result<Self> {
        let timeout = config.command_timeout();
        let handshake = tokio_tungstenite::connect_async_with_config(
            ws_url,
            Some(websocket_config(config)),
            false,
        );
        let (stream, _) = tokio::time::timeout(timeout, handshake)
            .await
            .map_err(|_| {
                ReinError::WebSocket(format!(
                    "handshake with {ws_url} did not complete within {}s",
                    timeout.as_secs()
                ))
            })?
            .map_err(|e| ReinError::WebSocket(format!("failed to connect to {ws_url}: {e}")))?;
        debug!(%ws_url, "devtools websocket connected");
        Ok(Self::from_stream(stream, config))
    }

    /// Wrap an already-established WebSocket.
    pub fn from_stream<S>(stream: WebSocketStream<S>, config: &TransportConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut sink, mut source) = stream.split();
        let (outgoing, mut outgoing_rx) = mpsc::channel::<Message>(256);
        let (events, _) = broadcast::channel(config.event_buffer.max(1));

        let shared = Arc::new(Shared {
            pending: Mutex::new(PendingMap::default()),
            events,
        });

        let writer_shared = Arc::clone(&shared);
        let writer = tokio::spawn(async move {
            while let Some(msg) = outgoing_rx.recv().await {
                if let Err(e) = sink.send(msg).await {
                    error!(error = %e, "devtools websocket write failed");
                    writer_shared.fail_all();
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader_shared = Arc::clone(&shared);
        let reader = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(Message::Text(text)) => reader_shared.dispatch_text(text.as_str()),
                    Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                        Ok(text) => reader_shared.dispatch_text(text),
                        Err(_) => warn!(len = bytes.len(), "non-utf8 binary frame"),
                    },
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "devtools websocket closed by peer");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "devtools websocket read failed");
                        break;
                    }
                }
            }
            reader_shared.fail_all();
        });

        Self {
            shared,
            outgoing,
            next_id: AtomicU64::new(1),
            command_timeout: config.command_timeout(),
            reader,
            writer,
        }
    }

    /// Send a browser-level command.
    pub async fn send(&self, method: &str, params: Value) -> Result<Value> {
        self.send_with_session(method, params, None).await
    }

    /// Send a command, optionally scoped to a flattened target session.
    pub async fn send_with_session(
        &self,
        method: &str,
        params: Value,
        session_id: Option<&str>,
    ) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let text = serde_json::to_string(&CommandFrame {
            id,
            method,
            params: &params,
            session_id,
        })?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.shared.pending.lock();
            if pending.closed {
                return Err(ReinError::ConnectionClosed);
            }
            pending.waiters.insert(id, tx);
        }

        if self.outgoing.send(Message::Text(text.into())).await.is_err() {
            self.shared.pending.lock().waiters.remove(&id);
            return Err(ReinError::ConnectionClosed);
        }

        match tokio::time::timeout(self.command_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(ReinError::ConnectionClosed),
            Err(_) => {
                self.shared.pending.lock().waiters.remove(&id);
                Err(ReinError::CommandTimeout {
                    method: method.to_string(),
                    timeout_ms: self.command_timeout.as_millis() as u64,
                })
            }
        }
    }

    /// A raw receiver over every event frame from now on.
    pub fn events(&self) -> broadcast::Receiver<CdpEvent> {
        self.shared.events.subscribe()
    }

    /// Run `handler` for every event named `method`.
    pub fn subscribe<F>(&self, method: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&CdpEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.spawn_dispatch(Some(method.into()), Arc::new(handler))
    }

    /// Run `handler` for every event.
    pub fn subscribe_all<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&CdpEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.spawn_dispatch(None, Arc::new(handler))
    }

    fn spawn_dispatch(&self, method: Option<String>, handler: EventHandler) -> Subscription {
        let mut rx = self.shared.events.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                let event = match rx.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, ?method, "event subscriber lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if let Some(m) = &method
                    && *m != event.method
                {
                    continue;
                }
                match std::panic::catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(event = %event.method, error = %e, "event handler failed"),
                    Err(_) => error!(event = %event.method, "event handler panicked"),
                }
            }
        });
        Subscription { handle }
    }

    /// Whether the connection can no longer carry commands.
    pub fn is_closed(&self) -> bool {
        self.shared.pending.lock().closed || self.reader.is_finished() || self.writer.is_finished()
    }

    /// Number of commands awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().waiters.len()
    }

    /// Close the socket and reject everything still in flight.
    pub async fn close(&self) {
        let _ = self.outgoing.send(Message::Close(None)).await;
        self.shared.fail_all();
        self.reader.abort();
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.shared.fail_all();
        self.reader.abort();
        self.writer.abort();
    }
}

/// A live event subscription. Dropping it stops the dispatch task.
pub struct Subscription {
    handle: JoinHandle<()>,
}

impl Subscription {
    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub(crate) fn websocket_config(config: &TransportConfig) -> WebSocketConfig {
    let max = config.max_message_size_bytes();
    let mut ws = WebSocketConfig::default();
    ws.max_message_size = Some(max);
    ws.max_frame_size = Some(max);
    ws
}
