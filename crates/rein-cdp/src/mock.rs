//! In-memory browser for tests.
//!
//! [`MockBrowser`] speaks real WebSocket framing over `tokio::io::duplex`, so
//! the transport under test runs its normal reader and writer tasks. Replies
//! come from a programmable responder; events can be injected at any time and
//! the socket can be torn down to simulate a crash.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::Role;

use rein_config::{SessionConfig, TransportConfig};
use rein_core::{EventBus, Result};

use crate::pool::{Connection, Connector};
use crate::protocol::CdpEvent;
use crate::registry::SessionRegistry;
use crate::transport::{Transport, websocket_config};

/// A command as the mock browser received it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCommand {
    pub id: u64,
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

/// How the mock answers one command.
#[derive(Debug, Clone)]
pub enum MockReply {
    Result(Value),
    /// Reply, then push these events.
    WithEvents(Value, Vec<CdpEvent>),
    Error { code: i64, message: String },
    /// Leave the command pending forever.
    NoReply,
}

pub type Responder = Arc<dyn Fn(&RecordedCommand) -> MockReply + Send + Sync>;

/// The server half of an in-memory DevTools connection.
pub struct MockBrowser {
    outgoing: mpsc::UnboundedSender<Message>,
    commands: Arc<Mutex<Vec<RecordedCommand>>>,
    task: JoinHandle<()>,
}

impl MockBrowser {
    /// Build a connected transport and its mock peer.
    pub async fn pair(config: &TransportConfig, responder: Responder) -> (Transport, MockBrowser) {
        let (client, server) = tokio::io::duplex(1 << 20);
        let ws_config = websocket_config(config);
        let client = WebSocketStream::from_raw_socket(client, Role::Client, Some(ws_config)).await;
        let server = WebSocketStream::from_raw_socket(server, Role::Server, Some(ws_config)).await;

        let transport = Transport::from_stream(client, config);
        let browser = Self::serve(server, responder);
        (transport, browser)
    }

    /// A pair whose browser answers every command with `{}`.
    pub async fn echo(config: &TransportConfig) -> (Transport, MockBrowser) {
        Self::pair(config, Arc::new(|_: &RecordedCommand| MockReply::Result(json!({})))).await
    }

    fn serve(server: WebSocketStream<tokio::io::DuplexStream>, responder: Responder) -> Self {
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();
        let commands: Arc<Mutex<Vec<RecordedCommand>>> = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&commands);
        let (mut sink, mut source) = server.split();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    incoming = source.next() => {
                        let text = match incoming {
                            Some(Ok(Message::Text(text))) => text.as_str().to_string(),
                            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                            Some(Ok(_)) => continue,
                        };
                        let Ok(raw) = serde_json::from_str::<Value>(&text) else {
                            continue;
                        };
                        let command = RecordedCommand {
                            id: raw.get("id").and_then(Value::as_u64).unwrap_or_default(),
                            method: raw.get("method").and_then(Value::as_str).unwrap_or_default().to_string(),
                            params: raw.get("params").cloned().unwrap_or(Value::Null),
                            session_id: raw.get("sessionId").and_then(Value::as_str).map(String::from),
                        };
                        recorded.lock().push(command.clone());

                        let (reply, events) = match responder(&command) {
                            MockReply::Result(result) => {
                                (Some(json!({ "id": command.id, "result": result })), vec![])
                            }
                            MockReply::WithEvents(result, events) => {
                                (Some(json!({ "id": command.id, "result": result })), events)
                            }
                            MockReply::Error { code, message } => (
                                Some(json!({ "id": command.id, "error": { "code": code, "message": message } })),
                                vec![],
                            ),
                            MockReply::NoReply => (None, vec![]),
                        };
                        if let Some(reply) = reply
                            && sink.send(Message::Text(reply.to_string().into())).await.is_err()
                        {
                            break;
                        }
                        for event in events {
                            let frame = event_frame(&event);
                            if sink.send(Message::Text(frame.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    out = outgoing_rx.recv() => {
                        let Some(msg) = out else { break };
                        if sink.send(msg).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Self {
            outgoing,
            commands,
            task,
        }
    }

    /// Push an event frame to the client.
    pub fn emit(&self, method: &str, params: Value, session_id: Option<&str>) {
        let frame = event_frame(&CdpEvent {
            method: method.to_string(),
            params,
            session_id: session_id.map(String::from),
        });
        let _ = self.outgoing.send(Message::Text(frame.into()));
    }

    /// Push an arbitrary text frame.
    pub fn send_raw(&self, text: &str) {
        let _ = self.outgoing.send(Message::Text(text.to_string().into()));
    }

    /// Every command received so far.
    pub fn commands(&self) -> Vec<RecordedCommand> {
        self.commands.lock().clone()
    }

    pub fn commands_named(&self, method: &str) -> Vec<RecordedCommand> {
        self.commands
            .lock()
            .iter()
            .filter(|c| c.method == method)
            .cloned()
            .collect()
    }

    /// Drop the server side of the socket without a closing handshake.
    pub fn close(&self) {
        self.task.abort();
    }
}

impl Drop for MockBrowser {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn event_frame(event: &CdpEvent) -> String {
    let mut frame = json!({ "method": event.method, "params": event.params });
    if let Some(sid) = &event.session_id {
        frame["sessionId"] = Value::String(sid.clone());
    }
    frame.to_string()
}

/// Session id the fake browser assigns to a target.
pub fn session_id_for(target_id: &str) -> String {
    format!("S-{target_id}")
}

pub fn target_info(target_id: &str, kind: &str, url: &str) -> Value {
    json!({
        "targetId": target_id,
        "type": kind,
        "url": url,
        "title": "",
        "attached": false,
    })
}

/// `Target.attachedToTarget` for a target, as the browser would send it.
pub fn attached_event(target_id: &str, kind: &str, url: &str) -> CdpEvent {
    CdpEvent {
        method: "Target.attachedToTarget".into(),
        params: json!({
            "sessionId": session_id_for(target_id),
            "targetInfo": target_info(target_id, kind, url),
            "waitingForDebugger": false,
        }),
        session_id: None,
    }
}

pub fn detached_event(target_id: &str) -> CdpEvent {
    CdpEvent {
        method: "Target.detachedFromTarget".into(),
        params: json!({
            "sessionId": session_id_for(target_id),
            "targetId": target_id,
        }),
        session_id: None,
    }
}

/// A responder modelling the Target and Page domains of a browser with the
/// given `(target_id, url)` pages open. New tabs attach right after
/// `Target.createTarget` answers, and every navigation reports `load`.
pub fn chrome_responder(pages: &[(&str, &str)]) -> Responder {
    let pages: Vec<(String, String)> = pages
        .iter()
        .map(|(id, url)| (id.to_string(), url.to_string()))
        .collect();
    let counter = Arc::new(AtomicU64::new(1));

    Arc::new(move |cmd: &RecordedCommand| match cmd.method.as_str() {
        "Target.getTargets" => MockReply::Result(json!({
            "targetInfos": pages
                .iter()
                .map(|(id, url)| target_info(id, "page", url))
                .collect::<Vec<_>>(),
        })),
        "Target.attachToTarget" => {
            let target = cmd.params["targetId"].as_str().unwrap_or_default();
            MockReply::Result(json!({ "sessionId": session_id_for(target) }))
        }
        "Target.createTarget" => {
            let n = counter.fetch_add(1, Ordering::Relaxed);
            let target_id = format!("NEW{n}");
            let url = cmd.params["url"].as_str().unwrap_or("about:blank");
            MockReply::WithEvents(
                json!({ "targetId": target_id }),
                vec![attached_event(&target_id, "page", url)],
            )
        }
        "Page.navigate" => {
            let n = counter.fetch_add(1, Ordering::Relaxed);
            let loader_id = format!("L{n}");
            MockReply::WithEvents(
                json!({ "frameId": "F", "loaderId": loader_id }),
                vec![CdpEvent {
                    method: "Page.lifecycleEvent".into(),
                    params: json!({ "frameId": "F", "loaderId": loader_id, "name": "load" }),
                    session_id: cmd.session_id.clone(),
                }],
            )
        }
        _ => MockReply::Result(json!({})),
    })
}

/// Connects every key to a fresh [`MockBrowser`] running [`chrome_responder`].
pub struct MockConnector {
    pages: Vec<(String, String)>,
    transport: TransportConfig,
    session: SessionConfig,
    browsers: Mutex<Vec<Arc<MockBrowser>>>,
    connects: AtomicUsize,
    delays: HashMap<String, Duration>,
}

impl MockConnector {
    pub fn new(pages: &[(&str, &str)]) -> Self {
        Self {
            pages: pages
                .iter()
                .map(|(id, url)| (id.to_string(), url.to_string()))
                .collect(),
            transport: TransportConfig::default(),
            session: SessionConfig::default(),
            browsers: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
            delays: HashMap::new(),
        }
    }

    /// Make connects for `key` take `delay` before the handshake.
    pub fn with_delay(mut self, key: &str, delay: Duration) -> Self {
        self.delays.insert(key.to_string(), delay);
        self
    }

    /// How many connections have been built.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// The browser behind the `n`th connection.
    pub fn browser(&self, n: usize) -> Option<Arc<MockBrowser>> {
        self.browsers.lock().get(n).cloned()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, key: &str) -> Result<Connection> {
        if let Some(delay) = self.delays.get(key) {
            tokio::time::sleep(*delay).await;
        }
        let pages: Vec<(&str, &str)> = self
            .pages
            .iter()
            .map(|(id, url)| (id.as_str(), url.as_str()))
            .collect();
        let (transport, browser) =
            MockBrowser::pair(&self.transport, chrome_responder(&pages)).await;
        let transport = Arc::new(transport);
        let registry = SessionRegistry::bootstrap(
            Arc::clone(&transport),
            self.session.clone(),
            EventBus::default(),
        )
        .await?;
        self.browsers.lock().push(Arc::new(browser));
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Connection::new(transport, Arc::new(registry)))
    }
}
