//! Connection cache keyed by endpoint, with idle eviction.
//!
//! The map lock only guards lookup and insert. Each key owns a slot whose
//! `OnceCell` is the in-flight connect, so callers for the same key wait on
//! one handshake while other keys and the sweep proceed.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use rein_config::{PoolConfig, SessionConfig, TransportConfig};
use rein_core::{EventBus, Result};

use crate::discovery;
use crate::registry::SessionRegistry;
use crate::transport::Transport;

/// A transport plus the registry bootstrapped on it.
#[derive(Clone)]
pub struct Connection {
    transport: Arc<Transport>,
    registry: Arc<SessionRegistry>,
}

impl Connection {
    pub fn new(transport: Arc<Transport>, registry: Arc<SessionRegistry>) -> Self {
        Self {
            transport,
            registry,
        }
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// A closed socket or a finished reader makes the connection dead.
    pub fn is_alive(&self) -> bool {
        !self.transport.is_closed()
    }
}

/// Builds a new connection for a pool key.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, key: &str) -> Result<Connection>;
}

/// Connects to real browsers. Keys are either `ws://` URLs or DevTools HTTP
/// endpoints (`http://127.0.0.1:9222`), resolved through `/json/version`.
pub struct WsConnector {
    transport: TransportConfig,
    session: SessionConfig,
    bus: EventBus,
}

impl WsConnector {
    pub fn new(transport: TransportConfig, session: SessionConfig, bus: EventBus) -> Self {
        Self {
            transport,
            session,
            bus,
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, key: &str) -> Result<Connection> {
        let ws_url = discovery::resolve_ws_url(key).await?;
        let transport = Arc::new(Transport::connect(&ws_url, &self.transport).await?);
        let registry = SessionRegistry::bootstrap(
            Arc::clone(&transport),
            self.session.clone(),
            self.bus.clone(),
        )
        .await?;
        Ok(Connection::new(transport, Arc::new(registry)))
    }
}

/// One key's connection, built at most once.
struct Slot {
    conn: OnceCell<Connection>,
    last_used: Mutex<Instant>,
}

impl Slot {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            conn: OnceCell::new(),
            last_used: Mutex::new(Instant::now()),
        })
    }

    fn touch(&self) {
        *self.last_used.lock() = Instant::now();
    }
}

struct PoolInner {
    slots: Mutex<HashMap<String, Arc<Slot>>>,
    connector: Arc<dyn Connector>,
    idle_ttl: Duration,
}

impl PoolInner {
    async fn sweep(&self) -> usize {
        let expired: Vec<(String, Connection)> = {
            let mut slots = self.slots.lock();
            let now = Instant::now();
            let keys: Vec<String> = slots
                .iter()
                .filter(|(_, slot)| match slot.conn.get() {
                    Some(conn) => {
                        !conn.is_alive() || now.duration_since(*slot.last_used.lock()) >= self.idle_ttl
                    }
                    // Still connecting.
                    None => false,
                })
                .map(|(k, _)| k.clone())
                .collect();
            keys.into_iter()
                .filter_map(|k| {
                    let slot = slots.remove(&k)?;
                    let conn = slot.conn.get()?.clone();
                    Some((k, conn))
                })
                .collect()
        };

        for (key, conn) in &expired {
            debug!(%key, "closing idle connection");
            conn.transport().close().await;
        }
        expired.len()
    }

    /// The slot for `key`, replacing one that holds a dead connection.
    fn slot(&self, key: &str) -> (Arc<Slot>, Option<Connection>) {
        let mut slots = self.slots.lock();
        let existing = slots
            .get(key)
            .map(|slot| (Arc::clone(slot), slot.conn.get().cloned()));
        let dead = match existing {
            Some((_, Some(conn))) if !conn.is_alive() => {
                debug!(%key, "evicting dead connection");
                Some(conn)
            }
            Some((slot, _)) => return (slot, None),
            None => None,
        };
        let fresh = Slot::new();
        slots.insert(key.to_string(), Arc::clone(&fresh));
        (fresh, dead)
    }

    /// Drop a slot whose connect failed, unless another caller is still
    /// waiting on it and will retry.
    fn discard_failed(&self, key: &str, slot: &Arc<Slot>) {
        let mut slots = self.slots.lock();
        let abandoned = slots.get(key).is_some_and(|current| {
            Arc::ptr_eq(current, slot) && current.conn.get().is_none() && Arc::strong_count(slot) <= 2
        });
        if abandoned {
            slots.remove(key);
        }
    }
}

/// Caches one live connection per key.
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
    sweeper: JoinHandle<()>,
}

impl ConnectionPool {
    /// Create the pool and start its sweep task. Must be called inside a
    /// tokio runtime.
    pub fn new(connector: Arc<dyn Connector>, config: &PoolConfig) -> Self {
        let inner = Arc::new(PoolInner {
            slots: Mutex::new(HashMap::new()),
            connector,
            idle_ttl: config.idle_ttl(),
        });

        let weak: Weak<PoolInner> = Arc::downgrade(&inner);
        let period = config.sweep_interval();
        let sweeper = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let closed = inner.sweep().await;
                if closed > 0 {
                    info!(closed, "idle connections evicted");
                }
            }
        });

        Self { inner, sweeper }
    }

    /// Return the cached connection for `key`, or build one. Dead entries are
    /// replaced, never handed out. Concurrent callers for one key share a
    /// single connect.
    pub async fn acquire(&self, key: &str) -> Result<Connection> {
        let (slot, dead) = self.inner.slot(key);
        if let Some(dead) = dead {
            dead.transport().close().await;
        }

        let connector = &self.inner.connector;
        let result = slot
            .conn
            .get_or_try_init(|| async {
                let conn = connector.connect(key).await?;
                info!(%key, "connection established");
                Ok::<_, rein_core::ReinError>(conn)
            })
            .await;

        match result {
            Ok(conn) => {
                slot.touch();
                Ok(conn.clone())
            }
            Err(e) => {
                self.inner.discard_failed(key, &slot);
                Err(e)
            }
        }
    }

    /// Close and forget the connection for `key`.
    pub async fn remove(&self, key: &str) -> bool {
        let removed = self.inner.slots.lock().remove(key);
        match removed.as_ref().and_then(|slot| slot.conn.get()) {
            Some(conn) => {
                conn.transport().close().await;
                true
            }
            None => removed.is_some(),
        }
    }

    /// Close every idle or dead connection now. Returns how many were closed.
    pub async fn sweep(&self) -> usize {
        self.inner.sweep().await
    }

    /// Keys with a connection built or in flight.
    pub async fn len(&self) -> usize {
        self.inner.slots.lock().len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn close_all(&self) {
        let drained: Vec<Connection> = self
            .inner
            .slots
            .lock()
            .drain()
            .filter_map(|(_, slot)| slot.conn.get().cloned())
            .collect();
        for conn in drained {
            conn.transport().close().await;
        }
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}
