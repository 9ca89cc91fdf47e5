//! # rein-cdp
//!
//! The protocol layer between the agent loop and a live browser.
//!
//! # Architecture
//!
//! ```text
//!   ConnectionPool            ← one entry per target key, idle eviction
//!       │
//!       ▼
//!   Connection
//!       ├── SessionRegistry   ← targets, sessions, agent focus, lifecycle buffers
//!       │       └── CdpSession ← target + session id, rides on the transport
//!       │
//!       └── Transport         ← one WebSocket, id-correlated commands, event fan-out
//! ```

pub mod discovery;
pub mod lifecycle;
pub mod mock;
pub mod pool;
pub mod protocol;
pub mod registry;
pub mod transport;

pub use lifecycle::{LifecycleEvent, NavigationReadiness};
pub use pool::{Connection, ConnectionPool, Connector, WsConnector};
pub use protocol::CdpEvent;
pub use registry::{CdpSession, SessionRegistry};
pub use transport::{Subscription, Transport};
