//! # rein-config
//!
//! Configuration system for the Rein control plane. Reads from `rein.toml`
//! and environment variables, in that precedence order.
//!
//! Supports hot-reload via filesystem watcher.

pub mod loader;
pub mod logging;
pub mod schema;

pub use loader::ConfigLoader;
pub use logging::init_tracing;
pub use schema::ReinConfig;
pub use schema::{
    AgentConfig, ConfigWarning, LoggingConfig, PoolConfig, ReplayConfig, SessionConfig,
    TransportConfig, WarningSeverity,
};
