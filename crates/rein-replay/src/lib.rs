//! # rein-replay
//!
//! Re-executes a recorded [`AgentHistory`](rein_core::AgentHistory) against a
//! live page whose layout may have drifted since the recording. Elements are
//! re-resolved from their fingerprints instead of trusting recorded indices.

pub mod engine;
pub mod heuristic;
pub mod matcher;

pub use engine::{ReplayEngine, ReplayOptions};
pub use heuristic::{DefaultMenuHeuristic, MenuHeuristic, NoMenuHeuristic};
pub use matcher::{ElementMatch, MatchLevel, resolve};
