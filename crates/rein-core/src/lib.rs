//! # rein-core
//!
//! Core types, traits, and primitives for the Rein browser control plane.
//! This crate defines the shared vocabulary used by every other crate in the
//! workspace: the error taxonomy, target/session identifiers, the action
//! contract, element fingerprints, and the append-only step history.

pub mod action;
pub mod error;
pub mod event;
pub mod fingerprint;
pub mod history;
pub mod types;

pub use action::{ActionRecord, ActionResult, ActionSpec, DONE_ACTION, NOOP_ACTION};
pub use error::{ReinError, Result};
pub use event::{Event, EventBus};
pub use fingerprint::{DomElement, ElementFingerprint};
pub use history::{AgentHistory, StepRecord};
pub use types::*;
