//! # rein-agent
//!
//! The control loop: observe the focused page, ask the decision router for
//! actions, run them through the [`ActionExecutor`] with page-change guards,
//! and append the outcome to the run history.

pub mod action;
pub mod actions;
pub mod agent;
pub mod browser;
pub mod control;
pub mod executor;
pub mod mock;
pub mod observer;

pub use action::{Action, ActionContext, ActionRegistry};
pub use agent::{Agent, AgentRunState, StepPhase};
pub use browser::BrowserContext;
pub use control::RunControl;
pub use executor::{ActionExecutor, BatchHalt, BatchOutcome};
pub use observer::{DomObserver, Observer};
