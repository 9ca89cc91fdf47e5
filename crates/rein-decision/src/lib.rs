//! # rein-decision
//!
//! The seam between the step loop and whatever chooses the next actions: a
//! model, a human, or a fixed script. The loop only ever talks to a
//! [`DecisionRouter`], which hides which backend answered.

pub mod mock;
pub mod plan;
pub mod provider;
pub mod router;

pub use mock::ScriptedDecider;
pub use plan::{Plan, PlanStatus, PlanStep, PlanUpdate};
pub use provider::{Decider, Decision, DecisionRequest};
pub use router::{DecisionRouter, Routed};
