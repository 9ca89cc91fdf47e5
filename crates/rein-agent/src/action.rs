//! The action contract and the registry that maps names to handlers.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use rein_core::{ActionResult, ActionSpec, DONE_ACTION, PageObservation, ReinError, Result};

use crate::browser::BrowserContext;
use crate::control::RunControl;

/// What an action may touch while it runs.
pub struct ActionContext<'a> {
    pub browser: &'a dyn BrowserContext,
    /// The observation the decision was made against. Element indices in
    /// action parameters refer to this snapshot.
    pub observation: &'a PageObservation,
    /// Long-running actions sleep through this so a stop cuts them short.
    pub control: &'a RunControl,
}

/// One executable action kind.
#[async_trait]
pub trait Action: Send + Sync {
    fn name(&self) -> &str;

    /// Description offered to the decision backend.
    fn spec(&self) -> ActionSpec;

    /// Running this action invalidates whatever else was planned in the batch.
    fn terminates_sequence(&self) -> bool {
        false
    }

    async fn execute(&self, ctx: &ActionContext<'_>, params: &Value) -> Result<ActionResult>;
}

/// Deserialize an action's parameters into its typed form.
pub fn parse_params<T: DeserializeOwned>(action: &str, params: &Value) -> Result<T> {
    let raw = if params.is_null() {
        Value::Object(Default::default())
    } else {
        params.clone()
    };
    serde_json::from_value(raw).map_err(|e| ReinError::ActionFailed {
        action: action.to_string(),
        reason: format!("invalid parameters: {e}"),
    })
}

/// Name-keyed catalogue of the actions a run may use.
#[derive(Default, Clone)]
pub struct ActionRegistry {
    actions: BTreeMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in browser actions.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for action in crate::actions::builtins() {
            registry.register(action);
        }
        registry
    }

    /// Add or replace an action.
    pub fn register(&mut self, action: Arc<dyn Action>) {
        self.actions.insert(action.name().to_string(), action);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn specs(&self) -> Vec<ActionSpec> {
        self.actions
            .values()
            .map(|a| {
                let mut spec = a.spec();
                spec.terminates_sequence |= a.terminates_sequence();
                spec
            })
            .collect()
    }

    /// The specs to offer this cycle. With `done_only` set, only the
    /// terminal action is offered.
    pub fn specs_for(&self, done_only: bool) -> Vec<ActionSpec> {
        let specs = self.specs();
        if done_only {
            specs.into_iter().filter(|s| s.name == DONE_ACTION).collect()
        } else {
            specs
        }
    }

    pub fn terminates(&self, name: &str) -> bool {
        self.actions
            .get(name)
            .is_some_and(|a| a.terminates_sequence())
    }
}
