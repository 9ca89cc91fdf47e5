//! Scripted decision backend for deterministic testing and recorded runs.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;

use rein_core::{ReinError, Result};

use crate::provider::{Decider, Decision, DecisionRequest};

/// One scripted answer.
pub enum Scripted {
    Decision(Decision),
    /// Parsed with [`Decision::parse`] when played.
    Raw(String),
    Error(ReinError),
    /// Never answer; exercises the router timeout.
    Hang,
}

/// Plays back queued answers in order.
///
/// # Example
/// ```
/// use rein_decision::mock::ScriptedDecider;
/// use serde_json::json;
/// let decider = ScriptedDecider::new("script")
///     .then_action("click", json!({"index": 3}))
///     .then_done(true, "clicked");
/// ```
pub struct ScriptedDecider {
    name: String,
    script: Mutex<VecDeque<Scripted>>,
    /// Played when the script is exhausted.
    repeat: Option<Decision>,
    requests: Arc<Mutex<Vec<DecisionRequest>>>,
}

impl ScriptedDecider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(VecDeque::new()),
            repeat: None,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn then(self, step: Scripted) -> Self {
        self.script.lock().push_back(step);
        self
    }

    pub fn then_decision(self, decision: Decision) -> Self {
        self.then(Scripted::Decision(decision))
    }

    pub fn then_action(self, name: &str, params: Value) -> Self {
        self.then_decision(Decision::action(name, params))
    }

    pub fn then_done(self, success: bool, text: &str) -> Self {
        self.then_decision(Decision::new(vec![rein_core::ActionRecord::done(success, text)]))
    }

    pub fn then_raw(self, raw: &str) -> Self {
        self.then(Scripted::Raw(raw.to_string()))
    }

    pub fn then_error(self, error: ReinError) -> Self {
        self.then(Scripted::Error(error))
    }

    pub fn then_hang(self) -> Self {
        self.then(Scripted::Hang)
    }

    /// Answer with `decision` forever once the script runs out.
    pub fn repeating(mut self, decision: Decision) -> Self {
        self.repeat = Some(decision);
        self
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<DecisionRequest> {
        self.requests.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().len()
    }
}

#[async_trait]
impl Decider for ScriptedDecider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn decide(&self, request: &DecisionRequest) -> Result<Decision> {
        self.requests.lock().push(request.clone());
        let next = self.script.lock().pop_front();
        match next {
            Some(Scripted::Decision(decision)) => Ok(decision),
            Some(Scripted::Raw(raw)) => Decision::parse(&raw),
            Some(Scripted::Error(error)) => Err(error),
            Some(Scripted::Hang) => std::future::pending().await,
            None => self.repeat.clone().ok_or_else(|| {
                ReinError::DecisionBackend(format!("{}: script exhausted", self.name))
            }),
        }
    }
}
