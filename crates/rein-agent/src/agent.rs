//! The step state machine.
//!
//! One call to [`Agent::run_step`] is one decision cycle:
//!
//! ```text
//! PreparingContext -> AwaitingDecision -> ExecutingActions -> PostProcessing -> Finalized
//!        ^                                                                         |
//!        +-------------------------------------------------------------------------+
//! ```
//!
//! [`Agent::run`] loops cycles until `done`, a fatal error, the step budget,
//! or an external stop.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use rein_config::{AgentConfig, ReinConfig};
use rein_core::{
    ActionRecord, ActionResult, ActiveBackend, AgentHistory, DomElement, Event, EventBus,
    PageObservation, ReinError, Result, RunId, StepRecord,
};
use rein_decision::{DecisionRequest, DecisionRouter, Plan};

use crate::action::ActionRegistry;
use crate::browser::BrowserContext;
use crate::control::RunControl;
use crate::executor::{ActionExecutor, BatchHalt};
use crate::observer::Observer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPhase {
    PreparingContext,
    AwaitingDecision,
    ExecutingActions,
    PostProcessing,
    Finalized,
}

/// Mutable state carried from one cycle to the next.
#[derive(Debug, Clone)]
pub struct AgentRunState {
    /// Number of the next step to run.
    pub step: u32,
    pub consecutive_failures: u32,
    pub plan: Plan,
    pub active_backend: ActiveBackend,
    /// Results of the last finished step, shown to the next decision.
    pub last_results: Vec<ActionResult>,
    signatures: VecDeque<String>,
    pub finished: bool,
    pub phase: StepPhase,
}

impl Default for AgentRunState {
    fn default() -> Self {
        Self {
            step: 0,
            consecutive_failures: 0,
            plan: Plan::default(),
            active_backend: ActiveBackend::Primary,
            last_results: Vec::new(),
            signatures: VecDeque::new(),
            finished: false,
            phase: StepPhase::PreparingContext,
        }
    }
}

pub struct Agent {
    run_id: RunId,
    task: String,
    config: AgentConfig,
    step_budget: u32,
    focus_timeout: Duration,
    browser: Arc<dyn BrowserContext>,
    observer: Arc<dyn Observer>,
    router: DecisionRouter,
    registry: Arc<ActionRegistry>,
    executor: ActionExecutor,
    history: AgentHistory,
    state: AgentRunState,
    bus: EventBus,
    control: RunControl,
}

impl Agent {
    pub fn new(
        task: impl Into<String>,
        browser: Arc<dyn BrowserContext>,
        observer: Arc<dyn Observer>,
        router: DecisionRouter,
        config: &ReinConfig,
    ) -> Self {
        let run_id = Uuid::new_v4();
        let task = task.into();
        let registry = Arc::new(ActionRegistry::with_builtins());
        Self {
            run_id,
            history: AgentHistory::new(run_id, task.clone()),
            task,
            step_budget: config.agent.max_steps,
            focus_timeout: config.session.focus_recovery_timeout(),
            executor: ActionExecutor::new(Arc::clone(&registry), &config.agent, &config.session),
            registry,
            config: config.agent.clone(),
            browser,
            observer,
            router,
            state: AgentRunState::default(),
            bus: EventBus::default(),
            control: RunControl::new(),
        }
    }

    pub fn with_registry(mut self, registry: ActionRegistry) -> Self {
        let registry = Arc::new(registry);
        self.executor = self.executor.with_registry(Arc::clone(&registry));
        self.registry = registry;
        self
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.bus = bus;
        self
    }

    pub fn with_control(mut self, control: RunControl) -> Self {
        self.control = control;
        self
    }

    pub fn with_plan(mut self, plan: Plan) -> Self {
        self.state.plan = plan;
        self
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn history(&self) -> &AgentHistory {
        &self.history
    }

    pub fn state(&self) -> &AgentRunState {
        &self.state
    }

    pub fn control(&self) -> &RunControl {
        &self.control
    }

    /// Run one decision cycle. Returns `true` once the run is done.
    ///
    /// Errors end the run: a failed observation, a transport-fatal action
    /// error, a detected loop, too many consecutive failures, or
    /// [`ReinError::Interrupted`] after a stop request.
    pub async fn run_step(&mut self) -> Result<bool> {
        if self.state.finished {
            return Ok(true);
        }

        // ── PreparingContext ───────────────────────────────────
        self.state.phase = StepPhase::PreparingContext;
        self.control.checkpoint().await?;
        let step = self.state.step;
        let started_at = Utc::now();
        self.bus.publish(Event::StepStarted {
            run_id: self.run_id,
            step,
        });

        if !self.browser.ensure_valid_focus(self.focus_timeout).await {
            return Err(ReinError::NoFocus);
        }
        let observation = self.observer.observe(self.browser.as_ref()).await?;

        // ── AwaitingDecision ───────────────────────────────────
        self.state.phase = StepPhase::AwaitingDecision;
        let done_only = self.done_only(step);
        if done_only {
            info!(step, failures = self.state.consecutive_failures, "offering only done this step");
        }
        let request = DecisionRequest {
            run_id: self.run_id,
            step,
            task: self.task.clone(),
            observation: observation.clone(),
            tools: self.registry.specs_for(done_only),
            plan: self.state.plan.steps().to_vec(),
            previous_results: self.state.last_results.clone(),
            nudge: None,
        };

        let routed = match self.router.decide(&request, &mut self.state.active_backend).await {
            Ok(routed) => routed,
            Err(e) => {
                warn!(step, error = %e, "decision failed");
                self.control.checkpoint().await?;
                let record = StepRecord {
                    step,
                    url: observation.url.clone(),
                    actions: vec![],
                    fingerprints: vec![],
                    results: vec![ActionResult::error(e.to_string())],
                    thinking: None,
                    started_at,
                    finished_at: Utc::now(),
                };
                return self.finish_step(record, None);
            }
        };
        if let Some(reason) = &routed.switched {
            self.bus.publish(Event::BackendSwitched {
                run_id: self.run_id,
                to: self.state.active_backend,
                reason: reason.clone(),
            });
        }
        self.control.checkpoint().await?;

        let mut actions = routed.decision.actions;
        if actions.len() > self.config.max_actions_per_step {
            warn!(
                step,
                decided = actions.len(),
                max = self.config.max_actions_per_step,
                "too many actions, truncating"
            );
            actions.truncate(self.config.max_actions_per_step);
        }

        // ── ExecutingActions ───────────────────────────────────
        self.state.phase = StepPhase::ExecutingActions;
        let outcome = self
            .executor
            .execute(&actions, self.browser.as_ref(), &observation, &self.control)
            .await?;
        debug!(step, halt = ?outcome.halt, attempted = outcome.attempted(), "batch finished");
        if outcome.halt == BatchHalt::Interrupted && outcome.results.is_empty() {
            return Err(ReinError::Interrupted);
        }

        // ── PostProcessing ─────────────────────────────────────
        self.state.phase = StepPhase::PostProcessing;
        actions.truncate(outcome.results.len());
        let fingerprints = actions
            .iter()
            .map(|a| {
                a.element_index()
                    .and_then(|i| observation.element(i))
                    .map(DomElement::fingerprint)
            })
            .collect();
        if let Some(update) = &routed.decision.plan_update {
            self.state.plan.apply(update);
        }
        let signature = step_signature(&observation, &actions);

        let record = StepRecord {
            step,
            url: observation.url.clone(),
            actions,
            fingerprints,
            results: outcome.results,
            thinking: routed.decision.thinking,
            started_at,
            finished_at: Utc::now(),
        };
        let done = self.finish_step(record, Some(signature))?;
        if outcome.halt == BatchHalt::Interrupted {
            return Err(ReinError::Interrupted);
        }
        Ok(done)
    }

    /// Post-processing and finalization shared by every recorded step.
    fn finish_step(&mut self, record: StepRecord, signature: Option<String>) -> Result<bool> {
        let step = record.step;

        if record.results.len() == 1 && record.results[0].is_error() {
            self.state.consecutive_failures += 1;
        } else if !record.has_errors() {
            self.state.consecutive_failures = 0;
        }

        let looped = signature.and_then(|sig| self.push_signature(sig));
        let done = record.is_done();

        // ── Finalized ──────────────────────────────────────────
        self.state.phase = StepPhase::Finalized;
        let errors = record.results.iter().filter(|r| r.is_error()).count();
        self.bus.publish(Event::StepCompleted {
            run_id: self.run_id,
            step,
            actions: record.actions.len(),
            errors,
            done,
        });
        self.state.last_results = record.results.clone();
        self.history.append(record);
        self.state.step += 1;

        if done {
            self.state.finished = true;
            return Ok(true);
        }
        if let Some(signature) = looped {
            warn!(step, %signature, "same step repeated, aborting run");
            self.bus.publish(Event::LoopDetected {
                run_id: self.run_id,
                signature: signature.clone(),
            });
            return Err(ReinError::LoopDetected(signature));
        }
        if self.state.consecutive_failures > self.config.max_failures {
            return Err(ReinError::TooManyFailures(self.state.consecutive_failures));
        }
        Ok(false)
    }

    /// Record `signature`; returns it when the whole window now repeats it.
    fn push_signature(&mut self, signature: String) -> Option<String> {
        let window = self.config.loop_window.max(1);
        self.state.signatures.push_back(signature);
        while self.state.signatures.len() > window {
            self.state.signatures.pop_front();
        }
        let signatures = &self.state.signatures;
        if signatures.len() == window && window > 1 && signatures.iter().all(|s| s == &signatures[0]) {
            return signatures.back().cloned();
        }
        None
    }

    fn done_only(&self, step: u32) -> bool {
        self.state.consecutive_failures >= self.config.max_failures
            || (self.config.force_done_on_last_step && step + 1 >= self.step_budget)
    }

    /// Run until done, failure, stop, or `max_steps` cycles.
    ///
    /// Failures end up in the returned history as a terminal record; a stop
    /// request ends the run cleanly without one.
    pub async fn run(&mut self, max_steps: u32) -> AgentHistory {
        self.step_budget = max_steps;
        info!(run_id = %self.run_id, task = %self.task, max_steps, "run started");

        let mut error = None;
        loop {
            if self.state.step >= max_steps {
                let message = format!("reached the step limit ({max_steps}) without finishing");
                warn!(run_id = %self.run_id, "{message}");
                self.append_terminal(&message).await;
                error = Some(message);
                break;
            }
            match self.run_step().await {
                Ok(true) => break,
                Ok(false) => {}
                Err(e) if e.is_interrupted() => {
                    info!(run_id = %self.run_id, step = self.state.step, "run stopped");
                    break;
                }
                Err(e) => {
                    warn!(run_id = %self.run_id, step = self.state.step, error = %e, "run failed");
                    let message = e.to_string();
                    self.append_terminal(&message).await;
                    error = Some(message);
                    break;
                }
            }
        }

        self.state.finished = true;
        self.state.phase = StepPhase::Finalized;
        let success = self.history.is_successful();
        info!(run_id = %self.run_id, steps = self.state.step, success, "run finished");
        self.bus.publish(Event::RunFinished {
            run_id: self.run_id,
            steps: self.state.step,
            success,
            error,
        });
        self.history.clone()
    }

    async fn append_terminal(&mut self, error: &str) {
        let url = self.browser.current_url().await.unwrap_or_default();
        self.history
            .append(StepRecord::terminal(self.state.step, url, error));
    }
}

/// Identity of a step for loop detection: the page plus what was done to it.
fn step_signature(observation: &PageObservation, actions: &[ActionRecord]) -> String {
    let actions = actions
        .iter()
        .map(|a| format!("{}:{}", a.name, a.key_param()))
        .collect::<Vec<_>>()
        .join(",");
    format!("{} {actions}", observation.url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_signature_distinguishes_params() {
        let obs = PageObservation {
            url: "https://a.test/".into(),
            ..Default::default()
        };
        let a = step_signature(&obs, &[ActionRecord::new("click", json!({"index": 1}))]);
        let b = step_signature(&obs, &[ActionRecord::new("click", json!({"index": 2}))]);
        assert_ne!(a, b);
        assert!(a.starts_with("https://a.test/"));
    }
}
