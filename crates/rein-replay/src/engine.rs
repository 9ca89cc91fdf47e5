use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use rein_agent::{ActionExecutor, ActionRegistry, BatchHalt, BrowserContext, Observer, RunControl};
use rein_config::{ReinConfig, ReplayConfig};
use rein_core::{
    ActionRecord, ActionResult, AgentHistory, Event, EventBus, ReinError, Result, StepRecord,
};

use crate::heuristic::{DefaultMenuHeuristic, MenuHeuristic};
use crate::matcher::resolve;

/// Knobs for one replay.
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    /// Retries per step after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Skip steps that errored when recorded and carry on past steps that
    /// still fail after all retries.
    pub skip_failures: bool,
    pub menu_reopen_delay: Duration,
    pub delay_between_steps: Duration,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self::from(&ReplayConfig::default())
    }
}

impl From<&ReplayConfig> for ReplayOptions {
    fn from(config: &ReplayConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            skip_failures: config.skip_failures,
            menu_reopen_delay: Duration::from_millis(config.menu_reopen_delay_ms),
            delay_between_steps: Duration::from_millis(config.delay_between_steps_ms),
        }
    }
}

impl ReplayOptions {
    /// Delay before retry number `attempt + 1`: doubling from the base,
    /// capped at the maximum.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Re-executes recorded steps against the live page.
pub struct ReplayEngine {
    browser: Arc<dyn BrowserContext>,
    observer: Arc<dyn Observer>,
    executor: ActionExecutor,
    heuristic: Arc<dyn MenuHeuristic>,
    bus: EventBus,
    control: RunControl,
}

impl ReplayEngine {
    pub fn new(
        browser: Arc<dyn BrowserContext>,
        observer: Arc<dyn Observer>,
        registry: Arc<ActionRegistry>,
        config: &ReinConfig,
    ) -> Self {
        Self {
            browser,
            observer,
            executor: ActionExecutor::new(registry, &config.agent, &config.session),
            heuristic: Arc::new(DefaultMenuHeuristic::default()),
            bus: EventBus::default(),
            control: RunControl::new(),
        }
    }

    pub fn with_heuristic(mut self, heuristic: Arc<dyn MenuHeuristic>) -> Self {
        self.heuristic = heuristic;
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

    /// Replay every recorded step in order and return one result per
    /// recorded action (skipped actions included).
    ///
    /// Steps without actions (decision failures, terminal records) are
    /// passed over. A step that still fails after all retries aborts the
    /// replay unless `skip_failures` is set.
    pub async fn replay_history(
        &self,
        history: &AgentHistory,
        options: &ReplayOptions,
    ) -> Result<Vec<ActionResult>> {
        info!(run_id = %history.run_id, steps = history.len(), "replaying history");
        let steps = history.steps();
        let mut results = Vec::new();
        let mut previous_succeeded = false;
        let mut replayed_any = false;

        for (i, step) in steps.iter().enumerate() {
            if step.actions.is_empty() {
                continue;
            }
            self.control.checkpoint().await?;
            if replayed_any && !options.delay_between_steps.is_zero() {
                self.control.sleep(options.delay_between_steps).await?;
            }
            replayed_any = true;

            if options.skip_failures && step.has_errors() {
                info!(step = step.step, "skipping step that failed when recorded");
                self.publish(step.step, 0, "skipped: failed when recorded");
                results.extend(skipped(step, "failed when recorded"));
                previous_succeeded = false;
                continue;
            }

            let previous = i.checked_sub(1).map(|p| &steps[p]);
            if previous_succeeded
                && let Some(previous) = previous
                && is_redundant_repeat(previous, step)
            {
                info!(step = step.step, "skipping repeated action on the same element");
                self.publish(step.step, 0, "skipped: repeat of previous step");
                results.extend(skipped(step, "repeat of the previous step"));
                previous_succeeded = false;
                continue;
            }

            match self.replay_with_retry(step, previous, options).await {
                Ok(step_results) => {
                    results.extend(step_results);
                    previous_succeeded = true;
                }
                Err(e) if e.is_transport_fatal() || e.is_interrupted() => return Err(e),
                Err(e) if options.skip_failures => {
                    warn!(step = step.step, error = %e, "step failed, continuing");
                    let message = e.to_string();
                    results.extend(step.actions.iter().map(|_| ActionResult::error(message.clone())));
                    previous_succeeded = false;
                }
                Err(e) => {
                    warn!(step = step.step, error = %e, "step failed, aborting replay");
                    return Err(e);
                }
            }
        }

        info!(run_id = %history.run_id, results = results.len(), "replay finished");
        Ok(results)
    }

    async fn replay_with_retry(
        &self,
        step: &StepRecord,
        previous: Option<&StepRecord>,
        options: &ReplayOptions,
    ) -> Result<Vec<ActionResult>> {
        let mut attempt = 0;
        let mut menu_reopened = false;
        loop {
            let error = match self.replay_step(step).await {
                Ok(results) => {
                    self.publish(step.step, attempt, "ok");
                    return Ok(results);
                }
                Err(e) if e.is_transport_fatal() || e.is_interrupted() => return Err(e),
                Err(e) => e,
            };
            self.publish(step.step, attempt, &format!("failed: {error}"));

            if !menu_reopened
                && error.is_element_not_found()
                && let Some(opener) = previous
                && self.follows_menu_opener(step, opener)
            {
                menu_reopened = true;
                info!(step = step.step, opener = opener.step, "menu item missing, reopening menu");
                if let Err(e) = self.replay_step(opener).await {
                    if e.is_transport_fatal() || e.is_interrupted() {
                        return Err(e);
                    }
                    debug!(error = %e, "reopening the menu failed");
                }
                self.control.sleep(options.menu_reopen_delay).await?;
                continue;
            }

            if attempt >= options.max_retries {
                return Err(error);
            }
            let delay = options.backoff(attempt);
            attempt += 1;
            debug!(
                step = step.step,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "retrying step"
            );
            self.control.sleep(delay).await?;
        }
    }

    /// One attempt: observe, re-resolve every recorded element, execute.
    async fn replay_step(&self, step: &StepRecord) -> Result<Vec<ActionResult>> {
        let observation = self.observer.observe(self.browser.as_ref()).await?;

        let mut actions: Vec<ActionRecord> = Vec::with_capacity(step.actions.len());
        for (idx, action) in step.actions.iter().enumerate() {
            let Some(fingerprint) = step.fingerprint(idx) else {
                actions.push(action.clone());
                continue;
            };
            let found = resolve(fingerprint, &observation.elements)?;
            debug!(
                step = step.step,
                action = %action.name,
                level = ?found.level,
                recorded = ?action.element_index(),
                live = found.element.index,
                "re-resolved element"
            );
            actions.push(action.with_element_index(found.element.index));
        }

        let outcome = self
            .executor
            .execute(&actions, self.browser.as_ref(), &observation, &self.control)
            .await?;
        if outcome.halt == BatchHalt::Interrupted {
            return Err(ReinError::Interrupted);
        }
        if let Some((i, failed)) = outcome.results.iter().enumerate().find(|(_, r)| r.is_error()) {
            return Err(ReinError::ActionFailed {
                action: actions[i].name.clone(),
                reason: failed.error.clone().unwrap_or_default(),
            });
        }
        Ok(outcome.results)
    }

    fn follows_menu_opener(&self, step: &StepRecord, previous: &StepRecord) -> bool {
        let Some((_, item)) = step.primary_element_action() else {
            return false;
        };
        let Some((_, opener)) = previous.primary_element_action() else {
            return false;
        };
        self.heuristic.is_menu_item(item) && self.heuristic.is_menu_opener(opener)
    }

    fn publish(&self, step: u32, attempt: u32, outcome: &str) {
        self.bus.publish(Event::ReplayStep {
            step,
            attempt,
            outcome: outcome.to_string(),
        });
    }
}

/// `step` does the same single thing to the same element as `previous`.
fn is_redundant_repeat(previous: &StepRecord, step: &StepRecord) -> bool {
    if step.actions.len() != 1 {
        return false;
    }
    match (previous.primary_element_action(), step.primary_element_action()) {
        (Some((a, fa)), Some((b, fb))) => {
            a.name == b.name && fa.identity() == fb.identity() && fa.xpath == fb.xpath
        }
        _ => false,
    }
}

fn skipped(step: &StepRecord, reason: &str) -> Vec<ActionResult> {
    step.actions
        .iter()
        .map(|a| ActionResult::skipped(format!("{}: {reason}", a.name)))
        .collect()
}
