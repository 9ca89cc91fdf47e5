//! Sequential execution of one decided batch with page-change guards.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use rein_config::{AgentConfig, SessionConfig};
use rein_core::{ActionRecord, ActionResult, PageObservation, ReinError, Result};

use crate::action::{ActionContext, ActionRegistry};
use crate::browser::BrowserContext;
use crate::control::RunControl;

/// Why a batch stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchHalt {
    /// Every action ran.
    Completed,
    /// A `done` action ran.
    Done,
    /// An action failed; the rest were never attempted.
    Error,
    /// An action declared that it invalidates the rest of the batch.
    TerminatesSequence,
    /// The focused page's URL or the focused target changed under an action.
    PageChanged,
    /// No live page to act on.
    FocusLost,
    /// Stop requested before the next action.
    Interrupted,
}

#[derive(Debug, Clone)]
pub struct BatchOutcome {
    /// One result per attempted action, in order.
    pub results: Vec<ActionResult>,
    pub halt: BatchHalt,
}

impl BatchOutcome {
    pub fn attempted(&self) -> usize {
        self.results.len()
    }

    pub fn is_done(&self) -> bool {
        self.results.iter().any(|r| r.is_done)
    }
}

/// Runs decided actions one at a time against the focused page.
///
/// Before each action the URL and focused target are snapshotted; if either
/// differs afterwards the remaining actions are dropped because their
/// element indices refer to a page that no longer exists.
pub struct ActionExecutor {
    registry: Arc<ActionRegistry>,
    inter_action_delay: Duration,
    focus_timeout: Duration,
}

impl ActionExecutor {
    pub fn new(registry: Arc<ActionRegistry>, agent: &AgentConfig, session: &SessionConfig) -> Self {
        Self {
            registry,
            inter_action_delay: agent.inter_action_delay(),
            focus_timeout: session.focus_recovery_timeout(),
        }
    }

    pub fn with_inter_action_delay(mut self, delay: Duration) -> Self {
        self.inter_action_delay = delay;
        self
    }

    pub fn with_registry(mut self, registry: Arc<ActionRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &Arc<ActionRegistry> {
        &self.registry
    }

    /// Execute `actions` in order, stopping early as soon as further actions
    /// would act on stale state.
    ///
    /// Only transport-fatal errors are returned as `Err`; every other action
    /// failure becomes an error result and halts the batch.
    pub async fn execute(
        &self,
        actions: &[ActionRecord],
        browser: &dyn BrowserContext,
        observation: &PageObservation,
        control: &RunControl,
    ) -> Result<BatchOutcome> {
        let actions = truncate_at_done(actions);
        let mut results = Vec::with_capacity(actions.len());
        let ctx = ActionContext {
            browser,
            observation,
            control,
        };

        for (i, record) in actions.iter().enumerate() {
            if control.is_stopped() {
                return Ok(BatchOutcome {
                    results,
                    halt: BatchHalt::Interrupted,
                });
            }
            if i > 0
                && !self.inter_action_delay.is_zero()
                && control.sleep(self.inter_action_delay).await.is_err()
            {
                return Ok(BatchOutcome {
                    results,
                    halt: BatchHalt::Interrupted,
                });
            }
            if !browser.ensure_valid_focus(self.focus_timeout).await {
                warn!(action = %record.name, "no live page to act on");
                results.push(ActionResult::error(ReinError::NoFocus.to_string()));
                return Ok(BatchOutcome {
                    results,
                    halt: BatchHalt::FocusLost,
                });
            }

            let pre_url = browser.current_url().await.ok();
            let pre_focus = browser.focused_target();

            let Some(action) = self.registry.get(&record.name) else {
                warn!(action = %record.name, "decision named an unregistered action");
                results.push(ActionResult::error(
                    ReinError::UnknownAction(record.name.clone()).to_string(),
                ));
                return Ok(BatchOutcome {
                    results,
                    halt: BatchHalt::Error,
                });
            };

            debug!(index = i, action = %record.name, params = %record.params, "executing action");
            let result = match action.execute(&ctx, &record.params).await {
                Ok(result) => result,
                Err(e) if e.is_transport_fatal() => return Err(e),
                Err(e) if e.is_interrupted() => {
                    info!(action = %record.name, "stopped while the action was running");
                    return Ok(BatchOutcome {
                        results,
                        halt: BatchHalt::Interrupted,
                    });
                }
                Err(e) => {
                    warn!(action = %record.name, error = %e, "action failed");
                    ActionResult::error(describe_failure(&record.name, &e))
                }
            };

            let is_done = result.is_done;
            let is_error = result.is_error();
            results.push(result);

            if is_done {
                return Ok(BatchOutcome {
                    results,
                    halt: BatchHalt::Done,
                });
            }
            if is_error {
                return Ok(BatchOutcome {
                    results,
                    halt: BatchHalt::Error,
                });
            }
            if i + 1 == actions.len() {
                break;
            }
            if record.terminates_sequence || action.terminates_sequence() {
                debug!(action = %record.name, skipped = actions.len() - i - 1, "action ends the batch");
                return Ok(BatchOutcome {
                    results,
                    halt: BatchHalt::TerminatesSequence,
                });
            }

            let post_url = browser.current_url().await.ok();
            let post_focus = browser.focused_target();
            if pre_url != post_url || pre_focus != post_focus {
                info!(
                    action = %record.name,
                    from = ?pre_url,
                    to = ?post_url,
                    skipped = actions.len() - i - 1,
                    "page changed, dropping rest of batch"
                );
                return Ok(BatchOutcome {
                    results,
                    halt: BatchHalt::PageChanged,
                });
            }
        }

        Ok(BatchOutcome {
            results,
            halt: BatchHalt::Completed,
        })
    }
}

/// `done` is only valid on its own; anything from a later `done` onward is
/// dropped, keeping the actions before it.
fn truncate_at_done(actions: &[ActionRecord]) -> &[ActionRecord] {
    match actions.iter().position(ActionRecord::is_done) {
        Some(pos) if pos > 0 => {
            warn!(
                position = pos,
                dropped = actions.len() - pos,
                "done must be the only action of a step, truncating batch"
            );
            &actions[..pos]
        }
        _ => actions,
    }
}

/// The error text recorded for a failed action. Protocol detail stays in
/// the logs.
fn describe_failure(action: &str, error: &ReinError) -> String {
    match error {
        ReinError::Protocol { .. } => format!("action '{action}' failed: the browser rejected the command"),
        ReinError::CommandTimeout { .. } => {
            format!("action '{action}' failed: the browser did not respond in time")
        }
        ReinError::TargetDetached(_) | ReinError::TargetNotFound(_) => {
            format!("action '{action}' failed: the page went away")
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truncate_keeps_actions_before_done() {
        let batch = vec![
            ActionRecord::new("click", json!({"index": 1})),
            ActionRecord::done(true, "ok"),
            ActionRecord::new("click", json!({"index": 2})),
        ];
        let kept = truncate_at_done(&batch);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name, "click");
    }

    #[test]
    fn test_truncate_leaves_sole_done() {
        let batch = vec![ActionRecord::done(true, "ok")];
        assert_eq!(truncate_at_done(&batch).len(), 1);
    }

    #[test]
    fn test_protocol_detail_not_leaked() {
        let msg = describe_failure(
            "click",
            &ReinError::Protocol {
                code: -32000,
                message: "Node with given id does not belong to the document".into(),
            },
        );
        assert!(!msg.contains("-32000"));
        assert!(!msg.contains("Node with given id"));
    }
}
