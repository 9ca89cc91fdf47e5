use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use rein_config::AgentConfig;
use rein_core::{ActionRecord, ActiveBackend, NOOP_ACTION, ReinError, Result};

use crate::provider::{Decider, Decision, DecisionRequest};

/// A decision plus how the router got it.
#[derive(Debug, Clone)]
pub struct Routed {
    pub decision: Decision,
    /// Name of the backend that answered.
    pub answered_by: String,
    /// Set when this call moved the run onto the fallback backend.
    pub switched: Option<String>,
    /// The backend never produced a usable answer and the router made one up.
    pub synthesized: bool,
}

/// Picks the backend for each decision call.
///
/// Order of preference: the planner (if any), then the run's active backend.
/// A rate-limit or auth failure on the primary moves the run onto the
/// fallback for good; the caller owns the [`ActiveBackend`] so the switch
/// survives across calls.
pub struct DecisionRouter {
    primary: Arc<dyn Decider>,
    fallback: Option<Arc<dyn Decider>>,
    planner: Option<Arc<dyn Decider>>,
    timeout: Duration,
}

impl DecisionRouter {
    pub fn new(primary: Arc<dyn Decider>, config: &AgentConfig) -> Self {
        Self {
            primary,
            fallback: None,
            planner: None,
            timeout: config.decision_timeout(),
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn Decider>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_planner(mut self, planner: Arc<dyn Decider>) -> Self {
        self.planner = Some(planner);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    fn backend(&self, active: ActiveBackend) -> &Arc<dyn Decider> {
        match (active, &self.fallback) {
            (ActiveBackend::Fallback, Some(fallback)) => fallback,
            _ => &self.primary,
        }
    }

    /// Get the next decision for `request`.
    ///
    /// Unusable answers (empty, unparseable, or naming actions that were not
    /// offered) are retried once with a clarification nudge; a second
    /// unusable answer yields a synthesized no-op. Timeouts and other backend
    /// errors are returned to the caller.
    pub async fn decide(
        &self,
        request: &DecisionRequest,
        active: &mut ActiveBackend,
    ) -> Result<Routed> {
        if let Some(planner) = &self.planner {
            match self.call(planner.as_ref(), request).await {
                Ok(decision) => match decision.problem(request) {
                    None => {
                        return Ok(Routed {
                            decision,
                            answered_by: planner.name().to_string(),
                            switched: None,
                            synthesized: false,
                        });
                    }
                    Some(problem) => {
                        warn!(planner = planner.name(), %problem, "planner answer unusable, using backend")
                    }
                },
                Err(e) => warn!(planner = planner.name(), error = %e, "planner failed, using backend"),
            }
        }

        let mut switched = None;
        let problem = match self.call_active(request, active, &mut switched).await {
            Ok((decision, answered_by)) => match decision.problem(request) {
                None => {
                    return Ok(Routed {
                        decision,
                        answered_by,
                        switched,
                        synthesized: false,
                    });
                }
                Some(problem) => problem,
            },
            Err(ReinError::MalformedDecision(problem)) => problem,
            Err(e) => return Err(e),
        };

        debug!(%problem, "retrying decision with clarification");
        let nudged = request.with_nudge(format!(
            "Your previous answer could not be used: {problem}. Reply with at least one of the \
             available actions, using their exact names."
        ));
        let problem = match self.call_active(&nudged, active, &mut switched).await {
            Ok((decision, answered_by)) => match decision.problem(request) {
                None => {
                    return Ok(Routed {
                        decision,
                        answered_by,
                        switched,
                        synthesized: false,
                    });
                }
                Some(problem) => problem,
            },
            Err(ReinError::MalformedDecision(problem)) => problem,
            Err(e) => return Err(e),
        };

        warn!(%problem, "backend gave no usable answer twice, synthesizing no-op");
        Ok(Routed {
            decision: synthesize_noop(request, &problem),
            answered_by: self.backend(*active).name().to_string(),
            switched,
            synthesized: true,
        })
    }

    /// Call the active backend, switching to the fallback once on a
    /// rate-limit or auth failure.
    async fn call_active(
        &self,
        request: &DecisionRequest,
        active: &mut ActiveBackend,
        switched: &mut Option<String>,
    ) -> Result<(Decision, String)> {
        let backend = Arc::clone(self.backend(*active));
        match self.call(backend.as_ref(), request).await {
            Ok(decision) => Ok((decision, backend.name().to_string())),
            Err(e) if e.triggers_fallback() && *active == ActiveBackend::Primary => {
                let Some(fallback) = &self.fallback else {
                    return Err(e);
                };
                info!(
                    from = backend.name(),
                    to = fallback.name(),
                    reason = %e,
                    "switching to fallback decision backend for the rest of the run"
                );
                *active = ActiveBackend::Fallback;
                *switched = Some(e.to_string());
                let decision = self.call(fallback.as_ref(), request).await?;
                Ok((decision, fallback.name().to_string()))
            }
            Err(e) => Err(e),
        }
    }

    async fn call(&self, backend: &dyn Decider, request: &DecisionRequest) -> Result<Decision> {
        match tokio::time::timeout(self.timeout, backend.decide(request)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(backend = backend.name(), timeout_secs = self.timeout.as_secs(), "decision timed out");
                Err(ReinError::DecisionTimeout {
                    timeout_secs: self.timeout.as_secs(),
                })
            }
        }
    }
}

/// The safe stand-in for an unusable answer: a short wait when offered,
/// otherwise an unsuccessful `done` (only `done` is offered then).
fn synthesize_noop(request: &DecisionRequest, problem: &str) -> Decision {
    let action = if request.offers(NOOP_ACTION) {
        ActionRecord::new(NOOP_ACTION, serde_json::json!({ "seconds": 1 }))
    } else {
        ActionRecord::done(false, format!("no usable decision: {problem}"))
    };
    Decision::new(vec![action]).with_thinking("no usable decision from backend")
}
