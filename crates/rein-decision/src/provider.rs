use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use rein_core::{ActionRecord, ActionResult, ActionSpec, PageObservation, ReinError, Result, RunId};

use crate::plan::{PlanStep, PlanUpdate};

/// Everything a backend gets to choose the next actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub run_id: RunId,
    pub step: u32,
    pub task: String,
    pub observation: PageObservation,
    /// The actions the backend may choose from this cycle.
    pub tools: Vec<ActionSpec>,
    #[serde(default)]
    pub plan: Vec<PlanStep>,
    /// Results of the previous step, for the backend to react to.
    #[serde(default)]
    pub previous_results: Vec<ActionResult>,
    /// Clarification appended when the previous answer was unusable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nudge: Option<String>,
}

impl DecisionRequest {
    pub fn offers(&self, action: &str) -> bool {
        self.tools.iter().any(|t| t.name == action)
    }

    pub fn with_nudge(&self, nudge: impl Into<String>) -> Self {
        Self {
            nudge: Some(nudge.into()),
            ..self.clone()
        }
    }
}

/// A backend's answer: an ordered batch of actions plus optional reasoning
/// and plan revision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    pub actions: Vec<ActionRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_update: Option<PlanUpdate>,
}

impl Decision {
    pub fn new(actions: Vec<ActionRecord>) -> Self {
        Self {
            actions,
            ..Default::default()
        }
    }

    /// A single-action decision.
    pub fn action(name: &str, params: Value) -> Self {
        Self::new(vec![ActionRecord::new(name, params)])
    }

    pub fn with_thinking(mut self, thinking: impl Into<String>) -> Self {
        self.thinking = Some(thinking.into());
        self
    }

    pub fn with_plan_update(mut self, update: PlanUpdate) -> Self {
        self.plan_update = Some(update);
        self
    }

    /// Why this decision cannot be executed against `request`, if it can't.
    pub fn problem(&self, request: &DecisionRequest) -> Option<String> {
        if self.actions.is_empty() {
            return Some("the answer contained no actions".into());
        }
        self.actions
            .iter()
            .find(|a| !request.offers(&a.name))
            .map(|a| format!("action '{}' is not available this step", a.name))
    }

    /// Parse a backend's raw JSON answer:
    ///
    /// ```json
    /// {
    ///   "thinking": "…",
    ///   "action": [{"click": {"index": 3}}, {"input_text": {"index": 4, "text": "hi"}}],
    ///   "plan": ["…"],
    ///   "current_plan_item": 1
    /// }
    /// ```
    pub fn parse(raw: &str) -> Result<Self> {
        let body = strip_code_fence(raw);
        let value: Value = serde_json::from_str(body)
            .map_err(|e| ReinError::MalformedDecision(format!("not JSON: {e}")))?;
        let Some(obj) = value.as_object() else {
            return Err(ReinError::MalformedDecision("expected a JSON object".into()));
        };

        let raw_actions = obj
            .get("action")
            .or_else(|| obj.get("actions"))
            .and_then(Value::as_array)
            .ok_or_else(|| ReinError::MalformedDecision("missing 'action' list".into()))?;

        let mut actions = Vec::with_capacity(raw_actions.len());
        for entry in raw_actions {
            let Some(map) = entry.as_object() else {
                return Err(ReinError::MalformedDecision(format!(
                    "action entry is not an object: {entry}"
                )));
            };
            let mut pairs = map.iter();
            let (Some((name, params)), None) = (pairs.next(), pairs.next()) else {
                return Err(ReinError::MalformedDecision(format!(
                    "action entry must have exactly one key: {entry}"
                )));
            };
            actions.push(ActionRecord::new(name.clone(), params.clone()));
        }

        let plan = obj.get("plan").and_then(Value::as_array).map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect::<Vec<_>>()
        });
        let current_index = obj
            .get("current_plan_item")
            .and_then(Value::as_u64)
            .map(|i| i as usize);
        let plan_update = (plan.is_some() || current_index.is_some()).then_some(PlanUpdate {
            plan,
            current_index,
        });

        Ok(Self {
            thinking: obj
                .get("thinking")
                .and_then(Value::as_str)
                .map(String::from),
            actions,
            plan_update,
        })
    }
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Anything that can choose the next actions.
///
/// Implementations report throttling as [`ReinError::RateLimited`] and
/// credential problems as [`ReinError::DecisionAuth`]; the router switches to
/// the fallback backend on exactly those two.
#[async_trait]
pub trait Decider: Send + Sync {
    fn name(&self) -> &str;

    async fn decide(&self, request: &DecisionRequest) -> Result<Decision>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_action_list() {
        let raw = r#"{
            "thinking": "search box is at index 4",
            "action": [{"input_text": {"index": 4, "text": "rust"}}, {"click": {"index": 5}}],
            "current_plan_item": 1
        }"#;
        let decision = Decision::parse(raw).unwrap();
        assert_eq!(decision.actions.len(), 2);
        assert_eq!(decision.actions[0].name, "input_text");
        assert_eq!(decision.actions[1].element_index(), Some(5));
        assert_eq!(decision.plan_update.unwrap().current_index, Some(1));
    }

    #[test]
    fn test_parse_fenced() {
        let raw = "```json\n{\"action\": [{\"done\": {\"success\": true, \"text\": \"ok\"}}]}\n```";
        let decision = Decision::parse(raw).unwrap();
        assert!(decision.actions[0].is_done());
        assert!(decision.plan_update.is_none());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for raw in [
            "I think we should click the button",
            r#"{"thinking": "no actions key"}"#,
            r#"{"action": [{"click": {"index": 1}, "scroll": {}}]}"#,
            r#"{"action": ["click"]}"#,
        ] {
            assert!(
                matches!(Decision::parse(raw), Err(ReinError::MalformedDecision(_))),
                "accepted: {raw}"
            );
        }
    }
}
