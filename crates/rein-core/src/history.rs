//! Append-only record of completed decision cycles.
//!
//! The history is what trace replay consumes, so it stores element
//! fingerprints rather than coordinates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use crate::action::{ActionRecord, ActionResult};
use crate::fingerprint::ElementFingerprint;

/// One completed decision cycle. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: u32,
    /// URL of the focused page when the step was observed.
    #[serde(default)]
    pub url: String,
    pub actions: Vec<ActionRecord>,
    /// One entry per action; `None` for actions that touch no element.
    pub fingerprints: Vec<Option<ElementFingerprint>>,
    pub results: Vec<ActionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl StepRecord {
    /// A record that carries only a run-ending error.
    pub fn terminal(step: u32, url: impl Into<String>, error: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            step,
            url: url.into(),
            actions: vec![],
            fingerprints: vec![],
            results: vec![ActionResult::error(error)],
            thinking: None,
            started_at: now,
            finished_at: now,
        }
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }

    pub fn has_errors(&self) -> bool {
        self.results.iter().any(ActionResult::is_error)
    }

    pub fn is_done(&self) -> bool {
        self.results.iter().any(|r| r.is_done)
    }

    /// The fingerprint recorded for the action at `idx`, if any.
    pub fn fingerprint(&self, idx: usize) -> Option<&ElementFingerprint> {
        self.fingerprints.get(idx).and_then(Option::as_ref)
    }

    /// The first element-targeting action and its fingerprint.
    pub fn primary_element_action(&self) -> Option<(&ActionRecord, &ElementFingerprint)> {
        self.actions
            .iter()
            .enumerate()
            .find_map(|(i, action)| self.fingerprint(i).map(|fp| (action, fp)))
    }
}

/// The ordered step history of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentHistory {
    pub run_id: Uuid,
    #[serde(default)]
    pub task: String,
    steps: Vec<StepRecord>,
}

impl AgentHistory {
    pub fn new(run_id: Uuid, task: impl Into<String>) -> Self {
        Self {
            run_id,
            task: task.into(),
            steps: Vec::new(),
        }
    }

    pub fn append(&mut self, record: StepRecord) {
        self.steps.push(record);
    }

    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn last(&self) -> Option<&StepRecord> {
        self.steps.last()
    }

    /// Whether the run ended with a successful `done`.
    pub fn is_successful(&self) -> bool {
        self.steps
            .last()
            .and_then(|s| s.results.iter().find(|r| r.is_done))
            .and_then(|r| r.success)
            .unwrap_or(false)
    }

    /// The error carried by the terminal record, if the run failed.
    pub fn final_error(&self) -> Option<&str> {
        self.steps
            .last()
            .filter(|s| s.actions.is_empty())
            .and_then(|s| s.results.first())
            .and_then(|r| r.error.as_deref())
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(raw: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn save(&self, path: &Path) -> crate::Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> crate::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }
}
