use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Pending,
    Current,
    Done,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub text: String,
    pub status: PlanStatus,
}

/// A plan revision or index advance carried by a decision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanUpdate {
    /// Replace the whole plan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Vec<String>>,
    /// Move the current marker to this item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_index: Option<usize>,
}

/// The run's working plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    steps: Vec<PlanStep>,
}

impl Plan {
    pub fn new<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut plan = Self::default();
        plan.replace(items.into_iter().map(Into::into).collect(), 0);
        plan
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.steps
            .iter()
            .position(|s| s.status == PlanStatus::Current)
    }

    /// Apply a revision. A new plan wins over a bare index advance.
    pub fn apply(&mut self, update: &PlanUpdate) {
        if let Some(items) = &update.plan {
            self.replace(items.clone(), update.current_index.unwrap_or(0));
        } else if let Some(index) = update.current_index {
            self.advance_to(index);
        }
    }

    fn replace(&mut self, items: Vec<String>, current: usize) {
        self.steps = items
            .into_iter()
            .map(|text| PlanStep {
                text,
                status: PlanStatus::Pending,
            })
            .collect();
        self.advance_to(current);
    }

    /// Everything before `index` is done, `index` is current. An index past
    /// the end completes the plan.
    fn advance_to(&mut self, index: usize) {
        for (i, step) in self.steps.iter_mut().enumerate() {
            if step.status == PlanStatus::Skipped {
                continue;
            }
            step.status = match i.cmp(&index) {
                std::cmp::Ordering::Less => PlanStatus::Done,
                std::cmp::Ordering::Equal => PlanStatus::Current,
                std::cmp::Ordering::Greater => PlanStatus::Pending,
            };
        }
    }

    pub fn skip(&mut self, index: usize) {
        if let Some(step) = self.steps.get_mut(index) {
            step.status = PlanStatus::Skipped;
        }
    }

    /// Checklist rendering for the decision backend.
    pub fn render(&self) -> String {
        self.steps
            .iter()
            .enumerate()
            .map(|(i, step)| {
                let mark = match step.status {
                    PlanStatus::Done => "[x]",
                    PlanStatus::Current => "[>]",
                    PlanStatus::Pending => "[ ]",
                    PlanStatus::Skipped => "[-]",
                };
                format!("{mark} {i}: {}", step.text)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn statuses(plan: &Plan) -> Vec<PlanStatus> {
        plan.steps().iter().map(|s| s.status).collect()
    }

    #[test]
    fn test_new_plan_marks_first_current() {
        let plan = Plan::new(["open site", "search", "report"]);
        assert_eq!(
            statuses(&plan),
            vec![PlanStatus::Current, PlanStatus::Pending, PlanStatus::Pending]
        );
    }

    #[test]
    fn test_index_advance() {
        let mut plan = Plan::new(["a", "b", "c"]);
        plan.skip(1);
        plan.apply(&PlanUpdate {
            plan: None,
            current_index: Some(2),
        });
        assert_eq!(
            statuses(&plan),
            vec![PlanStatus::Done, PlanStatus::Skipped, PlanStatus::Current]
        );
        assert_eq!(plan.current_index(), Some(2));
    }

    #[test]
    fn test_index_past_end_completes() {
        let mut plan = Plan::new(["a", "b"]);
        plan.apply(&PlanUpdate {
            plan: None,
            current_index: Some(9),
        });
        assert!(plan.steps().iter().all(|s| s.status == PlanStatus::Done));
        assert_eq!(plan.current_index(), None);
    }

    #[test]
    fn test_revision_replaces_plan() {
        let mut plan = Plan::new(["a", "b"]);
        plan.apply(&PlanUpdate {
            plan: Some(vec!["x".into(), "y".into(), "z".into()]),
            current_index: Some(1),
        });
        assert_eq!(plan.steps().len(), 3);
        assert_eq!(plan.steps()[1].text, "y");
        assert_eq!(plan.current_index(), Some(1));
    }

    #[test]
    fn test_render() {
        let plan = Plan::new(["open", "read"]);
        assert_eq!(plan.render(), "[>] 0: open\n[ ] 1: read");
    }
}
