//! In-memory stand-ins for the browser, the observer and actions.
//!
//! Used by this crate's tests and by downstream crates that drive the
//! executor or the step loop without a real browser.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rein_cdp::NavigationReadiness;
use rein_core::{
    ActionResult, ActionSpec, PageObservation, ReinError, Result, Target, TargetId, TargetType,
};

use crate::action::{Action, ActionContext};
use crate::browser::BrowserContext;
use crate::observer::Observer;

// ── StaticPage ─────────────────────────────────────────────────

struct PageState {
    url: String,
    back_stack: Vec<String>,
    focus: Option<TargetId>,
    targets: Vec<Target>,
    eval_result: Value,
    evaluations: Vec<String>,
    navigations: Vec<String>,
    next_tab: u32,
}

/// A single-tab browser whose state is set directly by tests.
///
/// Starts focused on target `T1` at the given URL. Every script evaluation
/// is recorded and answered with the configured result (`{"ok": true}` by
/// default).
pub struct StaticPage {
    state: Mutex<PageState>,
}

impl StaticPage {
    pub fn new(url: &str) -> Self {
        Self {
            state: Mutex::new(PageState {
                url: url.to_string(),
                back_stack: Vec::new(),
                focus: Some("T1".into()),
                targets: vec![page_target("T1", url)],
                eval_result: json!({ "ok": true }),
                evaluations: Vec::new(),
                navigations: Vec::new(),
                next_tab: 2,
            }),
        }
    }

    pub fn set_url(&self, url: &str) {
        let mut state = self.state.lock();
        let previous = std::mem::replace(&mut state.url, url.to_string());
        state.back_stack.push(previous);
    }

    pub fn set_focus(&self, target_id: &str) {
        self.state.lock().focus = Some(target_id.to_string());
    }

    /// Simulate the focused target going away with nothing to recover to.
    pub fn lose_focus(&self) {
        self.state.lock().focus = None;
    }

    pub fn set_eval_result(&self, result: Value) {
        self.state.lock().eval_result = result;
    }

    pub fn url(&self) -> String {
        self.state.lock().url.clone()
    }

    pub fn evaluations(&self) -> Vec<String> {
        self.state.lock().evaluations.clone()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.state.lock().navigations.clone()
    }
}

fn page_target(id: &str, url: &str) -> Target {
    Target {
        target_id: id.to_string(),
        kind: TargetType::Page,
        url: url.to_string(),
        title: String::new(),
    }
}

#[async_trait]
impl BrowserContext for StaticPage {
    fn focused_target(&self) -> Option<TargetId> {
        self.state.lock().focus.clone()
    }

    fn targets(&self) -> Vec<Target> {
        self.state.lock().targets.clone()
    }

    async fn ensure_valid_focus(&self, _timeout: Duration) -> bool {
        self.state.lock().focus.is_some()
    }

    async fn current_url(&self) -> Result<String> {
        let state = self.state.lock();
        if state.focus.is_none() {
            return Err(ReinError::NoFocus);
        }
        Ok(state.url.clone())
    }

    async fn navigate(&self, url: &str) -> Result<NavigationReadiness> {
        self.set_url(url);
        let mut state = self.state.lock();
        state.navigations.push(url.to_string());
        Ok(NavigationReadiness::Settled(format!("L{}", state.navigations.len())))
    }

    async fn go_back(&self) -> Result<()> {
        let mut state = self.state.lock();
        let Some(previous) = state.back_stack.pop() else {
            return Err(ReinError::ActionFailed {
                action: "go_back".into(),
                reason: "no previous page in history".into(),
            });
        };
        state.url = previous;
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> Result<Value> {
        let mut state = self.state.lock();
        state.evaluations.push(expression.to_string());
        Ok(state.eval_result.clone())
    }

    async fn switch_tab(&self, target_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        if !state.targets.iter().any(|t| t.target_id == target_id) {
            return Err(ReinError::TargetNotFound(target_id.to_string()));
        }
        state.focus = Some(target_id.to_string());
        Ok(())
    }

    async fn open_tab(&self, url: &str) -> Result<TargetId> {
        let mut state = self.state.lock();
        let id = format!("T{}", state.next_tab);
        state.next_tab += 1;
        state.targets.push(page_target(&id, url));
        state.focus = Some(id.clone());
        state.url = url.to_string();
        Ok(id)
    }
}

// ── ScriptedObserver ───────────────────────────────────────────

/// Returns queued observations in order, then repeats the last one.
pub struct ScriptedObserver {
    queue: Mutex<VecDeque<Option<PageObservation>>>,
    last: Mutex<Option<PageObservation>>,
    calls: AtomicUsize,
}

impl ScriptedObserver {
    pub fn new(observation: PageObservation) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            last: Mutex::new(Some(observation)),
            calls: AtomicUsize::new(0),
        }
    }

    /// Queue an observation to return before falling back to the repeat.
    pub fn then(self, observation: PageObservation) -> Self {
        self.queue.lock().push_back(Some(observation));
        self
    }

    /// Queue one failed observation.
    pub fn then_fail(self) -> Self {
        self.queue.lock().push_back(None);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Observer for ScriptedObserver {
    async fn observe(&self, _browser: &dyn BrowserContext) -> Result<PageObservation> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.queue.lock().pop_front();
        match next {
            Some(Some(observation)) => {
                *self.last.lock() = Some(observation.clone());
                Ok(observation)
            }
            Some(None) => Err(ReinError::ObservationFailed("scripted failure".into())),
            None => self
                .last
                .lock()
                .clone()
                .ok_or_else(|| ReinError::ObservationFailed("nothing to observe".into())),
        }
    }
}

// ── RecordingAction ────────────────────────────────────────────

/// What a [`RecordingAction`] does on one call.
#[derive(Debug, Clone)]
pub enum Outcome {
    Result(ActionResult),
    Fail(String),
    NotFound,
    ConnectionClosed,
}

/// An action that records its calls and plays back scripted outcomes,
/// succeeding once the script runs out.
pub struct RecordingAction {
    name: String,
    terminates: bool,
    outcomes: Mutex<VecDeque<Outcome>>,
    /// When set, each successful call moves this page to the URL.
    moves_page: Option<(Arc<StaticPage>, String)>,
    /// When set, each successful call moves this page's focus to the target.
    moves_focus: Option<(Arc<StaticPage>, String)>,
    calls: Mutex<Vec<Value>>,
}

impl RecordingAction {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            terminates: false,
            outcomes: Mutex::new(VecDeque::new()),
            moves_page: None,
            moves_focus: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn terminating(mut self) -> Self {
        self.terminates = true;
        self
    }

    /// Change `page`'s URL on every successful call, like a click that
    /// triggers client-side navigation.
    pub fn navigates(mut self, page: Arc<StaticPage>, url: &str) -> Self {
        self.moves_page = Some((page, url.to_string()));
        self
    }

    /// Focus `target_id` on every successful call without touching the URL,
    /// like a click that opens a popup.
    pub fn switches_focus(mut self, page: Arc<StaticPage>, target_id: &str) -> Self {
        self.moves_focus = Some((page, target_id.to_string()));
        self
    }

    pub fn then(self, outcome: Outcome) -> Self {
        self.outcomes.lock().push_back(outcome);
        self
    }

    pub fn then_result(self, result: ActionResult) -> Self {
        self.then(Outcome::Result(result))
    }

    pub fn then_fail(self, reason: &str) -> Self {
        self.then(Outcome::Fail(reason.to_string()))
    }

    pub fn then_not_found(self) -> Self {
        self.then(Outcome::NotFound)
    }

    pub fn then_connection_closed(self) -> Self {
        self.then(Outcome::ConnectionClosed)
    }

    pub fn calls(&self) -> Vec<Value> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl Action for RecordingAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn spec(&self) -> ActionSpec {
        ActionSpec {
            name: self.name.clone(),
            description: format!("test action {}", self.name),
            parameters: json!({ "type": "object" }),
            terminates_sequence: self.terminates,
        }
    }

    fn terminates_sequence(&self) -> bool {
        self.terminates
    }

    async fn execute(&self, _ctx: &ActionContext<'_>, params: &Value) -> Result<ActionResult> {
        self.calls.lock().push(params.clone());
        let outcome = self.outcomes.lock().pop_front();
        let result = match outcome {
            None => ActionResult::ok(),
            Some(Outcome::Result(result)) => result,
            Some(Outcome::Fail(reason)) => {
                return Err(ReinError::ActionFailed {
                    action: self.name.clone(),
                    reason,
                });
            }
            Some(Outcome::NotFound) => {
                return Err(ReinError::ElementNotFound(format!(
                    "{}: {params}",
                    self.name
                )));
            }
            Some(Outcome::ConnectionClosed) => return Err(ReinError::ConnectionClosed),
        };
        if let Some((page, url)) = &self.moves_page {
            page.set_url(url);
        }
        if let Some((page, target_id)) = &self.moves_focus {
            page.set_focus(target_id);
        }
        Ok(result)
    }
}
