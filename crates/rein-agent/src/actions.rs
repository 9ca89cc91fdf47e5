//! Built-in browser actions.
//!
//! Element-targeting actions address elements by the `index` the observer
//! assigned and resolve them through the xpath captured in the same
//! observation. Actions that move the page to a different document or tab
//! declare `terminates_sequence`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use rein_core::{ActionResult, ActionSpec, DONE_ACTION, NOOP_ACTION, ReinError, Result};

use crate::action::{Action, ActionContext, parse_params};

/// Upper bound for a single `wait` action.
const MAX_WAIT_SECS: u64 = 10;

/// Default scroll distance in pixels.
const DEFAULT_SCROLL_PX: i64 = 600;

pub fn builtins() -> Vec<Arc<dyn Action>> {
    vec![
        Arc::new(NavigateAction),
        Arc::new(GoBackAction),
        Arc::new(ClickAction),
        Arc::new(InputTextAction),
        Arc::new(ScrollAction),
        Arc::new(SwitchTabAction),
        Arc::new(OpenTabAction),
        Arc::new(WaitAction),
        Arc::new(DoneAction),
    ]
}

fn spec(name: &str, description: &str, parameters: Value) -> ActionSpec {
    ActionSpec {
        name: name.into(),
        description: description.into(),
        parameters,
        terminates_sequence: false,
    }
}

/// Run `body` against the element at `xpath`; the script sees it as `el`.
/// Resolves to `{"ok": true, ...}` or `{"missing": true}`.
fn element_script(xpath: &str, body: &str) -> String {
    let xpath = serde_json::to_string(xpath).unwrap_or_else(|_| "\"\"".into());
    format!(
        r#"(() => {{
            const el = document.evaluate({xpath}, document, null,
                XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue;
            if (!el) return {{ missing: true }};
            el.scrollIntoView({{ block: 'center' }});
            {body}
        }})()"#
    )
}

/// Evaluate an element script and turn a missing element into
/// [`ReinError::ElementNotFound`].
async fn run_on_element(
    ctx: &ActionContext<'_>,
    action: &str,
    index: u32,
    body: &str,
) -> Result<Value> {
    let Some(element) = ctx.observation.element(index) else {
        return Err(ReinError::ElementNotFound(format!(
            "no element with index {index} in the current observation"
        )));
    };
    let outcome = ctx.browser.evaluate(&element_script(&element.xpath, body)).await?;
    if outcome.get("missing").and_then(Value::as_bool) == Some(true) {
        return Err(ReinError::ElementNotFound(format!(
            "<{}> at {} is no longer on the page",
            element.tag, element.xpath
        )));
    }
    if let Some(error) = outcome.get("error").and_then(Value::as_str) {
        return Err(ReinError::ActionFailed {
            action: action.into(),
            reason: error.to_string(),
        });
    }
    Ok(outcome)
}

// ── Navigation ─────────────────────────────────────────────────

#[derive(Deserialize)]
struct UrlParams {
    url: String,
}

pub struct NavigateAction;

#[async_trait]
impl Action for NavigateAction {
    fn name(&self) -> &str {
        "navigate"
    }

    fn spec(&self) -> ActionSpec {
        spec(
            "navigate",
            "Navigate the current tab to a URL.",
            json!({
                "type": "object",
                "properties": { "url": { "type": "string" } },
                "required": ["url"]
            }),
        )
    }

    fn terminates_sequence(&self) -> bool {
        true
    }

    async fn execute(&self, ctx: &ActionContext<'_>, params: &Value) -> Result<ActionResult> {
        let p: UrlParams = parse_params(self.name(), params)?;
        let readiness = ctx.browser.navigate(&p.url).await?;
        debug!(url = %p.url, settled = readiness.is_settled(), "navigated");
        Ok(ActionResult::with_content(format!("navigated to {}", p.url)))
    }
}

pub struct GoBackAction;

#[async_trait]
impl Action for GoBackAction {
    fn name(&self) -> &str {
        "go_back"
    }

    fn spec(&self) -> ActionSpec {
        spec(
            "go_back",
            "Go back to the previous page in this tab's history.",
            json!({ "type": "object", "properties": {} }),
        )
    }

    fn terminates_sequence(&self) -> bool {
        true
    }

    async fn execute(&self, ctx: &ActionContext<'_>, _params: &Value) -> Result<ActionResult> {
        ctx.browser.go_back().await?;
        Ok(ActionResult::with_content("went back"))
    }
}

// ── Element interaction ────────────────────────────────────────

#[derive(Deserialize)]
struct IndexParams {
    index: u32,
}

pub struct ClickAction;

#[async_trait]
impl Action for ClickAction {
    fn name(&self) -> &str {
        "click"
    }

    fn spec(&self) -> ActionSpec {
        spec(
            "click",
            "Click the element with the given index.",
            json!({
                "type": "object",
                "properties": { "index": { "type": "integer" } },
                "required": ["index"]
            }),
        )
    }

    async fn execute(&self, ctx: &ActionContext<'_>, params: &Value) -> Result<ActionResult> {
        let p: IndexParams = parse_params(self.name(), params)?;
        run_on_element(ctx, self.name(), p.index, "el.click(); return { ok: true };").await?;
        Ok(ActionResult::with_content(format!("clicked element {}", p.index)))
    }
}

#[derive(Deserialize)]
struct InputParams {
    index: u32,
    text: String,
}

pub struct InputTextAction;

#[async_trait]
impl Action for InputTextAction {
    fn name(&self) -> &str {
        "input_text"
    }

    fn spec(&self) -> ActionSpec {
        spec(
            "input_text",
            "Replace the value of the input element with the given index.",
            json!({
                "type": "object",
                "properties": {
                    "index": { "type": "integer" },
                    "text": { "type": "string" }
                },
                "required": ["index", "text"]
            }),
        )
    }

    async fn execute(&self, ctx: &ActionContext<'_>, params: &Value) -> Result<ActionResult> {
        let p: InputParams = parse_params(self.name(), params)?;
        let text = serde_json::to_string(&p.text)?;
        let body = format!(
            r#"if (!('value' in el) && !el.isContentEditable) return {{ error: 'element is not editable' }};
            el.focus();
            if ('value' in el) {{ el.value = {text}; }} else {{ el.textContent = {text}; }}
            el.dispatchEvent(new Event('input', {{ bubbles: true }}));
            el.dispatchEvent(new Event('change', {{ bubbles: true }}));
            return {{ ok: true }};"#
        );
        run_on_element(ctx, self.name(), p.index, &body).await?;
        Ok(ActionResult::with_content(format!(
            "typed {} characters into element {}",
            p.text.chars().count(),
            p.index
        )))
    }
}

#[derive(Deserialize)]
struct ScrollParams {
    #[serde(default = "default_direction")]
    direction: String,
    #[serde(default)]
    amount: Option<i64>,
}

fn default_direction() -> String {
    "down".into()
}

pub struct ScrollAction;

#[async_trait]
impl Action for ScrollAction {
    fn name(&self) -> &str {
        "scroll"
    }

    fn spec(&self) -> ActionSpec {
        spec(
            "scroll",
            "Scroll the page up or down.",
            json!({
                "type": "object",
                "properties": {
                    "direction": { "type": "string", "enum": ["up", "down"] },
                    "amount": { "type": "integer", "description": "Pixels; default one screen" }
                }
            }),
        )
    }

    async fn execute(&self, ctx: &ActionContext<'_>, params: &Value) -> Result<ActionResult> {
        let p: ScrollParams = parse_params(self.name(), params)?;
        let amount = p.amount.unwrap_or(DEFAULT_SCROLL_PX).abs();
        let dy = match p.direction.as_str() {
            "up" => -amount,
            "down" => amount,
            other => {
                return Err(ReinError::ActionFailed {
                    action: self.name().into(),
                    reason: format!("unknown direction '{other}'"),
                });
            }
        };
        ctx.browser
            .evaluate(&format!("window.scrollBy(0, {dy}); window.scrollY"))
            .await?;
        Ok(ActionResult::with_content(format!("scrolled {} {amount}px", p.direction)))
    }
}

// ── Tabs ───────────────────────────────────────────────────────

#[derive(Deserialize)]
struct TabParams {
    target_id: String,
}

pub struct SwitchTabAction;

#[async_trait]
impl Action for SwitchTabAction {
    fn name(&self) -> &str {
        "switch_tab"
    }

    fn spec(&self) -> ActionSpec {
        spec(
            "switch_tab",
            "Move focus to another open tab.",
            json!({
                "type": "object",
                "properties": { "target_id": { "type": "string" } },
                "required": ["target_id"]
            }),
        )
    }

    fn terminates_sequence(&self) -> bool {
        true
    }

    async fn execute(&self, ctx: &ActionContext<'_>, params: &Value) -> Result<ActionResult> {
        let p: TabParams = parse_params(self.name(), params)?;
        ctx.browser.switch_tab(&p.target_id).await?;
        Ok(ActionResult::with_content(format!("switched to tab {}", p.target_id)))
    }
}

pub struct OpenTabAction;

#[async_trait]
impl Action for OpenTabAction {
    fn name(&self) -> &str {
        "open_tab"
    }

    fn spec(&self) -> ActionSpec {
        spec(
            "open_tab",
            "Open a URL in a new tab and focus it.",
            json!({
                "type": "object",
                "properties": { "url": { "type": "string" } },
                "required": ["url"]
            }),
        )
    }

    fn terminates_sequence(&self) -> bool {
        true
    }

    async fn execute(&self, ctx: &ActionContext<'_>, params: &Value) -> Result<ActionResult> {
        let p: UrlParams = parse_params(self.name(), params)?;
        let target_id = ctx.browser.open_tab(&p.url).await?;
        Ok(ActionResult::with_content(format!("opened {} in tab {target_id}", p.url)))
    }
}

// ── Control ────────────────────────────────────────────────────

#[derive(Deserialize)]
struct WaitParams {
    #[serde(default = "default_wait")]
    seconds: u64,
}

fn default_wait() -> u64 {
    1
}

pub struct WaitAction;

#[async_trait]
impl Action for WaitAction {
    fn name(&self) -> &str {
        NOOP_ACTION
    }

    fn spec(&self) -> ActionSpec {
        spec(
            NOOP_ACTION,
            "Wait a few seconds for the page to settle.",
            json!({
                "type": "object",
                "properties": { "seconds": { "type": "integer", "maximum": MAX_WAIT_SECS } }
            }),
        )
    }

    async fn execute(&self, ctx: &ActionContext<'_>, params: &Value) -> Result<ActionResult> {
        let p: WaitParams = parse_params(self.name(), params)?;
        let seconds = p.seconds.min(MAX_WAIT_SECS);
        ctx.control.sleep(Duration::from_secs(seconds)).await?;
        Ok(ActionResult::with_content(format!("waited {seconds}s")))
    }
}

#[derive(Deserialize)]
struct DoneParams {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    text: String,
}

pub struct DoneAction;

#[async_trait]
impl Action for DoneAction {
    fn name(&self) -> &str {
        DONE_ACTION
    }

    fn spec(&self) -> ActionSpec {
        spec(
            DONE_ACTION,
            "Finish the task. Must be the only action in its step.",
            json!({
                "type": "object",
                "properties": {
                    "success": { "type": "boolean" },
                    "text": { "type": "string", "description": "Final answer for the user" }
                },
                "required": ["success", "text"]
            }),
        )
    }

    async fn execute(&self, _ctx: &ActionContext<'_>, params: &Value) -> Result<ActionResult> {
        let p: DoneParams = parse_params(self.name(), params)?;
        Ok(ActionResult::done(p.success, p.text))
    }
}
