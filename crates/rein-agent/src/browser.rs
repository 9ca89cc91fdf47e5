//! The focus-relative view of a browser that actions and the step loop use.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::{Duration, Instant};
use tracing::debug;

use rein_cdp::{NavigationReadiness, SessionRegistry};
use rein_core::{ReinError, Result, Target, TargetId};

/// Everything the loop needs from a browser, always relative to the
/// current agent focus.
#[async_trait]
pub trait BrowserContext: Send + Sync {
    fn focused_target(&self) -> Option<TargetId>;

    fn targets(&self) -> Vec<Target>;

    /// Make sure focus points at a live page; `false` means no page is usable.
    async fn ensure_valid_focus(&self, timeout: Duration) -> bool;

    async fn current_url(&self) -> Result<String>;

    async fn navigate(&self, url: &str) -> Result<NavigationReadiness>;

    async fn go_back(&self) -> Result<()>;

    /// Evaluate a script in the focused page and return its value.
    async fn evaluate(&self, expression: &str) -> Result<Value>;

    async fn switch_tab(&self, target_id: &str) -> Result<()>;

    /// Open a tab, focus it and return its target id.
    async fn open_tab(&self, url: &str) -> Result<TargetId>;
}

#[async_trait]
impl BrowserContext for SessionRegistry {
    fn focused_target(&self) -> Option<TargetId> {
        SessionRegistry::focused_target(self)
    }

    fn targets(&self) -> Vec<Target> {
        SessionRegistry::targets(self)
    }

    async fn ensure_valid_focus(&self, timeout: Duration) -> bool {
        SessionRegistry::ensure_valid_focus(self, timeout).await
    }

    async fn current_url(&self) -> Result<String> {
        let session = self.get_or_create_session(None, false).await?;
        match session.evaluate("location.href").await {
            Ok(Value::String(url)) => Ok(url),
            Ok(_) | Err(ReinError::Protocol { .. }) => self
                .target(session.target_id())
                .map(|t| t.url)
                .ok_or_else(|| ReinError::TargetNotFound(session.target_id().to_string())),
            Err(e) => Err(e),
        }
    }

    async fn navigate(&self, url: &str) -> Result<NavigationReadiness> {
        let session = self.get_or_create_session(None, false).await?;
        SessionRegistry::navigate(self, &session, url).await
    }

    async fn go_back(&self) -> Result<()> {
        let session = self.get_or_create_session(None, false).await?;
        let history = session
            .send("Page.getNavigationHistory", json!({}))
            .await?;
        let current = history
            .get("currentIndex")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize;
        if current == 0 {
            return Err(ReinError::ActionFailed {
                action: "go_back".into(),
                reason: "no previous page in history".into(),
            });
        }
        let Some(entry_id) = history
            .pointer(&format!("/entries/{}/id", current - 1))
            .and_then(Value::as_i64)
        else {
            return Err(ReinError::ActionFailed {
                action: "go_back".into(),
                reason: "navigation history has no previous entry".into(),
            });
        };

        let since = Instant::now();
        session
            .send("Page.navigateToHistoryEntry", json!({ "entryId": entry_id }))
            .await?;
        let readiness = self
            .wait_for_lifecycle(
                session.session_id(),
                None,
                since,
                self.config().navigation_timeout(true),
            )
            .await;
        debug!(?readiness, "history navigation finished");
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> Result<Value> {
        let session = self.get_or_create_session(None, false).await?;
        session.evaluate(expression).await
    }

    async fn switch_tab(&self, target_id: &str) -> Result<()> {
        self.switch_focus(target_id).await.map(|_| ())
    }

    async fn open_tab(&self, url: &str) -> Result<TargetId> {
        let session = self.create_tab(url).await?;
        Ok(session.target_id().to_string())
    }
}
