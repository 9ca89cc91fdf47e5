//! The live target/session graph and the agent focus pointer.
//!
//! All mutation happens here: browser notifications arrive through a
//! transport subscription and are applied under one write lock, so a detach
//! removes the target, invalidates its sessions and clears focus in a single
//! step. Focus only ever moves through [`SessionRegistry::set_focus`] and the
//! recovery path of [`SessionRegistry::ensure_valid_focus`], both of which
//! reject non-page targets.

use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use rein_config::SessionConfig;
use rein_core::{Event, EventBus, ReinError, Result, SessionId, Target, TargetId, TargetType};

use crate::lifecycle::{LifecycleBuffer, LifecycleEvent, NavigationReadiness, same_origin};
use crate::protocol::CdpEvent;
use crate::transport::{Subscription, Transport};

/// A command channel bound to one attachment of one target.
///
/// Handles are never reused: after the target detaches every send fails with
/// [`ReinError::TargetDetached`], and a re-attach yields a new session.
pub struct CdpSession {
    target_id: TargetId,
    session_id: SessionId,
    transport: Arc<Transport>,
    alive: AtomicBool,
}

impl CdpSession {
    pub fn new(target_id: TargetId, session_id: SessionId, transport: Arc<Transport>) -> Self {
        Self {
            target_id,
            session_id,
            transport,
            alive: AtomicBool::new(true),
        }
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn invalidate(&self) {
        self.alive.store(false, Ordering::Release);
    }

    /// Send a command scoped to this session.
    pub async fn send(&self, method: &str, params: Value) -> Result<Value> {
        if !self.is_alive() {
            return Err(ReinError::TargetDetached(self.target_id.clone()));
        }
        let outcome = self
            .transport
            .send_with_session(method, params, Some(&self.session_id))
            .await;
        match outcome {
            // The browser answers commands on a session it just tore down
            // with a protocol error; report the detach instead.
            Err(ReinError::Protocol { .. }) if !self.is_alive() => {
                Err(ReinError::TargetDetached(self.target_id.clone()))
            }
            other => other,
        }
    }

    /// Evaluate a JavaScript expression and return its value.
    pub async fn evaluate(&self, expression: &str) -> Result<Value> {
        let response = self
            .send(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;
        if let Some(details) = response.get("exceptionDetails") {
            let text = details
                .pointer("/exception/description")
                .or_else(|| details.get("text"))
                .and_then(Value::as_str)
                .unwrap_or("script threw");
            return Err(ReinError::Protocol {
                code: 0,
                message: text.to_string(),
            });
        }
        Ok(response
            .pointer("/result/value")
            .cloned()
            .unwrap_or(Value::Null))
    }
}

impl std::fmt::Debug for CdpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CdpSession")
            .field("target_id", &self.target_id)
            .field("session_id", &self.session_id)
            .field("alive", &self.is_alive())
            .finish()
    }
}

struct TrackedTarget {
    target: Target,
    /// Creation order, used to pick a recovery page.
    seq: u64,
}

#[derive(Default)]
struct Graph {
    targets: HashMap<TargetId, TrackedTarget>,
    sessions: HashMap<SessionId, Arc<CdpSession>>,
    focus: Option<TargetId>,
    next_seq: u64,
}

impl Graph {
    fn upsert_target(&mut self, target: Target) -> bool {
        if let Some(tracked) = self.targets.get_mut(&target.target_id) {
            tracked.target.url = target.url;
            tracked.target.title = target.title;
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.targets
            .insert(target.target_id.clone(), TrackedTarget { target, seq });
        true
    }

    fn session_for(&self, target_id: &str) -> Option<Arc<CdpSession>> {
        self.sessions
            .values()
            .find(|s| s.target_id == target_id && s.is_alive())
            .cloned()
    }

    /// Remove a target and every session bound to it. Returns the removed
    /// session ids and whether focus was cleared.
    fn remove_target(&mut self, target_id: &str) -> (Vec<SessionId>, bool) {
        self.targets.remove(target_id);
        let doomed: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.target_id == target_id)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &doomed {
            if let Some(session) = self.sessions.remove(id) {
                session.invalidate();
            }
        }
        let cleared = self.focus.as_deref() == Some(target_id);
        if cleared {
            self.focus = None;
        }
        (doomed, cleared)
    }

    fn focus_is_live(&self) -> bool {
        self.focus
            .as_ref()
            .and_then(|id| self.targets.get(id))
            .is_some_and(|t| t.target.kind.is_focusable())
    }

    /// The most recently created page target that has a live session.
    fn recovery_candidate(&self) -> Option<TargetId> {
        self.targets
            .values()
            .filter(|t| t.target.kind.is_focusable())
            .filter(|t| self.session_for(&t.target.target_id).is_some())
            .max_by_key(|t| t.seq)
            .map(|t| t.target.target_id.clone())
    }
}

struct Inner {
    transport: Arc<Transport>,
    config: SessionConfig,
    graph: RwLock<Graph>,
    lifecycle: DashMap<SessionId, LifecycleBuffer>,
    changed: Notify,
    bus: EventBus,
}

impl Inner {
    fn register_session(self: &Arc<Self>, target: Target, session_id: SessionId) -> Arc<CdpSession> {
        let target_id = target.target_id.clone();
        let kind = target.kind.clone();
        let (session, fresh) = {
            let mut graph = self.graph.write();
            graph.upsert_target(target);
            match graph.sessions.get(&session_id) {
                Some(existing) => (Arc::clone(existing), false),
                None => {
                    let session = Arc::new(CdpSession::new(
                        target_id.clone(),
                        session_id.clone(),
                        Arc::clone(&self.transport),
                    ));
                    graph.sessions.insert(session_id.clone(), Arc::clone(&session));
                    (session, true)
                }
            }
        };

        if fresh {
            self.lifecycle.insert(
                session_id.clone(),
                LifecycleBuffer::new(self.config.lifecycle_buffer),
            );
            debug!(target_id = %target_id, session_id = %session_id, kind = %kind, "session attached");
            self.bus.publish(Event::TargetAttached {
                target_id,
                target_type: kind.to_string(),
            });
        }
        self.changed.notify_waiters();
        session
    }

    fn remove_target(&self, target_id: &str) {
        let (sessions, cleared) = {
            let mut graph = self.graph.write();
            if !graph.targets.contains_key(target_id) {
                return;
            }
            graph.remove_target(target_id)
        };
        for id in &sessions {
            self.lifecycle.remove(id);
        }
        info!(target_id = %target_id, sessions = sessions.len(), focus_cleared = cleared, "target detached");
        self.bus.publish(Event::TargetDetached {
            target_id: target_id.to_string(),
        });
        if cleared {
            self.bus.publish(Event::FocusChanged { target_id: None });
        }
        self.changed.notify_waiters();
    }

    fn handle_event(self: &Arc<Self>, event: &CdpEvent) {
        match event.method.as_str() {
            "Target.attachedToTarget" => {
                let Some(session_id) = event.str_param("sessionId") else {
                    return;
                };
                let Some(target) = event.params.get("targetInfo").and_then(parse_target_info)
                else {
                    return;
                };
                let is_page = target.kind.is_focusable();
                let session = self.register_session(target, session_id.to_string());
                if is_page {
                    tokio::spawn(enable_page_domains(session));
                }
            }
            "Target.detachedFromTarget" => {
                let target_id = match event.str_param("targetId") {
                    Some(id) => Some(id.to_string()),
                    None => event.str_param("sessionId").and_then(|sid| {
                        self.graph
                            .read()
                            .sessions
                            .get(sid)
                            .map(|s| s.target_id.clone())
                    }),
                };
                if let Some(target_id) = target_id {
                    self.remove_target(&target_id);
                }
            }
            "Target.targetDestroyed" => {
                if let Some(target_id) = event.str_param("targetId") {
                    self.remove_target(target_id);
                }
            }
            "Target.targetCreated" | "Target.targetInfoChanged" => {
                if let Some(target) = event.params.get("targetInfo").and_then(parse_target_info) {
                    self.graph.write().upsert_target(target);
                    self.changed.notify_waiters();
                }
            }
            "Page.lifecycleEvent" => {
                let Some(session_id) = event.session_id.as_deref() else {
                    return;
                };
                let Some(name) = event.str_param("name") else {
                    return;
                };
                if let Some(mut buffer) = self.lifecycle.get_mut(session_id) {
                    buffer.push(LifecycleEvent {
                        name: name.to_string(),
                        loader_id: event.str_param("loaderId").unwrap_or_default().to_string(),
                        frame_id: event.str_param("frameId").unwrap_or_default().to_string(),
                        at: Instant::now(),
                    });
                }
            }
            _ => {}
        }
    }
}

async fn enable_page_domains(session: Arc<CdpSession>) {
    for (method, params) in [
        ("Page.enable", json!({})),
        ("Page.setLifecycleEventsEnabled", json!({ "enabled": true })),
        ("Runtime.enable", json!({})),
    ] {
        if let Err(e) = session.send(method, params).await {
            debug!(target_id = %session.target_id(), method, error = %e, "domain enable failed");
            return;
        }
    }
}

fn parse_target_info(info: &Value) -> Option<Target> {
    Some(Target {
        target_id: info.get("targetId")?.as_str()?.to_string(),
        kind: TargetType::from_cdp(info.get("type").and_then(Value::as_str).unwrap_or("other")),
        url: info
            .get("url")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        title: info
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}

/// Tracks every attached target and session on one transport and owns the
/// agent focus pointer.
pub struct SessionRegistry {
    inner: Arc<Inner>,
    _listener: Subscription,
}

impl SessionRegistry {
    /// Start listening on `transport` without talking to the browser. Used
    /// directly by tests; production code goes through [`Self::bootstrap`].
    pub fn new(transport: Arc<Transport>, config: SessionConfig, bus: EventBus) -> Self {
        let inner = Arc::new(Inner {
            transport: Arc::clone(&transport),
            config,
            graph: RwLock::new(Graph::default()),
            lifecycle: DashMap::new(),
            changed: Notify::new(),
            bus,
        });
        let weak: Weak<Inner> = Arc::downgrade(&inner);
        let listener = transport.subscribe_all(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_event(event);
            }
            Ok(())
        });
        Self {
            inner,
            _listener: listener,
        }
    }

    /// Subscribe, enable target discovery with flattened auto-attach, attach
    /// to every existing page and focus the first one.
    pub async fn bootstrap(
        transport: Arc<Transport>,
        config: SessionConfig,
        bus: EventBus,
    ) -> Result<Self> {
        let registry = Self::new(Arc::clone(&transport), config, bus);

        transport
            .send("Target.setDiscoverTargets", json!({ "discover": true }))
            .await?;
        transport
            .send(
                "Target.setAutoAttach",
                json!({
                    "autoAttach": true,
                    "waitForDebuggerOnStart": false,
                    "flatten": true,
                }),
            )
            .await?;

        let listing = transport.send("Target.getTargets", json!({})).await?;
        let infos = listing
            .get("targetInfos")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        for target in infos.iter().filter_map(parse_target_info) {
            if !target.kind.is_focusable() {
                registry.inner.graph.write().upsert_target(target);
                continue;
            }
            if registry.session(&target.target_id).is_some() {
                continue;
            }
            let attached = transport
                .send(
                    "Target.attachToTarget",
                    json!({ "targetId": target.target_id, "flatten": true }),
                )
                .await?;
            let Some(session_id) = attached.get("sessionId").and_then(Value::as_str) else {
                warn!(target_id = %target.target_id, "attachToTarget returned no sessionId");
                continue;
            };
            let session = registry.inner.register_session(target, session_id.to_string());
            enable_page_domains(session).await;
        }

        if registry.focused_target().is_none()
            && let Some(first) = registry.first_page()
        {
            registry.set_focus(&first)?;
        }

        info!(
            targets = registry.targets().len(),
            focus = ?registry.focused_target(),
            "session registry ready"
        );
        Ok(registry)
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.inner.transport
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Apply one browser notification. The transport subscription calls this
    /// for every event; it is public so the graph can be driven directly.
    pub fn handle_event(&self, event: &CdpEvent) {
        self.inner.handle_event(event);
    }

    pub fn targets(&self) -> Vec<Target> {
        let graph = self.inner.graph.read();
        let mut tracked: Vec<&TrackedTarget> = graph.targets.values().collect();
        tracked.sort_by_key(|t| t.seq);
        tracked.into_iter().map(|t| t.target.clone()).collect()
    }

    pub fn target(&self, target_id: &str) -> Option<Target> {
        self.inner
            .graph
            .read()
            .targets
            .get(target_id)
            .map(|t| t.target.clone())
    }

    /// The live session for `target_id`, without waiting.
    pub fn session(&self, target_id: &str) -> Option<Arc<CdpSession>> {
        self.inner.graph.read().session_for(target_id)
    }

    pub fn session_count(&self) -> usize {
        self.inner.graph.read().sessions.len()
    }

    /// The current focus, if it still refers to a tracked target.
    pub fn focused_target(&self) -> Option<TargetId> {
        let graph = self.inner.graph.read();
        graph
            .focus
            .as_ref()
            .filter(|id| graph.targets.contains_key(*id))
            .cloned()
    }

    fn first_page(&self) -> Option<TargetId> {
        let graph = self.inner.graph.read();
        graph
            .targets
            .values()
            .filter(|t| t.target.kind.is_focusable())
            .min_by_key(|t| t.seq)
            .map(|t| t.target.target_id.clone())
    }

    /// Point the agent focus at `target_id`. Only page targets are accepted.
    pub fn set_focus(&self, target_id: &str) -> Result<()> {
        let changed = {
            let mut graph = self.inner.graph.write();
            let Some(tracked) = graph.targets.get(target_id) else {
                return Err(ReinError::TargetNotFound(target_id.to_string()));
            };
            if !tracked.target.kind.is_focusable() {
                return Err(ReinError::InvalidFocus {
                    target_id: target_id.to_string(),
                    kind: tracked.target.kind.to_string(),
                });
            }
            let changed = graph.focus.as_deref() != Some(target_id);
            graph.focus = Some(target_id.to_string());
            changed
        };
        if changed {
            info!(target_id = %target_id, "agent focus changed");
            self.inner.bus.publish(Event::FocusChanged {
                target_id: Some(target_id.to_string()),
            });
        }
        Ok(())
    }

    /// Resolve a usable session for `target_id`, or for the current focus
    /// when `None`. A target whose attach notification has not arrived yet is
    /// waited for up to the attach timeout. With `focus` set the target
    /// becomes the agent focus once its type has been checked.
    pub async fn get_or_create_session(
        &self,
        target_id: Option<&str>,
        focus: bool,
    ) -> Result<Arc<CdpSession>> {
        let target_id = match target_id {
            Some(id) => id.to_string(),
            None => match self.focused_target() {
                Some(id) => id,
                None => {
                    if !self
                        .ensure_valid_focus(self.inner.config.focus_recovery_timeout())
                        .await
                    {
                        return Err(ReinError::NoFocus);
                    }
                    self.focused_target().ok_or(ReinError::NoFocus)?
                }
            },
        };

        let session = self
            .wait_for_session(&target_id, self.inner.config.attach_timeout())
            .await?;
        if focus {
            self.set_focus(&target_id)?;
        }
        Ok(session)
    }

    async fn wait_for_session(&self, target_id: &str, timeout: Duration) -> Result<Arc<CdpSession>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.inner.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(session) = self.inner.graph.read().session_for(target_id) {
                return Ok(session);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                debug!(target_id = %target_id, ?timeout, "no attach notification in time");
                return Err(ReinError::TargetNotFound(target_id.to_string()));
            }
        }
    }

    /// Make sure the focus points at a live page. If it does not, move it to
    /// the most recently created page that has a session, waiting up to
    /// `timeout` for one to appear. Returns `false` when nothing usable exists.
    pub async fn ensure_valid_focus(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.inner.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let recovered = {
                let mut graph = self.inner.graph.write();
                if graph.focus_is_live() {
                    return true;
                }
                match graph.recovery_candidate() {
                    Some(candidate) => {
                        graph.focus = Some(candidate.clone());
                        Some(candidate)
                    }
                    None => None,
                }
            };

            if let Some(target_id) = recovered {
                warn!(target_id = %target_id, "focus lost, recovered to most recent page");
                self.inner.bus.publish(Event::FocusChanged {
                    target_id: Some(target_id),
                });
                return true;
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                warn!(?timeout, "focus recovery failed, no page target available");
                return false;
            }
        }
    }

    /// Open a new tab on `url` and focus it.
    pub async fn create_tab(&self, url: &str) -> Result<Arc<CdpSession>> {
        let created = self
            .inner
            .transport
            .send("Target.createTarget", json!({ "url": url }))
            .await?;
        let target_id = created
            .get("targetId")
            .and_then(Value::as_str)
            .ok_or_else(|| ReinError::Protocol {
                code: 0,
                message: "Target.createTarget returned no targetId".into(),
            })?
            .to_string();
        self.get_or_create_session(Some(&target_id), true).await
    }

    /// Focus an existing tab and bring it to the front.
    pub async fn switch_focus(&self, target_id: &str) -> Result<Arc<CdpSession>> {
        let session = self.get_or_create_session(Some(target_id), true).await?;
        if let Err(e) = self
            .inner
            .transport
            .send("Target.activateTarget", json!({ "targetId": target_id }))
            .await
        {
            debug!(target_id = %target_id, error = %e, "activateTarget failed");
        }
        Ok(session)
    }

    /// Navigate `session` and wait for the page to settle. Same-origin
    /// navigations get the shorter timeout.
    pub async fn navigate(&self, session: &CdpSession, url: &str) -> Result<NavigationReadiness> {
        let from = self
            .target(session.target_id())
            .map(|t| t.url)
            .unwrap_or_default();
        let timeout = self.inner.config.navigation_timeout(same_origin(&from, url));

        let since = Instant::now();
        let response = session.send("Page.navigate", json!({ "url": url })).await?;
        if let Some(error_text) = response.get("errorText").and_then(Value::as_str) {
            return Err(ReinError::ActionFailed {
                action: "navigate".into(),
                reason: error_text.to_string(),
            });
        }
        let loader_id = response.get("loaderId").and_then(Value::as_str);

        let readiness = self
            .wait_for_lifecycle(session.session_id(), loader_id, since, timeout)
            .await;
        debug!(%url, ?readiness, "navigation finished");
        Ok(readiness)
    }

    /// Poll the session's lifecycle buffer until a ready event for
    /// `loader_id` shows up or `timeout` elapses.
    pub async fn wait_for_lifecycle(
        &self,
        session_id: &str,
        loader_id: Option<&str>,
        since: Instant,
        timeout: Duration,
    ) -> NavigationReadiness {
        let deadline = Instant::now() + timeout;
        let poll = self.inner.config.lifecycle_poll();
        loop {
            if let Some(buffer) = self.inner.lifecycle.get(session_id)
                && let Some(event) = buffer.ready_for(loader_id, since)
            {
                return NavigationReadiness::Settled(event.name.clone());
            }
            if Instant::now() >= deadline {
                return NavigationReadiness::TimedOut;
            }
            tokio::time::sleep(poll).await;
        }
    }
}
