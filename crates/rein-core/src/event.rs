use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::sync::Arc;
use tokio::sync::broadcast;

use crate::types::ActiveBackend;

/// Notifications published to external collaborators while a run or a
/// replay is in progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    // ── Target lifecycle ───────────────────────────────────────
    TargetAttached {
        target_id: String,
        target_type: String,
    },
    TargetDetached {
        target_id: String,
    },
    FocusChanged {
        target_id: Option<String>,
    },

    // ── Step lifecycle ─────────────────────────────────────────
    StepStarted {
        run_id: Uuid,
        step: u32,
    },
    StepCompleted {
        run_id: Uuid,
        step: u32,
        actions: usize,
        errors: usize,
        done: bool,
    },
    BackendSwitched {
        run_id: Uuid,
        to: ActiveBackend,
        reason: String,
    },
    LoopDetected {
        run_id: Uuid,
        signature: String,
    },
    RunFinished {
        run_id: Uuid,
        steps: u32,
        success: bool,
        error: Option<String>,
    },

    // ── Replay ─────────────────────────────────────────────────
    ReplayStep {
        step: u32,
        attempt: u32,
        outcome: String,
    },
}

/// A broadcast-based event bus for system-wide pub/sub.
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<Event>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn publish(&self, event: Event) {
        // Ignore send errors (no subscribers).
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
