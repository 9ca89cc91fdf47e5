use thiserror::Error;

/// Unified error type for the entire Rein control plane.
#[derive(Error, Debug)]
pub enum ReinError {
    // ── Transport errors ───────────────────────────────────────
    #[error("connection closed")]
    ConnectionClosed,

    #[error("protocol error {code}: {message}")]
    Protocol { code: i64, message: String },

    #[error("command '{method}' timed out after {timeout_ms}ms")]
    CommandTimeout { method: String, timeout_ms: u64 },

    #[error("websocket error: {0}")]
    WebSocket(String),

    // ── Target / session errors ────────────────────────────────
    #[error("target not found: {0}")]
    TargetNotFound(String),

    #[error("target detached: {0}")]
    TargetDetached(String),

    #[error("no focused target and none recoverable")]
    NoFocus,

    #[error("cannot focus target {target_id}: type '{kind}' is not a page")]
    InvalidFocus { target_id: String, kind: String },

    // ── Decision errors ────────────────────────────────────────
    #[error("decision backend rate limited: {0}")]
    RateLimited(String),

    #[error("decision backend rejected credentials: {0}")]
    DecisionAuth(String),

    #[error("malformed decision: {0}")]
    MalformedDecision(String),

    #[error("decision timed out after {timeout_secs}s")]
    DecisionTimeout { timeout_secs: u64 },

    #[error("decision backend error: {0}")]
    DecisionBackend(String),

    // ── Action errors ──────────────────────────────────────────
    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("action '{action}' failed: {reason}")]
    ActionFailed { action: String, reason: String },

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("page observation failed: {0}")]
    ObservationFailed(String),

    // ── Run control ────────────────────────────────────────────
    #[error("loop detected: {0}")]
    LoopDetected(String),

    #[error("stopped after {0} consecutive failures")]
    TooManyFailures(u32),

    #[error("interrupted")]
    Interrupted,

    // ── Config errors ──────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    #[error("config validation failed: {field}: {reason}")]
    ConfigValidation { field: String, reason: String },

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl ReinError {
    /// The connection this error came from is unusable; nothing on it will
    /// ever resolve again.
    pub fn is_transport_fatal(&self) -> bool {
        matches!(self, ReinError::ConnectionClosed | ReinError::WebSocket(_))
    }

    /// Rate-limit and auth failures move the run onto the fallback backend.
    pub fn triggers_fallback(&self) -> bool {
        matches!(self, ReinError::RateLimited(_) | ReinError::DecisionAuth(_))
    }

    /// A stop request surfaced through a suspension point. Callers treat it
    /// as a clean termination.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, ReinError::Interrupted)
    }

    pub fn is_element_not_found(&self) -> bool {
        matches!(self, ReinError::ElementNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, ReinError>;
