use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration that maps to `rein.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReinConfig {
    pub transport: TransportConfig,
    pub session: SessionConfig,
    pub pool: PoolConfig,
    pub agent: AgentConfig,
    pub replay: ReplayConfig,
    pub logging: LoggingConfig,
}

// ── Transport ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Largest accepted WebSocket message in MiB. DOM snapshots of large
    /// pages run to tens of MiB, well past the tungstenite default.
    pub max_message_size_mb: usize,
    /// How long a single command may stay in flight.
    pub command_timeout_secs: u64,
    /// Capacity of the event broadcast channel.
    pub event_buffer: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_message_size_mb: 256,
            command_timeout_secs: 30,
            event_buffer: 1024,
        }
    }
}

impl TransportConfig {
    pub fn max_message_size_bytes(&self) -> usize {
        self.max_message_size_mb.saturating_mul(1024 * 1024)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

// ── Session registry ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long to wait for the attach notification of a just-created target.
    pub attach_timeout_ms: u64,
    /// How long focus recovery may wait for a page target to appear.
    pub focus_recovery_timeout_ms: u64,
    /// Lifecycle events kept per session.
    pub lifecycle_buffer: usize,
    /// Poll interval of navigation-readiness waits.
    pub lifecycle_poll_ms: u64,
    pub same_origin_nav_timeout_ms: u64,
    pub cross_origin_nav_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            attach_timeout_ms: 2_000,
            focus_recovery_timeout_ms: 3_000,
            lifecycle_buffer: 50,
            lifecycle_poll_ms: 50,
            same_origin_nav_timeout_ms: 3_000,
            cross_origin_nav_timeout_ms: 8_000,
        }
    }
}

impl SessionConfig {
    pub fn attach_timeout(&self) -> Duration {
        Duration::from_millis(self.attach_timeout_ms)
    }

    pub fn focus_recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.focus_recovery_timeout_ms)
    }

    pub fn lifecycle_poll(&self) -> Duration {
        Duration::from_millis(self.lifecycle_poll_ms.max(1))
    }

    pub fn navigation_timeout(&self, same_origin: bool) -> Duration {
        if same_origin {
            Duration::from_millis(self.same_origin_nav_timeout_ms)
        } else {
            Duration::from_millis(self.cross_origin_nav_timeout_ms)
        }
    }
}

// ── Connection pool ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Connections unused for longer than this are closed by the sweep.
    pub idle_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            idle_ttl_secs: 300,
            sweep_interval_secs: 60,
        }
    }
}

impl PoolConfig {
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

// ── Agent ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Maximum decision cycles per run.
    pub max_steps: u32,
    /// Decisions with more actions than this are truncated.
    pub max_actions_per_step: usize,
    /// Consecutive failed steps before only `done` is offered.
    pub max_failures: u32,
    /// Per-call timeout of the decision backend.
    pub decision_timeout_secs: u64,
    /// Pause between actions of one batch (not before the first).
    pub inter_action_delay_ms: u64,
    /// Identical step signatures in a row that abort the run.
    pub loop_window: usize,
    /// Offer only `done` on the last permitted step.
    pub force_done_on_last_step: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 100,
            max_actions_per_step: 4,
            max_failures: 3,
            decision_timeout_secs: 90,
            inter_action_delay_ms: 500,
            loop_window: 3,
            force_done_on_last_step: true,
        }
    }
}

impl AgentConfig {
    pub fn decision_timeout(&self) -> Duration {
        Duration::from_secs(self.decision_timeout_secs)
    }

    pub fn inter_action_delay(&self) -> Duration {
        Duration::from_millis(self.inter_action_delay_ms)
    }
}

// ── Replay ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Retries per recorded step after the first attempt.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Skip steps that errored when recorded, and keep going past steps
    /// that fail on replay.
    pub skip_failures: bool,
    /// Pause after re-opening a menu before retrying the item click.
    pub menu_reopen_delay_ms: u64,
    /// Pause between replayed steps.
    pub delay_between_steps_ms: u64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 8_000,
            skip_failures: false,
            menu_reopen_delay_ms: 300,
            delay_between_steps_ms: 500,
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Output format: "pretty", "json", "compact".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

// ── Validation ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self.severity {
            WarningSeverity::Error => "error",
            WarningSeverity::Warning => "warning",
        };
        write!(f, "{label}: {}: {}", self.field, self.message)
    }
}

impl ReinConfig {
    /// Check the configuration. Returns the non-fatal warnings, or an error
    /// string listing every fatal problem.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();

        // ── Transport ───
        if self.transport.max_message_size_mb < 16 {
            warnings.push(ConfigWarning {
                field: "transport.max_message_size_mb".into(),
                message: format!(
                    "{} MiB is small: large DOM snapshots will fail",
                    self.transport.max_message_size_mb
                ),
                severity: WarningSeverity::Warning,
            });
        }
        if self.transport.command_timeout_secs == 0 {
            warnings.push(ConfigWarning {
                field: "transport.command_timeout_secs".into(),
                message: "timeout is 0: every command would fail immediately".into(),
                severity: WarningSeverity::Error,
            });
        }
        if self.transport.event_buffer == 0 {
            warnings.push(ConfigWarning {
                field: "transport.event_buffer".into(),
                message: "event buffer must hold at least one event".into(),
                severity: WarningSeverity::Error,
            });
        }

        // ── Session ───
        if self.session.lifecycle_buffer == 0 {
            warnings.push(ConfigWarning {
                field: "session.lifecycle_buffer".into(),
                message: "lifecycle buffer is 0: navigation waits will always time out".into(),
                severity: WarningSeverity::Error,
            });
        }
        if self.session.same_origin_nav_timeout_ms > self.session.cross_origin_nav_timeout_ms {
            warnings.push(ConfigWarning {
                field: "session.same_origin_nav_timeout_ms".into(),
                message: "same-origin timeout exceeds cross-origin timeout".into(),
                severity: WarningSeverity::Warning,
            });
        }

        // ── Pool ───
        if self.pool.idle_ttl_secs == 0 {
            warnings.push(ConfigWarning {
                field: "pool.idle_ttl_secs".into(),
                message: "TTL is 0: every sweep closes every connection".into(),
                severity: WarningSeverity::Warning,
            });
        }

        // ── Agent ───
        if self.agent.max_steps == 0 {
            warnings.push(ConfigWarning {
                field: "agent.max_steps".into(),
                message: "max_steps is 0: agent won't act".into(),
                severity: WarningSeverity::Error,
            });
        }
        if self.agent.max_actions_per_step == 0 {
            warnings.push(ConfigWarning {
                field: "agent.max_actions_per_step".into(),
                message: "max_actions_per_step is 0: every decision would be discarded".into(),
                severity: WarningSeverity::Error,
            });
        }
        if self.agent.loop_window < 2 {
            warnings.push(ConfigWarning {
                field: "agent.loop_window".into(),
                message: format!(
                    "window {} would flag every step as a loop",
                    self.agent.loop_window
                ),
                severity: WarningSeverity::Error,
            });
        }
        if self.agent.decision_timeout_secs == 0 {
            warnings.push(ConfigWarning {
                field: "agent.decision_timeout_secs".into(),
                message: "timeout is 0: every decision would time out".into(),
                severity: WarningSeverity::Error,
            });
        }

        // ── Replay ───
        if self.replay.base_delay_ms > self.replay.max_delay_ms {
            warnings.push(ConfigWarning {
                field: "replay.base_delay_ms".into(),
                message: "base delay exceeds max delay: backoff is capped immediately".into(),
                severity: WarningSeverity::Warning,
            });
        }

        // ── Logging format ───
        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.format".into(),
                message: format!("unknown log format '{}'", self.logging.format),
                severity: WarningSeverity::Warning,
            });
        }

        // ── Logging level ───
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.level".into(),
                message: format!("unknown log level '{}'", self.logging.level),
                severity: WarningSeverity::Warning,
            });
        }

        let errors: Vec<String> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| w.to_string())
            .collect();
        if !errors.is_empty() {
            return Err(errors.join("; "));
        }

        Ok(warnings)
    }
}
