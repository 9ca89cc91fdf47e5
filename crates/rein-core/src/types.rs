use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Browser-issued identifier of a browsing context.
pub type TargetId = String;

/// Browser-issued identifier of one attachment to a target.
pub type SessionId = String;

/// Unique identifier for an agent run.
pub type RunId = Uuid;

/// The kind of browsing context a target represents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Page,
    Iframe,
    Worker,
    Tab,
    Other(String),
}

impl TargetType {
    /// Parse the `type` field of a CDP `TargetInfo`.
    pub fn from_cdp(raw: &str) -> Self {
        match raw {
            "page" => TargetType::Page,
            "iframe" => TargetType::Iframe,
            "worker" | "shared_worker" | "service_worker" => TargetType::Worker,
            "tab" => TargetType::Tab,
            other => TargetType::Other(other.to_string()),
        }
    }

    /// Only page targets may hold agent focus.
    pub fn is_focusable(&self) -> bool {
        matches!(self, TargetType::Page)
    }

    pub fn as_str(&self) -> &str {
        match self {
            TargetType::Page => "page",
            TargetType::Iframe => "iframe",
            TargetType::Worker => "worker",
            TargetType::Tab => "tab",
            TargetType::Other(s) => s.as_str(),
        }
    }
}

impl std::fmt::Display for TargetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A browsing context as tracked by the session registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub target_id: TargetId,
    pub kind: TargetType,
    pub url: String,
    pub title: String,
}

/// Which decision backend is currently answering for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActiveBackend {
    #[default]
    Primary,
    Fallback,
}

impl std::fmt::Display for ActiveBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActiveBackend::Primary => f.write_str("primary"),
            ActiveBackend::Fallback => f.write_str("fallback"),
        }
    }
}

/// A rendered view of the focused page, produced by an external observer
/// and handed to the decision backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageObservation {
    pub target_id: Option<TargetId>,
    pub url: String,
    pub title: String,
    /// Interactive elements, addressable by their `index`.
    pub elements: Vec<crate::DomElement>,
    /// Text rendering of the page for the decision backend.
    #[serde(default)]
    pub text: String,
}

impl PageObservation {
    pub fn element(&self, index: u32) -> Option<&crate::DomElement> {
        self.elements.iter().find(|e| e.index == index)
    }
}
