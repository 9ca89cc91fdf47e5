use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Name of the terminal action. Only valid as the sole action of a batch.
pub const DONE_ACTION: &str = "done";

/// Name of the action synthesized when a decision comes back empty twice.
pub const NOOP_ACTION: &str = "wait";

/// Parameter keys that identify what an action operates on, in the order
/// they are consulted when building a loop-detection signature.
const KEY_PARAMS: &[&str] = &["index", "url", "text", "target_id", "direction", "seconds"];

/// Description of an action offered to the decision backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    /// Unique name, e.g. "click", "navigate", "done".
    pub name: String,
    /// Human-readable description for the decision backend.
    pub description: String,
    /// JSON Schema of the parameters object.
    pub parameters: Value,
    /// Executing this action invalidates the rest of the current batch.
    #[serde(default)]
    pub terminates_sequence: bool,
}

/// One decided, not-yet-executed action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub name: String,
    #[serde(default)]
    pub params: Value,
    /// Static flag; the executor also consults the registered action.
    #[serde(default)]
    pub terminates_sequence: bool,
}

impl ActionRecord {
    pub fn new(name: impl Into<String>, params: Value) -> Self {
        Self {
            name: name.into(),
            params,
            terminates_sequence: false,
        }
    }

    pub fn done(success: bool, text: impl Into<String>) -> Self {
        Self::new(
            DONE_ACTION,
            serde_json::json!({ "success": success, "text": text.into() }),
        )
    }

    pub fn is_done(&self) -> bool {
        self.name == DONE_ACTION
    }

    /// Index of the observed element this action targets, if any.
    pub fn element_index(&self) -> Option<u32> {
        self.params
            .get("index")
            .and_then(Value::as_u64)
            .and_then(|i| u32::try_from(i).ok())
    }

    /// Copy of this record pointed at a different element index.
    pub fn with_element_index(&self, index: u32) -> Self {
        let mut params = match &self.params {
            Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        params.insert("index".to_string(), Value::from(index));
        Self {
            name: self.name.clone(),
            params: Value::Object(params),
            terminates_sequence: self.terminates_sequence,
        }
    }

    /// The parameter that best identifies what this action operates on.
    pub fn key_param(&self) -> String {
        for key in KEY_PARAMS {
            match self.params.get(*key) {
                Some(Value::String(s)) => return s.clone(),
                Some(Value::Null) | None => continue,
                Some(other) => return other.to_string(),
            }
        }
        String::new()
    }
}

/// The outcome of executing one action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    /// The run should end after this action.
    #[serde(default)]
    pub is_done: bool,
    /// Only meaningful when `is_done` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_content: Option<String>,
    /// Set when replay deliberately did not execute the action.
    #[serde(default)]
    pub skipped: bool,
}

impl ActionResult {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn with_content(content: impl Into<String>) -> Self {
        Self {
            extracted_content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn done(success: bool, text: impl Into<String>) -> Self {
        Self {
            is_done: true,
            success: Some(success),
            extracted_content: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            extracted_content: Some(reason.into()),
            skipped: true,
            ..Default::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
