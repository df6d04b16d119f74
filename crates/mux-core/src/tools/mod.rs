//! Tool implementations (spec.md §4.6). Each tool validates its own input
//! and returns a tagged `{ success: true, ... } | { success: false, error }`
//! payload rather than propagating `MuxErr` — a failed tool call is a normal
//! model-visible outcome, not a session-level error.

pub mod ask_user_question;
pub mod bash;
pub mod bridge;
pub mod file_edit;
pub mod file_read;
pub mod notify;
pub mod skill;
pub mod switch_agent;
pub mod task;
pub mod todo;

use serde::Serialize;
use serde_json::Value;

/// The tagged result every tool returns to the model. `ui_only` carries
/// payload that must not reach the transcript but still rides along on the
/// stream event (spec.md §4.6).
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ToolOutcome {
    Success(Value),
    Failure { success: bool, error: String },
}

impl ToolOutcome {
    pub fn ok(value: Value) -> Self {
        let mut value = value;
        if let Value::Object(ref mut map) = value {
            map.insert("success".to_string(), Value::Bool(true));
        }
        Self::Success(value)
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self::Failure {
            success: false,
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}
