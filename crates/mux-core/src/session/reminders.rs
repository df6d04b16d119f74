//! (expansion) System reminders generalized behind one trait shape so new
//! reminder kinds can be added without touching `AgentSession`. Grounded on
//! `core/src/system_reminder/` in the teacher, which injects similarly
//! short, user-invisible notices ahead of the next model turn.

use mux_protocol::{MessageMetadata, MessagePart, MessageRole, MuxMessage};
use uuid::Uuid;

/// Produces a synthetic system message to splice into history ahead of the
/// next turn. Implementations must be cheap and infallible — reminders are
/// advisory, never a reason to fail a turn.
pub trait ReminderGenerator: Send + Sync {
    fn generate(&self) -> Option<MuxMessage>;
}

pub fn synthetic_system_message(text: String) -> MuxMessage {
    MuxMessage {
        role: MessageRole::System,
        id: Uuid::new_v4().to_string(),
        parts: vec![MessagePart::Text { text }],
        metadata: MessageMetadata {
            synthetic: true,
            ui_visible: true,
            timestamp: Some(chrono::Utc::now()),
            ..Default::default()
        },
    }
}

/// Fires once, the turn after a `switch_agent` call names an agent that
/// isn't usable (spec.md §4.5.2).
pub struct TargetAgentUnavailableReminder {
    pub target_agent_id: String,
}

impl ReminderGenerator for TargetAgentUnavailableReminder {
    fn generate(&self) -> Option<MuxMessage> {
        Some(synthetic_system_message(format!(
            "target \"{}\" is unavailable",
            self.target_agent_id
        )))
    }
}

/// Fires when the loop guard rejects a fourth consecutive synthetic switch.
pub struct SwitchLoopDetectedReminder;

impl ReminderGenerator for SwitchLoopDetectedReminder {
    fn generate(&self) -> Option<MuxMessage> {
        Some(synthetic_system_message("Agent switch loop detected".to_string()))
    }
}

/// A reminder that only fires under a caller-supplied predicate, for cases
/// like "only remind once per compaction epoch".
pub struct ConditionalReminder<F: Fn() -> Option<String> + Send + Sync> {
    pub compute: F,
}

impl<F: Fn() -> Option<String> + Send + Sync> ReminderGenerator for ConditionalReminder<F> {
    fn generate(&self) -> Option<MuxMessage> {
        (self.compute)().map(synthetic_system_message)
    }
}
