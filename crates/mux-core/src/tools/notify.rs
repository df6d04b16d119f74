//! `notify` (spec.md §4.6, expansion). Surfaces an agent-initiated
//! notification to the UI; carries no persisted state of its own.

use crate::tools::ToolOutcome;
use mux_protocol::{SessionEvent, WorkspaceId};
use serde_json::json;

pub fn notify(workspace: &WorkspaceId, title: String, body: String) -> (SessionEvent, ToolOutcome) {
    let event = SessionEvent::Notification {
        workspace_id: workspace.clone(),
        title,
        body,
    };
    (event, ToolOutcome::ok(json!({ "notified": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_a_notification_event_for_the_calling_workspace() {
        let ws = WorkspaceId::new("w1");
        let (event, outcome) = notify(&ws, "title".to_string(), "body".to_string());
        assert!(outcome.is_success());
        match event {
            SessionEvent::Notification { workspace_id, title, body } => {
                assert_eq!(workspace_id, ws);
                assert_eq!(title, "title");
                assert_eq!(body, "body");
            }
            _ => panic!("expected Notification event"),
        }
    }
}
