use crate::workspace::WorkspaceId;
use serde::{Deserialize, Serialize};

/// Events emitted to subscribers, per spec.md §6. One receiver per concern
/// (session relay, tests, bash-output tap) is expected — this type models
/// the channel payload, not the channel itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SessionEvent {
    StreamStart {
        workspace_id: WorkspaceId,
    },
    Delta {
        workspace_id: WorkspaceId,
        text: String,
    },
    ToolCall {
        workspace_id: WorkspaceId,
        tool_call_id: String,
        tool_name: String,
        input: serde_json::Value,
    },
    ToolResult {
        workspace_id: WorkspaceId,
        tool_call_id: String,
        output: serde_json::Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        ui_only: Option<serde_json::Value>,
    },
    BashOutput {
        workspace_id: WorkspaceId,
        process_id: String,
        chunk: String,
    },
    TaskCreated {
        workspace_id: WorkspaceId,
        task_id: String,
    },
    AutoRetryScheduled {
        workspace_id: WorkspaceId,
    },
    CaughtUp {
        workspace_id: WorkspaceId,
    },
    StreamEnd {
        workspace_id: WorkspaceId,
    },
    StreamError {
        workspace_id: WorkspaceId,
        message: String,
    },
    StreamAbort {
        workspace_id: WorkspaceId,
    },
    InitStart {
        workspace_id: WorkspaceId,
        hook_path: String,
    },
    InitOutput {
        workspace_id: WorkspaceId,
        line: String,
        is_error: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    InitEnd {
        workspace_id: WorkspaceId,
        exit_code: i32,
        #[serde(skip_serializing_if = "Option::is_none")]
        truncated_lines: Option<u64>,
    },
    /// (expansion) `notify` tool output — see SPEC_FULL.md §4.6.
    Notification {
        workspace_id: WorkspaceId,
        title: String,
        body: String,
    },
}

impl SessionEvent {
    pub fn workspace_id(&self) -> &WorkspaceId {
        match self {
            Self::StreamStart { workspace_id }
            | Self::Delta { workspace_id, .. }
            | Self::ToolCall { workspace_id, .. }
            | Self::ToolResult { workspace_id, .. }
            | Self::BashOutput { workspace_id, .. }
            | Self::TaskCreated { workspace_id, .. }
            | Self::AutoRetryScheduled { workspace_id }
            | Self::CaughtUp { workspace_id }
            | Self::StreamEnd { workspace_id }
            | Self::StreamError { workspace_id, .. }
            | Self::StreamAbort { workspace_id }
            | Self::InitStart { workspace_id, .. }
            | Self::InitOutput { workspace_id, .. }
            | Self::InitEnd { workspace_id, .. }
            | Self::Notification { workspace_id, .. } => workspace_id,
        }
    }
}
