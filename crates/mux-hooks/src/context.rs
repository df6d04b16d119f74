use mux_protocol::WorkspaceId;
use std::path::PathBuf;

/// Everything a hook invocation needs to build its environment and I/O.
#[derive(Debug, Clone)]
pub struct HookInvocationContext {
    pub workspace_id: WorkspaceId,
    pub project_dir: PathBuf,
    pub tool_name: String,
    pub tool_input: serde_json::Value,
}

impl HookInvocationContext {
    pub fn new(
        workspace_id: WorkspaceId,
        project_dir: PathBuf,
        tool_name: impl Into<String>,
        tool_input: serde_json::Value,
    ) -> Self {
        Self {
            workspace_id,
            project_dir,
            tool_name: tool_name.into(),
            tool_input,
        }
    }
}
