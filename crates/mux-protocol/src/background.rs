use crate::workspace::WorkspaceId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Running,
    Exited,
    Killed,
    Failed,
}

/// Persisted as `meta.json` inside the process's output directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundProcessRecord {
    pub id: String,
    pub pid: u32,
    pub workspace_id: WorkspaceId,
    pub output_dir: String,
    pub script: String,
    pub start_time: chrono::DateTime<chrono::Utc>,
    pub status: ProcessStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_time: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}
