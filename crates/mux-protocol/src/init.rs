use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitPhase {
    RuntimeSetup,
    InitHook,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitRunStatus {
    Running,
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimedLine {
    pub line: String,
    pub is_error: bool,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Persisted as `init-status.json` under the session directory, and
/// intentionally retained across restarts so replay reproduces the
/// initialization narrative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitStatus {
    pub status: InitRunStatus,
    pub phase: InitPhase,
    pub hook_path: String,
    pub start_time: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hook_start_time: Option<chrono::DateTime<chrono::Utc>>,
    pub lines: Vec<TimedLine>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncated_lines: Option<u64>,
}
