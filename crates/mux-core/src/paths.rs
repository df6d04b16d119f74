//! Session directory layout, per spec.md §6.

use mux_protocol::WorkspaceId;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct MuxHome(pub PathBuf);

impl MuxHome {
    pub fn session_dir(&self, workspace: &WorkspaceId) -> PathBuf {
        self.0.join("sessions").join(workspace.as_str())
    }

    pub fn history_path(&self, workspace: &WorkspaceId) -> PathBuf {
        self.session_dir(workspace).join("history.jsonl")
    }

    pub fn partial_path(&self, workspace: &WorkspaceId) -> PathBuf {
        self.session_dir(workspace).join("partial.json")
    }

    pub fn init_status_path(&self, workspace: &WorkspaceId) -> PathBuf {
        self.session_dir(workspace).join("init-status.json")
    }

    pub fn auto_retry_path(&self, workspace: &WorkspaceId) -> PathBuf {
        self.session_dir(workspace).join("auto-retry.json")
    }

    pub fn post_compaction_path(&self, workspace: &WorkspaceId) -> PathBuf {
        self.session_dir(workspace).join("post-compaction.json")
    }

    pub fn todos_path(&self, workspace: &WorkspaceId) -> PathBuf {
        self.session_dir(workspace).join("todos.json")
    }

    pub fn skills_dir(&self) -> PathBuf {
        self.0.join("skills")
    }

    pub fn skill_dir(&self, name: &str) -> PathBuf {
        self.skills_dir().join(name)
    }

    pub fn agents_md_path(&self) -> PathBuf {
        self.0.join("AGENTS.md")
    }
}

/// `<runtime tmp>/mux-bashes/<W>/<pid>/`.
pub fn background_process_dir(tmp_dir: &std::path::Path, workspace: &WorkspaceId, pid: u32) -> PathBuf {
    tmp_dir
        .join("mux-bashes")
        .join(workspace.as_str())
        .join(pid.to_string())
}
