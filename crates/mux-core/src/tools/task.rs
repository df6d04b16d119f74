//! `task` / `task_await` (spec.md §4.6). Spawns descendant agent tasks
//! under an orchestrator task and waits on a mixed set of agent-task and
//! `bash:`-prefixed background-process ids, scoped to the caller's
//! descendants.

use crate::background::BackgroundProcessManager;
use mux_protocol::{ProcessStatus, SessionEvent, WorkspaceId};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    AwaitingReport,
    Error,
}

fn status_str(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Queued => "queued",
        TaskStatus::Running => "running",
        TaskStatus::Completed => "completed",
        TaskStatus::AwaitingReport => "awaiting_report",
        TaskStatus::Error => "error",
    }
}

struct TaskRecord {
    workspace: WorkspaceId,
    parent_id: Option<String>,
    status: TaskStatus,
}

/// Surfaced when a foreground `task_await` races a newly queued user
/// message: the wait is surrendered to the background rather than blocking
/// the turn the user is waiting on.
pub struct ForegroundWaitBackgrounded;

pub struct TaskManager {
    tasks: dashmap::DashMap<String, TaskRecord>,
    background: Arc<BackgroundProcessManager>,
}

impl TaskManager {
    pub fn new(background: Arc<BackgroundProcessManager>) -> Self {
        Self {
            tasks: dashmap::DashMap::new(),
            background,
        }
    }

    pub fn spawn_task(&self, workspace: &WorkspaceId, parent_id: Option<String>) -> (String, SessionEvent) {
        let id = Uuid::new_v4().to_string();
        self.tasks.insert(
            id.clone(),
            TaskRecord {
                workspace: workspace.clone(),
                parent_id,
                status: TaskStatus::Queued,
            },
        );
        let event = SessionEvent::TaskCreated {
            workspace_id: workspace.clone(),
            task_id: id.clone(),
        };
        (id, event)
    }

    pub fn set_status(&self, id: &str, status: TaskStatus) {
        if let Some(mut rec) = self.tasks.get_mut(id) {
            rec.status = status;
        }
    }

    /// BFS over `parent_id` links from `root_task_id`, not including the
    /// root itself — `task_await` may only name the caller's own
    /// descendants.
    fn descendant_ids(&self, root_task_id: &str) -> HashSet<String> {
        let mut out = HashSet::new();
        let mut frontier = vec![root_task_id.to_string()];
        while let Some(current) = frontier.pop() {
            for entry in self.tasks.iter() {
                if entry.value().parent_id.as_deref() == Some(current.as_str())
                    && out.insert(entry.key().clone())
                {
                    frontier.push(entry.key().clone());
                }
            }
        }
        out
    }

    async fn resolve_one(&self, root_task_id: &str, descendants: &HashSet<String>, id: &str) -> Value {
        if let Some(bg_id) = id.strip_prefix("bash:") {
            return match self.background.get_process(bg_id).await {
                None => json!({ "status": "not_found" }),
                Some(record) => {
                    let status = match record.status {
                        ProcessStatus::Running => "running",
                        ProcessStatus::Exited | ProcessStatus::Killed => "completed",
                        ProcessStatus::Failed => "error",
                    };
                    json!({ "status": status, "exitCode": record.exit_code })
                }
            };
        }

        if id == root_task_id {
            return json!({ "status": "invalid_scope" });
        }
        if !descendants.contains(id) {
            return json!({ "status": "invalid_scope" });
        }
        match self.tasks.get(id) {
            None => json!({ "status": "not_found" }),
            Some(rec) => json!({ "status": status_str(rec.status) }),
        }
    }

    fn is_terminal(value: &Value) -> bool {
        matches!(
            value["status"].as_str(),
            Some("completed") | Some("error") | Some("not_found") | Some("invalid_scope")
        )
    }

    /// `timeout_secs = 0` is explicitly non-blocking: one pass, return
    /// whatever each id's current status is. A nonzero timeout polls until
    /// every id reaches a terminal status, the timeout elapses, or
    /// `interrupted_by_user` flips (at which point remaining ids are
    /// reported as `{status: running, note}` per the
    /// `ForegroundWaitBackgrounded` signal).
    pub async fn task_await(
        &self,
        requesting_task_id: &str,
        ids: Vec<String>,
        timeout_secs: u64,
        interrupted_by_user: Option<Arc<AtomicBool>>,
    ) -> HashMap<String, Value> {
        let descendants = self.descendant_ids(requesting_task_id);
        let mut seen = HashSet::new();
        let unique: Vec<String> = ids.into_iter().filter(|id| seen.insert(id.clone())).collect();

        let mut out = HashMap::new();
        for id in &unique {
            out.insert(id.clone(), self.resolve_one(requesting_task_id, &descendants, id).await);
        }

        if timeout_secs == 0 {
            return out;
        }

        let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_secs);
        loop {
            if out.values().all(Self::is_terminal) {
                return out;
            }
            if let Some(flag) = &interrupted_by_user {
                if flag.load(Ordering::SeqCst) {
                    for (id, value) in out.iter_mut() {
                        if !Self::is_terminal(value) {
                            *value = json!({
                                "status": "running",
                                "note": "foreground wait surrendered to background: a user message is queued",
                            });
                        }
                        let _ = id;
                    }
                    return out;
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return out;
            }
            tokio::time::sleep(Duration::from_millis(100).min(deadline - tokio::time::Instant::now())).await;
            for id in &unique {
                let updated = self.resolve_one(requesting_task_id, &descendants, id).await;
                out.insert(id.clone(), updated);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::LocalRuntime;

    fn manager() -> TaskManager {
        TaskManager::new(Arc::new(BackgroundProcessManager::new(
            Arc::new(LocalRuntime),
            std::env::temp_dir(),
        )))
    }

    #[tokio::test]
    async fn timeout_zero_never_blocks() {
        let mgr = manager();
        let ws = WorkspaceId::new("w1");
        let (root, _) = mgr.spawn_task(&ws, None);
        let (child, _) = mgr.spawn_task(&ws, Some(root.clone()));
        mgr.set_status(&child, TaskStatus::Running);

        let start = tokio::time::Instant::now();
        let out = mgr.task_await(&root, vec![child.clone()], 0, None).await;
        assert!(start.elapsed() < Duration::from_millis(50));
        assert_eq!(out[&child]["status"], "running");
    }

    #[tokio::test]
    async fn ids_outside_descendant_scope_are_rejected() {
        let mgr = manager();
        let ws = WorkspaceId::new("w1");
        let (root, _) = mgr.spawn_task(&ws, None);
        let (unrelated, _) = mgr.spawn_task(&ws, None);

        let out = mgr.task_await(&root, vec![unrelated.clone()], 0, None).await;
        assert_eq!(out[&unrelated]["status"], "invalid_scope");
    }

    #[tokio::test]
    async fn duplicate_ids_are_deduplicated() {
        let mgr = manager();
        let ws = WorkspaceId::new("w1");
        let (root, _) = mgr.spawn_task(&ws, None);
        let (child, _) = mgr.spawn_task(&ws, Some(root.clone()));
        mgr.set_status(&child, TaskStatus::Completed);

        let out = mgr
            .task_await(&root, vec![child.clone(), child.clone()], 0, None)
            .await;
        assert_eq!(out.len(), 1);
    }

    #[tokio::test]
    async fn interrupted_by_user_surrenders_unfinished_ids_to_background() {
        let mgr = manager();
        let ws = WorkspaceId::new("w1");
        let (root, _) = mgr.spawn_task(&ws, None);
        let (child, _) = mgr.spawn_task(&ws, Some(root.clone()));
        mgr.set_status(&child, TaskStatus::Running);

        let flag = Arc::new(AtomicBool::new(true));
        let out = mgr.task_await(&root, vec![child.clone()], 5, Some(flag)).await;
        assert_eq!(out[&child]["status"], "running");
        assert!(out[&child]["note"].as_str().unwrap().contains("surrendered"));
    }
}
