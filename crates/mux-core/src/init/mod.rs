//! Tracks the `runtime_setup -> init_hook -> success/error` lifecycle;
//! exposes `wait_for_init` (spec.md §4.4).

use crate::error::Result;
use crate::paths::MuxHome;
use crate::runtime::AbortSignal;
use crate::store::EventStore;
use chrono::Utc;
use dashmap::DashMap;
use mux_protocol::{InitPhase, InitStatus, SessionEvent, TimedLine, WorkspaceId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

pub const MAX_LINES: usize = 2000;
const HOOK_PHASE_DEADLINE: Duration = Duration::from_secs(5 * 60);

#[derive(Default)]
struct Waiters {
    hook_phase: Notify,
    completion: Notify,
    /// Set by `clear_in_memory_state` so any queued waiter wakes up even
    /// though nothing actually completed.
    cleared: AtomicBool,
}

pub struct InitStateManager {
    store: EventStore<InitStatus>,
    waiters: DashMap<WorkspaceId, Arc<Waiters>>,
}

impl InitStateManager {
    pub fn new(mux_home: MuxHome) -> Self {
        let home = mux_home;
        Self {
            store: EventStore::new(move |w: &WorkspaceId| home.init_status_path(w)),
            waiters: DashMap::new(),
        }
    }

    fn waiters_for(&self, workspace: &WorkspaceId) -> Arc<Waiters> {
        self.waiters
            .entry(workspace.clone())
            .or_insert_with(|| Arc::new(Waiters::default()))
            .clone()
    }

    pub fn start_init(&self, workspace: &WorkspaceId, hook_path: String) -> SessionEvent {
        let status = InitStatus {
            status: mux_protocol::init::InitRunStatus::Running,
            phase: InitPhase::RuntimeSetup,
            hook_path: hook_path.clone(),
            start_time: Utc::now(),
            hook_start_time: None,
            lines: Vec::new(),
            exit_code: None,
            end_time: None,
            truncated_lines: None,
        };
        self.store.set_state(workspace, status);
        self.waiters.insert(workspace.clone(), Arc::new(Waiters::default()));
        SessionEvent::InitStart {
            workspace_id: workspace.clone(),
            hook_path,
        }
    }

    pub fn enter_hook_phase(&self, workspace: &WorkspaceId) {
        if let Some(mut status) = self.store.get_state(workspace) {
            status.phase = InitPhase::InitHook;
            status.hook_start_time = Some(Utc::now());
            self.store.set_state(workspace, status);
        }
        self.waiters_for(workspace).hook_phase.notify_waiters();
    }

    /// Ring-buffer semantics: drops from the head once the retained buffer
    /// would exceed `MAX_LINES`, incrementing `truncated_lines`. Live
    /// events are always emitted, even after truncation.
    pub fn append_output(
        &self,
        workspace: &WorkspaceId,
        line: String,
        is_error: bool,
    ) -> Option<SessionEvent> {
        let timestamp = Utc::now();
        let Some(mut status) = self.store.get_state(workspace) else {
            return None;
        };
        status.lines.push(TimedLine {
            line: line.clone(),
            is_error,
            timestamp,
        });
        if status.lines.len() > MAX_LINES {
            status.lines.remove(0);
            status.truncated_lines = Some(status.truncated_lines.unwrap_or(0) + 1);
        }
        self.store.set_state(workspace, status);
        Some(SessionEvent::InitOutput {
            workspace_id: workspace.clone(),
            line,
            is_error,
            timestamp,
        })
    }

    /// Persists the final state *before* mutating in-memory status so a
    /// concurrent `replay` observes either "not yet done" or "done and on
    /// disk", never "done but file missing".
    pub async fn end_init(&self, workspace: &WorkspaceId, exit_code: i32) -> Result<SessionEvent> {
        let Some(mut status) = self.store.get_state(workspace) else {
            return Ok(SessionEvent::InitEnd {
                workspace_id: workspace.clone(),
                exit_code,
                truncated_lines: None,
            });
        };
        status.exit_code = Some(exit_code);
        status.end_time = Some(Utc::now());
        status.status = if exit_code == 0 {
            mux_protocol::init::InitRunStatus::Success
        } else {
            mux_protocol::init::InitRunStatus::Error
        };

        let has_state = self.store.has_state(workspace);
        self.store
            .persist(workspace, &status, Some(move || has_state))
            .await?;
        self.store.set_state(workspace, status.clone());

        self.waiters_for(workspace).completion.notify_waiters();
        Ok(SessionEvent::InitEnd {
            workspace_id: workspace.clone(),
            exit_code,
            truncated_lines: status.truncated_lines,
        })
    }

    /// Resolves state from memory, else disk, truncates any over-cap
    /// persisted log to the tail, and reproduces the `init-start` /
    /// `init-output`* / `init-end`? sequence in order.
    pub async fn replay(&self, workspace: &WorkspaceId) -> Result<Vec<SessionEvent>> {
        let state = match self.store.get_state(workspace) {
            Some(s) => Some(s),
            None => self.store.read_persisted(workspace).await?,
        };
        let Some(mut status) = state else {
            return Ok(Vec::new());
        };
        if status.lines.len() > MAX_LINES {
            let overflow = status.lines.len() - MAX_LINES;
            status.lines.drain(0..overflow);
            status.truncated_lines = Some(status.truncated_lines.unwrap_or(0) + overflow as u64);
        }

        let mut events = vec![SessionEvent::InitStart {
            workspace_id: workspace.clone(),
            hook_path: status.hook_path.clone(),
        }];
        for line in &status.lines {
            events.push(SessionEvent::InitOutput {
                workspace_id: workspace.clone(),
                line: line.line.clone(),
                is_error: line.is_error,
                timestamp: line.timestamp,
            });
        }
        if let Some(exit_code) = status.exit_code {
            events.push(SessionEvent::InitEnd {
                workspace_id: workspace.clone(),
                exit_code,
                truncated_lines: status.truncated_lines,
            });
        }
        Ok(events)
    }

    /// Wakes any waiter stuck in `wait_for_init` without anything actually
    /// completing; `wait_for_init` swallows this.
    pub fn clear_in_memory_state(&self, workspace: &WorkspaceId) {
        self.store.delete_state(workspace);
        if let Some(w) = self.waiters.get(workspace) {
            w.cleared.store(true, Ordering::SeqCst);
            w.hook_phase.notify_waiters();
            w.completion.notify_waiters();
        }
    }

    /// Never throws. Returns immediately if no state exists or the state
    /// is terminal. If still in `runtime_setup`, waits unboundedly for the
    /// hook phase. Once in `init_hook`, races completion against a 5-minute
    /// deadline (from `hook_start_time`) and the abort signal. Timeouts are
    /// logged and silently resolved — the caller proceeds and may fail with
    /// its own error.
    pub async fn wait_for_init(&self, workspace: &WorkspaceId, abort: AbortSignal) {
        let Some(status) = self.store.get_state(workspace) else {
            return;
        };
        if !matches!(status.status, mux_protocol::init::InitRunStatus::Running) {
            return;
        }

        let waiters = self.waiters_for(workspace);

        if matches!(status.phase, InitPhase::RuntimeSetup) {
            tokio::select! {
                _ = waiters.hook_phase.notified() => {}
                _ = abort.cancelled() => return,
            }
            if waiters.cleared.load(Ordering::SeqCst) {
                return;
            }
        }

        let hook_start = self
            .store
            .get_state(workspace)
            .and_then(|s| s.hook_start_time)
            .unwrap_or_else(Utc::now);
        let elapsed = (Utc::now() - hook_start)
            .to_std()
            .unwrap_or(Duration::ZERO);
        let remaining = HOOK_PHASE_DEADLINE.saturating_sub(elapsed);

        tokio::select! {
            _ = waiters.completion.notified() => {}
            _ = tokio::time::sleep(remaining) => {
                tracing::warn!(workspace = %workspace, "wait_for_init timed out after 5m");
            }
            _ = abort.cancelled() => {
                tracing::debug!(workspace = %workspace, "wait_for_init aborted");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(dir: &std::path::Path) -> InitStateManager {
        InitStateManager::new(MuxHome(dir.to_path_buf()))
    }

    #[tokio::test]
    async fn replay_reproduces_ordered_events() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mgr = manager(dir.path());
        let ws = WorkspaceId::new("w1");
        mgr.start_init(&ws, "init.sh".to_string());
        mgr.enter_hook_phase(&ws);
        mgr.append_output(&ws, "line1".to_string(), false);
        mgr.append_output(&ws, "line2".to_string(), true);
        mgr.end_init(&ws, 0).await.expect("end_init");

        let events = mgr.replay(&ws).await.expect("replay");
        assert!(matches!(events[0], SessionEvent::InitStart { .. }));
        assert!(matches!(events[1], SessionEvent::InitOutput { .. }));
        assert!(matches!(events[2], SessionEvent::InitOutput { .. }));
        assert!(matches!(events[3], SessionEvent::InitEnd { .. }));
    }

    #[tokio::test]
    async fn append_output_truncates_ring_buffer() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mgr = manager(dir.path());
        let ws = WorkspaceId::new("w1");
        mgr.start_init(&ws, "init.sh".to_string());
        for i in 0..(MAX_LINES + 5) {
            mgr.append_output(&ws, format!("line{i}"), false);
        }
        let status = mgr.store.get_state(&ws).expect("state");
        assert_eq!(status.lines.len(), MAX_LINES);
        assert_eq!(status.truncated_lines, Some(5));
    }

    #[tokio::test]
    async fn wait_for_init_never_panics_on_missing_state() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mgr = manager(dir.path());
        let ws = WorkspaceId::new("missing");
        mgr.wait_for_init(&ws, AbortSignal::new()).await;
    }

    #[tokio::test]
    async fn wait_for_init_returns_on_clear() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mgr = Arc::new(manager(dir.path()));
        let ws = WorkspaceId::new("w1");
        mgr.start_init(&ws, "init.sh".to_string());

        let mgr2 = mgr.clone();
        let ws2 = ws.clone();
        let waiter = tokio::spawn(async move {
            mgr2.wait_for_init(&ws2, AbortSignal::new()).await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        mgr.clear_in_memory_state(&ws);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("wait_for_init should return promptly after clear")
            .expect("join");
    }

    #[tokio::test]
    async fn end_init_persists_before_marking_complete_in_memory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mgr = manager(dir.path());
        let ws = WorkspaceId::new("w1");
        mgr.start_init(&ws, "init.sh".to_string());
        mgr.end_init(&ws, 0).await.expect("end_init");
        let persisted = mgr.store.read_persisted(&ws).await.expect("read").expect("some");
        assert_eq!(persisted.exit_code, Some(0));
    }
}
