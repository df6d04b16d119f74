//! Per-workspace session lifecycle: owns one `AgentSession` per workspace
//! plus the follow-up/retry machinery layered on top of it (spec.md §4.5.3).

pub mod agent_registry;
pub mod agent_session;
pub mod compact;
pub mod history;
pub mod provider;
pub mod reminders;

pub use agent_registry::{AgentDefinition, AgentRegistry};
pub use agent_session::{
    AgentSession, AgentSessionConfig, DebugState, RunTurnOptions, TurnOutcome, TurnPhase,
};
pub use compact::{CompactStrategy, FileRecoveryCompactStrategy, SimpleCompactStrategy};
pub use history::{HistoryService, InMemoryHistory};
pub use provider::{ModelProvider, PostCompactionDiff, ProviderErrorKind, ProviderEvent, StreamOptions};
pub use reminders::ReminderGenerator;

use crate::error::Result;
use crate::paths::MuxHome;
use dashmap::DashMap;
use mux_protocol::message::RetrySendOptions;
use mux_protocol::{MessageRole, SessionEvent, WorkspaceId};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct AutoRetryOptOut {
    #[serde(default)]
    opted_out: bool,
}

#[derive(Default)]
struct RetryCheck {
    running: AtomicBool,
    done: Notify,
}

/// Owns the set of live sessions for a process and the startup auto-retry
/// coalescing that runs once per workspace after a restart.
pub struct SessionManager {
    mux_home: MuxHome,
    sessions: DashMap<WorkspaceId, Arc<AgentSession>>,
    retry_checks: DashMap<WorkspaceId, Arc<RetryCheck>>,
}

impl SessionManager {
    pub fn new(mux_home: MuxHome) -> Self {
        Self {
            mux_home,
            sessions: DashMap::new(),
            retry_checks: DashMap::new(),
        }
    }

    pub fn register(&self, workspace: WorkspaceId, session: Arc<AgentSession>) {
        self.sessions.insert(workspace, session);
    }

    pub fn get(&self, workspace: &WorkspaceId) -> Option<Arc<AgentSession>> {
        self.sessions.get(workspace).map(|e| e.clone())
    }

    fn retry_check_for(&self, workspace: &WorkspaceId) -> Arc<RetryCheck> {
        self.retry_checks
            .entry(workspace.clone())
            .or_insert_with(|| Arc::new(RetryCheck::default()))
            .clone()
    }

    /// `ask_user_question` calls this to suppress auto-retry for the rest of
    /// this workspace's lifetime — a question is pending; replaying the
    /// interrupted turn would only interrupt it again.
    pub async fn suppress_auto_retry(&self, workspace: &WorkspaceId) -> Result<()> {
        let path = self.mux_home.auto_retry_path(workspace);
        let doc = AutoRetryOptOut { opted_out: true };
        let bytes = serde_json::to_vec_pretty(&doc)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }

    async fn auto_retry_opted_out(&self, workspace: &WorkspaceId) -> bool {
        let path = self.mux_home.auto_retry_path(workspace);
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<AutoRetryOptOut>(&bytes)
                .map(|d| d.opted_out)
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Idempotent: concurrent callers for the same workspace coalesce onto
    /// the one in-flight check instead of racing duplicate replays.
    pub async fn ensure_startup_auto_retry_check(&self, workspace: &WorkspaceId) -> Result<()> {
        let check = self.retry_check_for(workspace);
        if check.running.swap(true, Ordering::SeqCst) {
            check.done.notified().await;
            return Ok(());
        }

        let result = self.run_startup_auto_retry(workspace).await;
        check.done.notify_waiters();
        result
    }

    async fn run_startup_auto_retry(&self, workspace: &WorkspaceId) -> Result<()> {
        if self.auto_retry_opted_out(workspace).await {
            return Ok(());
        }
        let Some(session) = self.get(workspace) else {
            return Ok(());
        };

        let tail = session.history().get_last_messages(workspace, 1).await?;
        let Some(last) = tail.into_iter().next() else {
            return Ok(());
        };
        // An interrupted turn is a trailing user message: the assistant
        // never got to respond before the process went away.
        if last.role != MessageRole::User {
            return Ok(());
        }
        let Some(retry_send_options) = last.metadata.retry_send_options.clone() else {
            return Ok(());
        };

        tracing::info!(workspace = %workspace, "replaying interrupted turn on startup");
        session.emit(SessionEvent::AutoRetryScheduled {
            workspace_id: workspace.clone(),
        });
        self.dispatch_pending_follow_up(workspace, None, retry_send_options)
            .await
    }

    /// Starts a synthetic follow-up turn: optionally appends a notice
    /// message, then streams using the given (or inherited) model/agent.
    pub async fn dispatch_pending_follow_up(
        &self,
        workspace: &WorkspaceId,
        notice_text: Option<String>,
        retry: RetrySendOptions,
    ) -> Result<()> {
        let Some(session) = self.get(workspace) else {
            return Ok(());
        };
        if let Some(text) = notice_text {
            session
                .append_message(reminders::synthetic_system_message(text))
                .await?;
        }
        let options = RunTurnOptions::new(StreamOptions {
            model: retry.model,
            agent_id: retry.agent_id,
            additional_system_instructions: None,
            post_compaction_attachments: None,
        });
        session.stream_with_history(options).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::agent_session::AgentSessionConfig;
    use crate::session::provider::ScriptedProvider;
    use mux_protocol::{MessageMetadata, MessagePart, MuxMessage};

    fn manager(dir: &std::path::Path) -> SessionManager {
        SessionManager::new(MuxHome(dir.to_path_buf()))
    }

    fn session_with_scripts(scripts: Vec<Vec<ProviderEvent>>) -> Arc<AgentSession> {
        let history: Arc<dyn HistoryService> = Arc::new(InMemoryHistory::default());
        let provider: Arc<dyn ModelProvider> = Arc::new(ScriptedProvider::new(scripts));
        Arc::new(AgentSession::new(
            AgentSessionConfig {
                workspace: WorkspaceId::new("w1"),
                mux_home: MuxHome(std::env::temp_dir().join("mux-session-mgr-test")),
                exec_subagent_hard_restart_experiment: false,
                is_exec_like_subagent: false,
            },
            history,
            provider,
            AgentRegistry::new(),
        ))
    }

    #[tokio::test]
    async fn startup_retry_replays_an_interrupted_user_tail() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mgr = manager(dir.path());
        let ws = WorkspaceId::new("w1");
        let session = session_with_scripts(vec![vec![ProviderEvent::StreamEnd {
            final_tool_calls: vec![],
        }]]);
        session
            .append_message(MuxMessage {
                role: MessageRole::User,
                id: "u1".to_string(),
                parts: vec![MessagePart::Text { text: "keep going".to_string() }],
                metadata: MessageMetadata {
                    retry_send_options: Some(RetrySendOptions {
                        model: "test-model".to_string(),
                        agent_id: "exec".to_string(),
                        tool_policy: Vec::new(),
                        disable_workspace_agents: false,
                    }),
                    ..Default::default()
                },
            })
            .await
            .expect("append");
        mgr.register(ws.clone(), session);

        mgr.ensure_startup_auto_retry_check(&ws).await.expect("retry check");
    }

    #[tokio::test]
    async fn startup_retry_is_a_no_op_once_opted_out() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mgr = manager(dir.path());
        let ws = WorkspaceId::new("w1");
        let session = session_with_scripts(vec![]);
        mgr.register(ws.clone(), session);
        mgr.suppress_auto_retry(&ws).await.expect("suppress");

        mgr.ensure_startup_auto_retry_check(&ws).await.expect("retry check");
        assert!(mgr.auto_retry_opted_out(&ws).await);
    }

    #[tokio::test]
    async fn concurrent_retry_checks_coalesce() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mgr = Arc::new(manager(dir.path()));
        let ws = WorkspaceId::new("w1");
        let session = session_with_scripts(vec![]);
        mgr.register(ws.clone(), session);

        let (a, b) = tokio::join!(
            mgr.ensure_startup_auto_retry_check(&ws),
            mgr.ensure_startup_auto_retry_check(&ws)
        );
        a.expect("first check");
        b.expect("second check");
    }
}
