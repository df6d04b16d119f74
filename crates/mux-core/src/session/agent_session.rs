//! The hardest component (spec.md §4.5): a per-workspace state machine over
//! the turn lifecycle `idle -> preparing -> streaming -> completing ->
//! idle`, plus the orthogonal follow-up/retry/agent-switch machinery.

use crate::error::{MuxErr, Result};
use crate::paths::MuxHome;
use crate::session::agent_registry::AgentRegistry;
use crate::session::history::HistoryService;
use crate::session::reminders::{
    ReminderGenerator, SwitchLoopDetectedReminder, TargetAgentUnavailableReminder,
};
use crate::session::provider::{
    ModelProvider, PostCompactionDiff, ProviderErrorKind, ProviderEvent, StreamOptions,
    ToolCallRequest,
};
use chrono::Utc;
use mux_protocol::{
    MessageMetadata, MessagePart, MessageRole, MuxMessage, SessionEvent, WorkspaceId,
};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

/// Three consecutive synthetic switches without intervening user input are
/// allowed; the fourth is rejected.
const SWITCH_LOOP_LIMIT: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    Preparing,
    Streaming,
    Completing,
}

#[derive(Debug, Clone)]
pub struct RunTurnOptions {
    pub stream: StreamOptions,
    /// Forces the prompt to omit post-compaction attachments regardless of
    /// whether a prior boundary exists.
    pub suppress_post_compaction_attachments: bool,
    pub is_context_exceeded_retry: bool,
    pub is_hard_restart: bool,
}

impl RunTurnOptions {
    pub fn new(stream: StreamOptions) -> Self {
        Self {
            stream,
            suppress_post_compaction_attachments: false,
            is_context_exceeded_retry: false,
            is_hard_restart: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    Aborted,
    Errored,
}

pub struct AgentSessionConfig {
    pub workspace: WorkspaceId,
    pub mux_home: MuxHome,
    /// `execSubagentHardRestart` experiment flag.
    pub exec_subagent_hard_restart_experiment: bool,
    /// Whether this workspace (or an ancestor) is an exec-like subagent,
    /// per the hard-restart predicate in spec.md §4.5.1.
    pub is_exec_like_subagent: bool,
}

/// Observable states exposed as a debug/inspection interface so tests can
/// drive the session without reflection (spec.md §9).
#[derive(Debug, Clone, Default)]
pub struct DebugState {
    pub active_stream_failure_handled: bool,
    pub hard_restart_fired: bool,
    pub switch_loop_count: u32,
    pub last_auto_retry_options: Option<mux_protocol::message::RetrySendOptions>,
}

pub struct AgentSession {
    config: AgentSessionConfig,
    history: Arc<dyn HistoryService>,
    provider: Arc<dyn ModelProvider>,
    agents: AgentRegistry,
    events: broadcast::Sender<SessionEvent>,
    phase: Mutex<TurnPhase>,

    active_stream_failure_handled: AtomicBool,
    hard_restart_fired: AtomicBool,
    switch_loop_count: AtomicU32,
    // Coalesced by `ensure_startup_auto_retry_check` in session/mod.rs.
    #[allow(dead_code)]
    startup_auto_retry_running: Mutex<bool>,
    #[allow(dead_code)]
    last_auto_retry_options: Mutex<Option<mux_protocol::message::RetrySendOptions>>,
}

impl AgentSession {
    pub fn new(
        config: AgentSessionConfig,
        history: Arc<dyn HistoryService>,
        provider: Arc<dyn ModelProvider>,
        agents: AgentRegistry,
    ) -> Self {
        let (tx, _rx) = broadcast::channel(256);
        Self {
            config,
            history,
            provider,
            agents,
            events: tx,
            phase: Mutex::new(TurnPhase::Idle),
            active_stream_failure_handled: AtomicBool::new(false),
            hard_restart_fired: AtomicBool::new(false),
            switch_loop_count: AtomicU32::new(0),
            startup_auto_retry_running: Mutex::new(false),
            last_auto_retry_options: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn phase(&self) -> TurnPhase {
        *self.phase.lock().await
    }

    pub fn debug_state(&self) -> DebugState {
        DebugState {
            active_stream_failure_handled: self.active_stream_failure_handled.load(Ordering::SeqCst),
            hard_restart_fired: self.hard_restart_fired.load(Ordering::SeqCst),
            switch_loop_count: self.switch_loop_count.load(Ordering::SeqCst),
            last_auto_retry_options: None,
        }
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    /// A real user message resets the switch-agent loop guard.
    pub fn note_user_input(&self) {
        self.switch_loop_count.store(0, Ordering::SeqCst);
    }

    async fn load_post_compaction_attachments(&self) -> Result<Vec<PostCompactionDiff>> {
        let path = self.config.mux_home.post_compaction_path(&self.config.workspace);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let doc: PostCompactionDoc = serde_json::from_slice(&bytes)?;
                Ok(doc.diffs_converted())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(MuxErr::Io(e)),
        }
    }

    async fn discard_post_compaction_state(&self) -> Result<()> {
        let path = self.config.mux_home.post_compaction_path(&self.config.workspace);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MuxErr::Io(e)),
        }
    }

    /// The central pipeline (spec.md §4.5.1).
    pub async fn stream_with_history(&self, options: RunTurnOptions) -> Result<TurnOutcome> {
        *self.phase.lock().await = TurnPhase::Preparing;

        let slice = self
            .history
            .get_history_from_latest_boundary(&self.config.workspace)
            .await?;
        let had_prior_boundary = slice.first().map(|m| m.is_compaction_boundary()).unwrap_or(false);

        let attachments = if had_prior_boundary && !options.suppress_post_compaction_attachments {
            Some(self.load_post_compaction_attachments().await?)
        } else {
            None
        };

        let mut stream_options = options.stream.clone();
        stream_options.post_compaction_attachments = attachments;

        *self.phase.lock().await = TurnPhase::Streaming;
        self.emit(SessionEvent::StreamStart {
            workspace_id: self.config.workspace.clone(),
        });

        let mut rx = self.provider.stream(&slice, &stream_options).await;

        let mut partial_text = String::new();
        let mut final_tool_calls = Vec::new();
        let mut outcome: Option<Result<TurnOutcome>> = None;

        while let Some(event) = rx.recv().await {
            match event {
                ProviderEvent::Delta(text) => {
                    partial_text.push_str(&text);
                    self.emit(SessionEvent::Delta {
                        workspace_id: self.config.workspace.clone(),
                        text,
                    });
                    self.persist_partial(&partial_text).await?;
                }
                ProviderEvent::ToolCall(call) => {
                    self.emit(SessionEvent::ToolCall {
                        workspace_id: self.config.workspace.clone(),
                        tool_call_id: call.tool_call_id.clone(),
                        tool_name: call.tool_name.clone(),
                        input: call.input.clone(),
                    });
                    final_tool_calls.push(call);
                }
                ProviderEvent::StreamAbort => {
                    self.emit(SessionEvent::StreamAbort {
                        workspace_id: self.config.workspace.clone(),
                    });
                    outcome = Some(Ok(TurnOutcome::Aborted));
                    break;
                }
                ProviderEvent::Error { kind, message } => {
                    outcome = Some(
                        self.handle_stream_error(kind, message, &options, &slice)
                            .await,
                    );
                    break;
                }
                ProviderEvent::StreamEnd { final_tool_calls: tc } => {
                    final_tool_calls = tc;
                    outcome = Some(self.handle_stream_end(final_tool_calls.clone(), &options).await);
                    break;
                }
            }
        }

        *self.phase.lock().await = TurnPhase::Completing;
        *self.phase.lock().await = TurnPhase::Idle;
        outcome.unwrap_or(Ok(TurnOutcome::Completed))
    }

    async fn persist_partial(&self, text: &str) -> Result<()> {
        self.history
            .write_partial(
                &self.config.workspace,
                MuxMessage {
                    role: MessageRole::Assistant,
                    id: Uuid::new_v4().to_string(),
                    parts: vec![MessagePart::Text {
                        text: text.to_string(),
                    }],
                    metadata: MessageMetadata {
                        partial: true,
                        ..Default::default()
                    },
                },
            )
            .await
    }

    async fn handle_stream_end(
        &self,
        final_tool_calls: Vec<ToolCallRequest>,
        options: &RunTurnOptions,
    ) -> Result<TurnOutcome> {
        self.history.commit_to_history(&self.config.workspace).await?;
        self.emit(SessionEvent::StreamEnd {
            workspace_id: self.config.workspace.clone(),
        });

        if let Some(call) = final_tool_calls.iter().find(|c| c.tool_name == "switch_agent") {
            let target = call
                .input
                .get("agent_id")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            // Any throw from the handoff handler MUST be translated into an
            // explicit stream-error so a lost handoff never appears as
            // silent success.
            return match self.dispatch_switch_agent(target, options).await {
                Ok(outcome) => Ok(outcome),
                Err(e) => {
                    self.emit(SessionEvent::StreamError {
                        workspace_id: self.config.workspace.clone(),
                        message: e.to_string(),
                    });
                    Ok(TurnOutcome::Errored)
                }
            };
        }
        Ok(TurnOutcome::Completed)
    }

    /// `switch_agent` is a signal tool: stops the stream, validates the
    /// target, falls back to a safe agent when invalid, enforces the loop
    /// guard, then dispatches the follow-up turn for the resolved agent so
    /// the handoff actually continues the conversation (spec.md §4.5.2).
    pub async fn dispatch_switch_agent(
        &self,
        target_agent_id: &str,
        current_options: &RunTurnOptions,
    ) -> Result<TurnOutcome> {
        let count = self.switch_loop_count.fetch_add(1, Ordering::SeqCst) + 1;
        if count > SWITCH_LOOP_LIMIT {
            let notice = SwitchLoopDetectedReminder.generate().expect("always produces a notice");
            self.emit(SessionEvent::StreamError {
                workspace_id: self.config.workspace.clone(),
                message: notice.text(),
            });
            return Err(MuxErr::Other(notice.text()));
        }

        let resolved = if self.agents.is_usable(target_agent_id) {
            target_agent_id.to_string()
        } else {
            let notice = TargetAgentUnavailableReminder {
                target_agent_id: target_agent_id.to_string(),
            }
            .generate()
            .expect("always produces a notice");
            self.append_message(notice).await?;
            if self.agents.is_usable("exec") {
                "exec".to_string()
            } else {
                target_agent_id.to_string()
            }
        };

        tracing::debug!(agent = %resolved, "dispatching follow-up turn after switch_agent");
        let mut stream = current_options.stream.clone();
        stream.agent_id = resolved;
        let follow_up = RunTurnOptions::new(stream);
        Box::pin(self.stream_with_history(follow_up)).await
    }

    pub(crate) async fn append_message(&self, message: MuxMessage) -> Result<()> {
        self.history.append_to_history(&self.config.workspace, message).await
    }

    pub(crate) fn history(&self) -> Arc<dyn HistoryService> {
        self.history.clone()
    }

    /// Step 5-6 of spec.md §4.5.1.
    async fn handle_stream_error(
        &self,
        kind: ProviderErrorKind,
        message: String,
        options: &RunTurnOptions,
        slice: &[MuxMessage],
    ) -> Result<TurnOutcome> {
        match kind {
            ProviderErrorKind::ContextExceeded => {
                self.history.delete_partial(&self.config.workspace).await?;

                if options.is_context_exceeded_retry {
                    // Re-occurrence after the one retry is surfaced, not
                    // re-retried (spec.md §4.5.4).
                    self.emit(SessionEvent::StreamError {
                        workspace_id: self.config.workspace.clone(),
                        message: "context exceeded after retry".to_string(),
                    });
                    return Ok(TurnOutcome::Errored);
                }

                if self.config.is_exec_like_subagent
                    && self.config.exec_subagent_hard_restart_experiment
                    && !self.hard_restart_fired.swap(true, Ordering::SeqCst)
                {
                    return self.hard_restart_and_retry(slice, options).await;
                }

                self.discard_post_compaction_state().await?;
                let mut retry_options = options.clone();
                retry_options.suppress_post_compaction_attachments = true;
                retry_options.is_context_exceeded_retry = true;
                Box::pin(self.stream_with_history(retry_options)).await
            }
            ProviderErrorKind::Authentication
            | ProviderErrorKind::ProviderNotSupported
            | ProviderErrorKind::ApiKeyNotFound
            | ProviderErrorKind::RuntimeStartFailed => {
                let already_handled = self.active_stream_failure_handled.swap(true, Ordering::SeqCst);
                if !already_handled {
                    self.emit(SessionEvent::StreamError {
                        workspace_id: self.config.workspace.clone(),
                        message,
                    });
                }
                Ok(TurnOutcome::Errored)
            }
            ProviderErrorKind::Other => {
                self.emit(SessionEvent::StreamError {
                    workspace_id: self.config.workspace.clone(),
                    message,
                });
                Ok(TurnOutcome::Errored)
            }
        }
    }

    /// Hard restart: clears history, re-appends a synthetic "restarted"
    /// notice plus the last user snapshot, then streams again with
    /// `additionalSystemInstructions` carrying the notice. Fires at most
    /// once per stream (enforced by the `hard_restart_fired` flag above).
    async fn hard_restart_and_retry(
        &self,
        slice: &[MuxMessage],
        options: &RunTurnOptions,
    ) -> Result<TurnOutcome> {
        let last_user = slice
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .cloned();

        self.history.clear_history(&self.config.workspace).await?;
        let notice = "restarted";
        self.history
            .append_to_history(
                &self.config.workspace,
                MuxMessage {
                    role: MessageRole::System,
                    id: Uuid::new_v4().to_string(),
                    parts: vec![MessagePart::Text { text: notice.to_string() }],
                    metadata: MessageMetadata {
                        synthetic: true,
                        ui_visible: true,
                        timestamp: Some(Utc::now()),
                        ..Default::default()
                    },
                },
            )
            .await?;
        if let Some(user_msg) = last_user {
            self.history.append_to_history(&self.config.workspace, user_msg).await?;
        }

        let stream = StreamOptions {
            model: options.stream.model.clone(),
            agent_id: options.stream.agent_id.clone(),
            additional_system_instructions: Some(notice.to_string()),
            post_compaction_attachments: None,
        };
        let retry_options = RunTurnOptions {
            stream,
            suppress_post_compaction_attachments: true,
            is_context_exceeded_retry: true,
            is_hard_restart: true,
        };
        Box::pin(self.stream_with_history(retry_options)).await
    }
}

#[derive(serde::Deserialize)]
struct PostCompactionDoc {
    #[allow(dead_code)]
    version: u32,
    #[allow(dead_code)]
    created_at: Option<String>,
    diffs: Vec<PostCompactionDiffDoc>,
}

#[derive(serde::Deserialize)]
struct PostCompactionDiffDoc {
    path: String,
    diff: String,
    #[serde(default)]
    truncated: bool,
}

impl From<PostCompactionDiffDoc> for PostCompactionDiff {
    fn from(value: PostCompactionDiffDoc) -> Self {
        PostCompactionDiff {
            path: value.path,
            diff: value.diff,
            truncated: value.truncated,
        }
    }
}

impl PostCompactionDoc {
    fn diffs_converted(self) -> Vec<PostCompactionDiff> {
        self.diffs.into_iter().map(Into::into).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::history::InMemoryHistory;
    use crate::session::provider::ScriptedProvider;

    fn make_session(
        scripts: Vec<Vec<ProviderEvent>>,
        is_exec_like_subagent: bool,
        hard_restart_experiment: bool,
    ) -> AgentSession {
        let history: Arc<dyn HistoryService> = Arc::new(InMemoryHistory::default());
        let provider: Arc<dyn ModelProvider> = Arc::new(ScriptedProvider::new(scripts));
        AgentSession::new(
            AgentSessionConfig {
                workspace: WorkspaceId::new("w1"),
                mux_home: MuxHome(std::env::temp_dir().join("mux-test-home")),
                exec_subagent_hard_restart_experiment: hard_restart_experiment,
                is_exec_like_subagent,
            },
            history,
            provider,
            AgentRegistry::new(),
        )
    }

    fn default_opts() -> RunTurnOptions {
        RunTurnOptions::new(StreamOptions {
            model: "test-model".to_string(),
            agent_id: "exec".to_string(),
            additional_system_instructions: None,
            post_compaction_attachments: None,
        })
    }

    #[tokio::test]
    async fn graceful_stream_end_completes_turn() {
        let session = make_session(
            vec![vec![
                ProviderEvent::Delta("hi".to_string()),
                ProviderEvent::StreamEnd { final_tool_calls: vec![] },
            ]],
            false,
            false,
        );
        let outcome = session.stream_with_history(default_opts()).await.expect("stream");
        assert_eq!(outcome, TurnOutcome::Completed);
        assert_eq!(session.phase().await, TurnPhase::Idle);
    }

    #[tokio::test]
    async fn context_exceeded_retries_exactly_once_without_attachments() {
        let session = make_session(
            vec![
                vec![ProviderEvent::Error {
                    kind: ProviderErrorKind::ContextExceeded,
                    message: "too big".to_string(),
                }],
                vec![ProviderEvent::StreamEnd { final_tool_calls: vec![] }],
            ],
            false,
            false,
        );
        let outcome = session.stream_with_history(default_opts()).await.expect("stream");
        assert_eq!(outcome, TurnOutcome::Completed);
    }

    #[tokio::test]
    async fn repeated_context_exceeded_is_surfaced_not_re_retried() {
        let session = make_session(
            vec![
                vec![ProviderEvent::Error {
                    kind: ProviderErrorKind::ContextExceeded,
                    message: "too big".to_string(),
                }],
                vec![ProviderEvent::Error {
                    kind: ProviderErrorKind::ContextExceeded,
                    message: "still too big".to_string(),
                }],
            ],
            false,
            false,
        );
        let mut rx = session.subscribe();
        let outcome = session.stream_with_history(default_opts()).await.expect("stream");
        assert_eq!(outcome, TurnOutcome::Errored);
        let mut saw_error = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, SessionEvent::StreamError { .. }) {
                saw_error = true;
            }
        }
        assert!(saw_error);
    }

    #[tokio::test]
    async fn auth_error_emits_stream_error_exactly_once() {
        let session = make_session(
            vec![vec![ProviderEvent::Error {
                kind: ProviderErrorKind::Authentication,
                message: "no key".to_string(),
            }]],
            false,
            false,
        );
        session.active_stream_failure_handled.store(false, Ordering::SeqCst);
        let outcome = session.stream_with_history(default_opts()).await.expect("stream");
        assert_eq!(outcome, TurnOutcome::Errored);
        assert!(session.debug_state().active_stream_failure_handled);
    }

    #[tokio::test]
    async fn switch_agent_loop_guard_rejects_fourth_switch() {
        let session = make_session(vec![], false, false);
        let opts = default_opts();
        for _ in 0..3 {
            session
                .dispatch_switch_agent("plan", &opts)
                .await
                .expect("first three switches allowed");
        }
        let fourth = session.dispatch_switch_agent("plan", &opts).await;
        assert!(fourth.is_err());
        assert_eq!(fourth.unwrap_err().to_string(), "Agent switch loop detected");
    }

    #[tokio::test]
    async fn invalid_switch_target_falls_back_and_notes_unavailable() {
        let session = make_session(vec![], false, false);
        session
            .dispatch_switch_agent("nonexistent-agent", &default_opts())
            .await
            .expect("falls back instead of erroring");
        let history = session
            .history
            .get_last_messages(&session.config.workspace, 10)
            .await
            .expect("messages");
        assert!(history.iter().any(|m| m.text().contains("is unavailable")));
    }

    #[tokio::test]
    async fn switch_agent_dispatches_a_real_follow_up_turn_for_the_target_agent() {
        let session = make_session(
            vec![vec![
                ProviderEvent::Delta("continuing as plan".to_string()),
                ProviderEvent::StreamEnd { final_tool_calls: vec![] },
            ]],
            false,
            false,
        );
        let outcome = session
            .dispatch_switch_agent("plan", &default_opts())
            .await
            .expect("switch dispatches a follow-up turn");
        assert_eq!(outcome, TurnOutcome::Completed);
        let history = session
            .history
            .get_last_messages(&session.config.workspace, 10)
            .await
            .expect("messages");
        assert!(history.iter().any(|m| m.text().contains("continuing as plan")));
    }
}
