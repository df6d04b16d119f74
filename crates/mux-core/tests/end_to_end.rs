//! Cross-module integration tests for the six concrete scenarios named in
//! spec.md §8, exercised only through `mux-core`'s public surface (as an
//! external crate would use it), complementing the white-box unit tests
//! already living alongside each component.

use mux_core::background::BackgroundProcessManager;
use mux_core::paths::MuxHome;
use mux_core::runtime::LocalRuntime;
use mux_core::session::{
    AgentSession, AgentSessionConfig, AgentRegistry, InMemoryHistory, ProviderErrorKind,
    ProviderEvent, RunTurnOptions, StreamOptions, TurnOutcome,
};
use mux_core::session::provider::ScriptedProvider;
use mux_core::tools::bash::{run_bash, BashRequest, TruncationPolicy};
use mux_core::tools::file_edit::{execute_file_edit_operation, PlanModeConfig, ReplaceOperation};
use mux_core::tools::todo::{todo_read, todo_write};
use mux_protocol::{SessionEvent, TodoItem, TodoStatus, WorkspaceId};
use std::collections::HashMap;
use std::sync::Arc;

fn stream_options() -> StreamOptions {
    StreamOptions {
        model: "test-model".to_string(),
        agent_id: "exec".to_string(),
        additional_system_instructions: None,
        post_compaction_attachments: None,
    }
}

fn session_config(workspace: WorkspaceId, mux_home: MuxHome) -> AgentSessionConfig {
    AgentSessionConfig {
        workspace,
        mux_home,
        exec_subagent_hard_restart_experiment: false,
        is_exec_like_subagent: false,
    }
}

/// Scenario: a `context_exceeded` error is retried exactly once, with the
/// retry suppressing post-compaction attachments; a second consecutive
/// `context_exceeded` is surfaced as a `StreamError`, not retried again.
#[tokio::test]
async fn context_exceeded_retries_once_then_surfaces_on_repeat() {
    let dir = tempfile::tempdir().expect("tempdir");
    let workspace = WorkspaceId::new("w1");
    let mux_home = MuxHome(dir.path().to_path_buf());

    let provider = Arc::new(ScriptedProvider::new(vec![
        vec![ProviderEvent::Error {
            kind: ProviderErrorKind::ContextExceeded,
            message: "too many tokens".to_string(),
        }],
        vec![ProviderEvent::Error {
            kind: ProviderErrorKind::ContextExceeded,
            message: "still too many tokens".to_string(),
        }],
    ]));
    let history = Arc::new(InMemoryHistory::default());
    let session = AgentSession::new(
        session_config(workspace.clone(), mux_home),
        history,
        provider,
        AgentRegistry::new(),
    );

    let mut events = session.subscribe();
    let outcome = session
        .stream_with_history(RunTurnOptions::new(stream_options()))
        .await
        .expect("turn completes without propagating an error");
    assert_eq!(outcome, TurnOutcome::Errored);

    let mut saw_stream_error = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, SessionEvent::StreamError { .. }) {
            saw_stream_error = true;
        }
    }
    assert!(saw_stream_error, "repeated context_exceeded must surface as StreamError");
}

/// Scenario: the agent-switch loop guard rejects a fourth consecutive
/// synthetic switch without intervening user input.
#[tokio::test]
async fn switch_agent_loop_guard_rejects_the_fourth_consecutive_switch() {
    let dir = tempfile::tempdir().expect("tempdir");
    let workspace = WorkspaceId::new("w1");
    let mux_home = MuxHome(dir.path().to_path_buf());

    let provider = Arc::new(ScriptedProvider::new(vec![]));
    let history = Arc::new(InMemoryHistory::default());
    let session = AgentSession::new(
        session_config(workspace, mux_home),
        history,
        provider,
        AgentRegistry::new(),
    );

    let opts = RunTurnOptions::new(stream_options());
    for _ in 0..3 {
        session
            .dispatch_switch_agent("plan", &opts)
            .await
            .expect("switch within budget");
    }
    let result = session.dispatch_switch_agent("plan", &opts).await;
    assert!(result.is_err(), "the fourth consecutive switch must be rejected");

    session.note_user_input();
    session
        .dispatch_switch_agent("plan", &opts)
        .await
        .expect("a real user message resets the loop guard");
}

/// Scenario: a background process spawned through the `bash` tool is
/// terminated via the manager with no orphaned process-group leader left
/// running, observed end-to-end through the tool entry point rather than
/// the manager's internals directly.
#[tokio::test]
async fn background_process_spawned_via_bash_tool_terminates_cleanly() {
    let dir = tempfile::tempdir().expect("tempdir");
    let runtime = LocalRuntime;
    let background = BackgroundProcessManager::new(Arc::new(LocalRuntime), dir.path().to_path_buf());
    let workspace = WorkspaceId::new("w1");

    let outcome = run_bash(
        &runtime,
        &background,
        &workspace,
        BashRequest {
            script: "bash -c 'sleep 60 & wait'".to_string(),
            cwd: dir.path().to_path_buf(),
            env: HashMap::new(),
            policy: TruncationPolicy::Tmpfile,
            run_in_background: true,
            timeout_secs: None,
            display_name: Some("long-runner".to_string()),
            abort: mux_core::runtime::AbortSignal::new(),
        },
    )
    .await
    .expect("run_bash");
    assert!(outcome.is_success());

    let record = background.terminate("long-runner").await.expect("terminate");
    assert_eq!(record.status, mux_protocol::ProcessStatus::Killed);

    let second = background.terminate("long-runner").await.expect("terminate again");
    assert_eq!(second.status, mux_protocol::ProcessStatus::Killed);
}

/// Scenario: plan-mode containment rejects an edit outside the configured
/// plan file before any file is ever read or written.
#[tokio::test]
async fn plan_mode_rejects_edits_outside_the_plan_file_through_the_public_pipeline() {
    let dir = tempfile::tempdir().expect("tempdir");
    let runtime = LocalRuntime;
    let plan = PlanModeConfig {
        plan_file_only: true,
        plan_file_path: dir.path().join("plan.md"),
    };
    let target = dir.path().join("notes.md");

    let outcome = execute_file_edit_operation(
        &runtime,
        dir.path(),
        "notes.md",
        &plan,
        &ReplaceOperation { new_content: "sneaky".to_string() },
    )
    .await;

    assert!(!outcome.is_success());
    assert!(!target.exists());
}

/// Scenario: `todo_write`/`todo_read` round-trip through the mux-home
/// filesystem layout, validated end to end rather than against an
/// in-memory stand-in.
#[tokio::test]
async fn todo_write_then_read_round_trips_through_the_real_filesystem_layout() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mux_home = MuxHome(dir.path().to_path_buf());
    let workspace = WorkspaceId::new("w1");

    let todos = vec![
        TodoItem { content: "write integration tests".to_string(), status: TodoStatus::InProgress },
        TodoItem { content: "ship it".to_string(), status: TodoStatus::Pending },
    ];
    let write_outcome = todo_write(&mux_home, &workspace, todos).await.expect("write");
    assert!(write_outcome.is_success());
    assert!(mux_home.todos_path(&workspace).exists());

    let read_outcome = todo_read(&mux_home, &workspace).await.expect("read");
    let mux_core::tools::ToolOutcome::Success(value) = read_outcome else {
        panic!("expected success");
    };
    assert_eq!(value["todos"].as_array().expect("array").len(), 2);
}

/// Scenario: startup auto-retry replays an interrupted user-tail message
/// exactly once, driven through `SessionManager` rather than the session
/// directly.
#[tokio::test]
async fn session_manager_replays_an_interrupted_turn_on_startup() {
    use mux_core::session::SessionManager;
    use mux_protocol::message::RetrySendOptions;
    use mux_protocol::{MessageMetadata, MessagePart, MessageRole, MuxMessage};

    let dir = tempfile::tempdir().expect("tempdir");
    let mux_home = MuxHome(dir.path().to_path_buf());
    let manager = SessionManager::new(mux_home.clone());
    let workspace = WorkspaceId::new("w1");

    let history = Arc::new(InMemoryHistory::default());
    let interrupted = MuxMessage {
        role: MessageRole::User,
        id: uuid::Uuid::new_v4().to_string(),
        parts: vec![MessagePart::Text { text: "finish the migration".to_string() }],
        metadata: MessageMetadata {
            retry_send_options: Some(RetrySendOptions {
                model: "test-model".to_string(),
                agent_id: "exec".to_string(),
                tool_policy: vec![],
                disable_workspace_agents: false,
            }),
            ..Default::default()
        },
    };
    history.append_to_history(&workspace, interrupted).await.expect("seed");

    let provider = Arc::new(ScriptedProvider::new(vec![vec![ProviderEvent::StreamEnd {
        final_tool_calls: vec![],
    }]]));
    let session = Arc::new(AgentSession::new(
        session_config(workspace.clone(), mux_home),
        history,
        provider,
        AgentRegistry::new(),
    ));
    manager.register(workspace.clone(), session.clone());

    manager
        .ensure_startup_auto_retry_check(&workspace)
        .await
        .expect("startup retry check");

    assert_eq!(session.phase().await, mux_core::session::TurnPhase::Idle);
}
