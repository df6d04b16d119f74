//! The streaming event contract consumed from a language-model provider.
//! Only this contract is specified (spec.md §1); the HTTP clients
//! themselves are an external collaborator.

use async_trait::async_trait;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub model: String,
    pub agent_id: String,
    pub additional_system_instructions: Option<String>,
    /// Diffs re-attached after a compaction boundary; `None` suppresses
    /// reinjection (used on the post-compaction and hard-restart retries).
    pub post_compaction_attachments: Option<Vec<PostCompactionDiff>>,
}

#[derive(Debug, Clone)]
pub struct PostCompactionDiff {
    pub path: String,
    pub diff: String,
    pub truncated: bool,
}

#[derive(Debug, Clone)]
pub enum ProviderErrorKind {
    ContextExceeded,
    Authentication,
    ProviderNotSupported,
    ApiKeyNotFound,
    RuntimeStartFailed,
    Other,
}

#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub tool_call_id: String,
    pub tool_name: String,
    pub input: Value,
}

#[derive(Debug, Clone)]
pub enum ProviderEvent {
    Delta(String),
    ToolCall(ToolCallRequest),
    Error { kind: ProviderErrorKind, message: String },
    StreamAbort,
    /// Terminal success event; `final_tool_calls` lets the session inspect
    /// signal tools like `switch_agent` without re-parsing the transcript.
    StreamEnd { final_tool_calls: Vec<ToolCallRequest> },
}

#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn stream(
        &self,
        prompt: &[mux_protocol::MuxMessage],
        options: &StreamOptions,
    ) -> tokio::sync::mpsc::Receiver<ProviderEvent>;
}

/// Deterministic provider used by tests: returns a pre-scripted sequence of
/// events for each call, in order, regardless of prompt contents.
pub struct ScriptedProvider {
    scripts: tokio::sync::Mutex<std::collections::VecDeque<Vec<ProviderEvent>>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Vec<ProviderEvent>>) -> Self {
        Self {
            scripts: tokio::sync::Mutex::new(scripts.into()),
        }
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn stream(
        &self,
        _prompt: &[mux_protocol::MuxMessage],
        _options: &StreamOptions,
    ) -> tokio::sync::mpsc::Receiver<ProviderEvent> {
        let script = self
            .scripts
            .lock()
            .await
            .pop_front()
            .unwrap_or_default();
        let (tx, rx) = tokio::sync::mpsc::channel(script.len().max(1));
        for event in script {
            let _ = tx.send(event).await;
        }
        rx
    }
}
