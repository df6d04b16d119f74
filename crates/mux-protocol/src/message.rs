use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolCallState {
    InputAvailable,
    OutputAvailable,
    OutputError,
}

/// One ordered element of a message's `parts` sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MessagePart {
    Text {
        text: String,
    },
    DynamicTool {
        tool_call_id: String,
        tool_name: String,
        state: ToolCallState,
        input: serde_json::Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        output: Option<serde_json::Value>,
    },
}

/// `metadata.muxMetadata`, e.g. `{ type: "compaction-summary", pendingFollowUp }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MuxMetadata {
    CompactionSummary {
        #[serde(skip_serializing_if = "Option::is_none")]
        pending_follow_up: Option<PendingFollowUp>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingFollowUp {
    pub text: String,
    pub agent_id: Option<String>,
}

/// The full send options a retry should replay, persisted verbatim on the
/// interrupted user message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetrySendOptions {
    pub model: String,
    pub agent_id: String,
    #[serde(default)]
    pub tool_policy: Vec<ToolPolicyRule>,
    #[serde(default)]
    pub disable_workspace_agents: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolPolicyRule {
    pub regex_match: String,
    pub action: ToolPolicyAction,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ToolPolicyAction {
    Enable,
    Disable,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,
    /// Do-not-show-in-UI.
    #[serde(default)]
    pub synthetic: bool,
    #[serde(default)]
    pub ui_visible: bool,
    #[serde(default)]
    pub compacted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compaction_boundary: Option<bool>,
    /// Strictly-monotone per workspace when `compaction_boundary` is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compaction_epoch: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_send_options: Option<RetrySendOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_at_mention_snapshot: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_policy: Option<Vec<ToolPolicyRule>>,
    #[serde(default)]
    pub disable_workspace_agents: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub partial: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mux_metadata: Option<MuxMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MuxMessage {
    pub role: MessageRole,
    pub id: String,
    pub parts: Vec<MessagePart>,
    #[serde(default)]
    pub metadata: MessageMetadata,
}

impl MuxMessage {
    pub fn is_compaction_boundary(&self) -> bool {
        self.metadata.compacted && self.metadata.compaction_boundary.unwrap_or(false)
    }

    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                MessagePart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Resolves the *latest boundary slice*: the suffix starting at the
/// largest-epoch compaction boundary message, or the whole history if
/// there is none. All reads used for LLM prompting MUST use this slice.
pub fn latest_boundary_slice(history: &[MuxMessage]) -> &[MuxMessage] {
    let mut best: Option<(usize, u64)> = None;
    for (idx, msg) in history.iter().enumerate() {
        if msg.is_compaction_boundary() {
            if let Some(epoch) = msg.metadata.compaction_epoch {
                if best.map(|(_, e)| epoch > e).unwrap_or(true) {
                    best = Some((idx, epoch));
                }
            }
        }
    }
    match best {
        Some((idx, _)) => &history[idx..],
        None => history,
    }
}
