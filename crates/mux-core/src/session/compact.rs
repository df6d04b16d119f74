//! (expansion) Compaction strategy trait, grounded on
//! `core/src/compact_strategies/{simple,file_recovery}.rs`. Spec.md §4.5.4
//! only specifies the retry behavior around `context_exceeded`; the
//! strategy used to actually produce the boundary summary is ambient
//! session plumbing left unspecified by the distillation.

use crate::session::provider::PostCompactionDiff;
use chrono::Utc;
use mux_protocol::{MessageMetadata, MessagePart, MessageRole, MuxMessage};
use uuid::Uuid;

pub trait CompactStrategy: Send + Sync {
    fn summarize(&self, slice: &[MuxMessage], epoch: u64) -> MuxMessage;
}

pub struct SimpleCompactStrategy;

impl CompactStrategy for SimpleCompactStrategy {
    fn summarize(&self, slice: &[MuxMessage], epoch: u64) -> MuxMessage {
        let text = slice
            .iter()
            .map(|m| m.text())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        MuxMessage {
            role: MessageRole::Assistant,
            id: Uuid::new_v4().to_string(),
            parts: vec![MessagePart::Text {
                text: format!("Summary of prior turns:\n{text}"),
            }],
            metadata: MessageMetadata {
                timestamp: Some(Utc::now()),
                compacted: true,
                compaction_boundary: Some(true),
                compaction_epoch: Some(epoch),
                ..Default::default()
            },
        }
    }
}

/// Composes `SimpleCompactStrategy` and additionally re-attaches the diffs
/// recorded in `post-compaction.json` so file edits survive compaction.
pub struct FileRecoveryCompactStrategy {
    inner: SimpleCompactStrategy,
}

impl Default for FileRecoveryCompactStrategy {
    fn default() -> Self {
        Self {
            inner: SimpleCompactStrategy,
        }
    }
}

impl FileRecoveryCompactStrategy {
    pub fn summarize_with_diffs(
        &self,
        slice: &[MuxMessage],
        epoch: u64,
        diffs: &[PostCompactionDiff],
    ) -> MuxMessage {
        let mut summary = self.inner.summarize(slice, epoch);
        if !diffs.is_empty() {
            let diff_text = diffs
                .iter()
                .map(|d| format!("--- {} ---\n{}", d.path, d.diff))
                .collect::<Vec<_>>()
                .join("\n\n");
            summary.parts.push(MessagePart::Text {
                text: format!("\nFile edits preserved across compaction:\n{diff_text}"),
            });
        }
        summary
    }
}
