//! Capability interface the session reads from and writes to. The session
//! holds no back-reference to a concrete history implementation — this is
//! the cyclic-coupling fix called out in spec.md §9.

use crate::error::Result;
use async_trait::async_trait;
use mux_protocol::{latest_boundary_slice, MuxMessage, WorkspaceId};

#[async_trait]
pub trait HistoryService: Send + Sync {
    /// Reads the latest boundary slice (spec.md §3's invariant: all reads
    /// used for LLM prompting MUST use this slice).
    async fn get_history_from_latest_boundary(
        &self,
        workspace: &WorkspaceId,
    ) -> Result<Vec<MuxMessage>>;

    async fn get_last_messages(
        &self,
        workspace: &WorkspaceId,
        count: usize,
    ) -> Result<Vec<MuxMessage>>;

    async fn append_to_history(&self, workspace: &WorkspaceId, message: MuxMessage) -> Result<()>;

    async fn write_partial(&self, workspace: &WorkspaceId, message: MuxMessage) -> Result<()>;

    /// Atomically promotes the partial to committed history on stream end.
    async fn commit_to_history(&self, workspace: &WorkspaceId) -> Result<()>;

    async fn delete_partial(&self, workspace: &WorkspaceId) -> Result<()>;

    async fn delete_message(&self, workspace: &WorkspaceId, message_id: &str) -> Result<()>;

    async fn clear_history(&self, workspace: &WorkspaceId) -> Result<()>;
}

/// An in-memory `HistoryService` used by tests and as a reference
/// implementation; a real deployment backs this with `history.jsonl`
/// (append-only) plus `partial.json` (atomic replace), per spec.md §6.
#[derive(Default)]
pub struct InMemoryHistory {
    committed: dashmap::DashMap<WorkspaceId, Vec<MuxMessage>>,
    partial: dashmap::DashMap<WorkspaceId, MuxMessage>,
}

#[async_trait]
impl HistoryService for InMemoryHistory {
    async fn get_history_from_latest_boundary(
        &self,
        workspace: &WorkspaceId,
    ) -> Result<Vec<MuxMessage>> {
        let history = self
            .committed
            .get(workspace)
            .map(|h| h.clone())
            .unwrap_or_default();
        Ok(latest_boundary_slice(&history).to_vec())
    }

    async fn get_last_messages(
        &self,
        workspace: &WorkspaceId,
        count: usize,
    ) -> Result<Vec<MuxMessage>> {
        let history = self
            .committed
            .get(workspace)
            .map(|h| h.clone())
            .unwrap_or_default();
        let start = history.len().saturating_sub(count);
        Ok(history[start..].to_vec())
    }

    async fn append_to_history(&self, workspace: &WorkspaceId, message: MuxMessage) -> Result<()> {
        self.committed.entry(workspace.clone()).or_default().push(message);
        Ok(())
    }

    async fn write_partial(&self, workspace: &WorkspaceId, message: MuxMessage) -> Result<()> {
        self.partial.insert(workspace.clone(), message);
        Ok(())
    }

    async fn commit_to_history(&self, workspace: &WorkspaceId) -> Result<()> {
        if let Some((_, message)) = self.partial.remove(workspace) {
            self.committed.entry(workspace.clone()).or_default().push(message);
        }
        Ok(())
    }

    async fn delete_partial(&self, workspace: &WorkspaceId) -> Result<()> {
        self.partial.remove(workspace);
        Ok(())
    }

    async fn delete_message(&self, workspace: &WorkspaceId, message_id: &str) -> Result<()> {
        if let Some(mut history) = self.committed.get_mut(workspace) {
            history.retain(|m| m.id != message_id);
        }
        Ok(())
    }

    async fn clear_history(&self, workspace: &WorkspaceId) -> Result<()> {
        self.committed.insert(workspace.clone(), Vec::new());
        Ok(())
    }
}
