//! Generic durable event log: in-memory state keyed by workspace, atomic
//! JSON snapshot on disk, replay on demand (spec.md §4.2).

use super::lock;
use crate::error::{MuxErr, Result};
use dashmap::DashMap;
use mux_protocol::WorkspaceId;
use serde::{de::DeserializeOwned, Serialize};
use std::path::PathBuf;

/// `S` is the durable state snapshot; `E` is the event type a caller-
/// supplied serializer turns a resolved `S` into, for `replay`.
pub struct EventStore<S> {
    memory: DashMap<WorkspaceId, S>,
    path_for: Box<dyn Fn(&WorkspaceId) -> PathBuf + Send + Sync>,
}

impl<S> EventStore<S>
where
    S: Clone + Serialize + DeserializeOwned + Send + Sync,
{
    pub fn new(path_for: impl Fn(&WorkspaceId) -> PathBuf + Send + Sync + 'static) -> Self {
        Self {
            memory: DashMap::new(),
            path_for: Box::new(path_for),
        }
    }

    pub fn set_state(&self, workspace: &WorkspaceId, state: S) {
        self.memory.insert(workspace.clone(), state);
    }

    pub fn get_state(&self, workspace: &WorkspaceId) -> Option<S> {
        self.memory.get(workspace).map(|s| s.clone())
    }

    pub fn has_state(&self, workspace: &WorkspaceId) -> bool {
        self.memory.contains_key(workspace)
    }

    pub fn delete_state(&self, workspace: &WorkspaceId) {
        self.memory.remove(workspace);
    }

    /// Atomic write-temp + rename, optionally guarded by `should_write`
    /// (re-checked under the workspace lock) so a write enqueued before a
    /// deletion cannot resurrect files after the deletion completes.
    pub async fn persist(
        &self,
        workspace: &WorkspaceId,
        state: &S,
        should_write: Option<impl Fn() -> bool>,
    ) -> Result<()> {
        let _guard = lock::acquire(workspace).await;
        if let Some(predicate) = should_write {
            if !predicate() {
                return Ok(());
            }
        }
        let path = (self.path_for)(workspace);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(state)?;
        let tmp = path.with_extension("mux-tmp");
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    pub async fn read_persisted(&self, workspace: &WorkspaceId) -> Result<Option<S>> {
        let path = (self.path_for)(workspace);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(MuxErr::Io(e)),
        }
    }

    pub async fn delete_persisted(&self, workspace: &WorkspaceId) -> Result<()> {
        let _guard = lock::acquire(workspace).await;
        let path = (self.path_for)(workspace);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MuxErr::Io(e)),
        }
    }

    /// Resolves the current state (in-memory first, else disk) and calls
    /// `serialize` to produce the event sequence a live observer would
    /// have seen.
    pub async fn replay<E>(
        &self,
        workspace: &WorkspaceId,
        serialize: impl FnOnce(&S) -> Vec<E>,
    ) -> Result<Vec<E>> {
        let state = match self.get_state(workspace) {
            Some(s) => Some(s),
            None => self.read_persisted(workspace).await?,
        };
        Ok(state.as_ref().map(serialize).unwrap_or_default())
    }
}
