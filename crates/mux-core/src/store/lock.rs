//! Per-workspace advisory mutex guarding concurrent writers to the session
//! directory. Single point of serialization for any write touching
//! `<sessionDir>/<W>/` (spec.md §5).

use dashmap::DashMap;
use mux_protocol::WorkspaceId;
use once_cell::sync::Lazy;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

static LOCKS: Lazy<DashMap<WorkspaceId, Arc<Mutex<()>>>> = Lazy::new(DashMap::new);

/// RAII guard: the lock is released on drop, including on panics/early
/// returns during streaming (spec.md §9, "scoped acquisition").
pub struct WorkspaceLockGuard(#[allow(dead_code)] OwnedMutexGuard<()>);

/// Acquires the per-workspace lock. Any write conditional on the presence
/// of the session directory (e.g. `InitStateManager::end_init`'s persist)
/// MUST re-check that condition after acquiring this guard.
pub async fn acquire(workspace: &WorkspaceId) -> WorkspaceLockGuard {
    let mutex = LOCKS
        .entry(workspace.clone())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone();
    let guard = mutex.lock_owned().await;
    WorkspaceLockGuard(guard)
}
