//! `todo_write` / `todo_read` (spec.md §4.6). Delegates the ordering/size
//! invariants to `mux_protocol::todo::validate_todos`; persists under the
//! session directory via write-temp + rename, serialized by the workspace
//! lock the caller is expected to hold.

use crate::error::Result;
use crate::paths::MuxHome;
use crate::tools::ToolOutcome;
use mux_protocol::todo::validate_todos;
use mux_protocol::{TodoItem, WorkspaceId};
use serde_json::json;

pub async fn todo_write(
    mux_home: &MuxHome,
    workspace: &WorkspaceId,
    todos: Vec<TodoItem>,
) -> Result<ToolOutcome> {
    if let Err(e) = validate_todos(&todos) {
        return Ok(ToolOutcome::err(e.to_string()));
    }

    let path = mux_home.todos_path(workspace);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("tmp");
    let bytes = serde_json::to_vec_pretty(&todos)?;
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, &path).await?;

    Ok(ToolOutcome::ok(json!({ "count": todos.len() })))
}

pub async fn todo_read(mux_home: &MuxHome, workspace: &WorkspaceId) -> Result<ToolOutcome> {
    let path = mux_home.todos_path(workspace);
    let todos: Vec<TodoItem> = match tokio::fs::read(&path).await {
        Ok(bytes) => serde_json::from_slice(&bytes)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(e.into()),
    };
    Ok(ToolOutcome::ok(json!({ "todos": todos })))
}
