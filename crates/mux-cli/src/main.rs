//! Thin manual-exercise binary for `mux-core`. Not a production UI — it
//! shells straight into the tool layer so a human can drive a workspace
//! from a terminal the way the integration tests drive it in-process.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mux_core::runtime::{AbortSignal, LocalRuntime};
use mux_core::tools::bash::{run_bash, BashRequest, TruncationPolicy};
use mux_core::tools::todo::{todo_read, todo_write};
use mux_core::MuxHome;
use mux_protocol::{TodoItem, TodoStatus, WorkspaceId};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "mux", version, about = "Exercise a mux-core workspace from the command line")]
struct Cli {
    /// Directory used as the mux home for session/todo state.
    #[arg(long, global = true, default_value = "./.mux-home")]
    mux_home: PathBuf,

    /// Workspace id to operate on.
    #[arg(long, global = true, default_value = "default")]
    workspace: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a shell command through the same path the `bash` tool uses.
    Exec {
        script: String,
        #[arg(long)]
        background: bool,
        #[arg(long)]
        cwd: Option<PathBuf>,
    },
    /// Replace the workspace's todo list.
    TodoWrite {
        /// `content:status` pairs, status one of pending/in_progress/completed/cancelled.
        items: Vec<String>,
    },
    /// Print the workspace's current todo list.
    TodoRead,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let workspace = WorkspaceId::new(cli.workspace);
    let home = MuxHome(cli.mux_home);

    match cli.command {
        Command::Exec { script, background, cwd } => run_exec(&workspace, script, background, cwd).await,
        Command::TodoWrite { items } => run_todo_write(&home, &workspace, items).await,
        Command::TodoRead => run_todo_read(&home, &workspace).await,
    }
}

async fn run_exec(
    workspace: &WorkspaceId,
    script: String,
    background: bool,
    cwd: Option<PathBuf>,
) -> Result<()> {
    let runtime = LocalRuntime;
    let tmp = std::env::temp_dir();
    let bg = mux_core::background::BackgroundProcessManager::new(Arc::new(LocalRuntime), tmp);
    let cwd = cwd
        .or_else(|| std::env::current_dir().ok())
        .context("could not determine a working directory")?;

    let abort = AbortSignal::new();
    let ctrlc_abort = abort.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrlc_abort.cancel();
        }
    });

    let outcome = run_bash(
        &runtime,
        &bg,
        workspace,
        BashRequest {
            script,
            cwd,
            env: HashMap::new(),
            policy: TruncationPolicy::Truncate,
            run_in_background: background,
            timeout_secs: None,
            display_name: None,
            abort,
        },
    )
    .await?;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

fn parse_todo(spec: &str) -> Result<TodoItem> {
    let (content, status) = spec
        .rsplit_once(':')
        .context("expected content:status, e.g. 'ship it:in_progress'")?;
    let status = match status {
        "pending" => TodoStatus::Pending,
        "in_progress" => TodoStatus::InProgress,
        "completed" => TodoStatus::Completed,
        "cancelled" => TodoStatus::Cancelled,
        other => anyhow::bail!("unknown todo status: {other}"),
    };
    Ok(TodoItem { content: content.to_string(), status })
}

async fn run_todo_write(home: &MuxHome, workspace: &WorkspaceId, items: Vec<String>) -> Result<()> {
    let todos = items.iter().map(|s| parse_todo(s)).collect::<Result<Vec<_>>>()?;
    let outcome = todo_write(home, workspace, todos).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn run_todo_read(home: &MuxHome, workspace: &WorkspaceId) -> Result<()> {
    let outcome = todo_read(home, workspace).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}
