//! `bash` (spec.md §4.6). Two truncation regimes: `tmpfile` for AI-issued
//! calls (hard caps, kill on corrupt-looking per-line overflow, overflow
//! spills the full output to a temp file) and `truncate` for IPC callers
//! (generous limits, truncation reported in-band, never kills).

use crate::background::BackgroundProcessManager;
use crate::error::Result;
use crate::runtime::{AbortSignal, ExecOptions, ExecStream, Runtime};
use crate::tools::ToolOutcome;
use mux_protocol::WorkspaceId;
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncReadExt};

pub const TMPFILE_MAX_LINES: usize = 300;
pub const TMPFILE_MAX_DISPLAY_BYTES: usize = 16 * 1024;
pub const TMPFILE_MAX_LINE_BYTES: usize = 1024;
pub const TRUNCATE_MAX_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruncationPolicy {
    /// AI-issued tool calls.
    Tmpfile,
    /// IPC/internal callers.
    Truncate,
}

pub struct BashRequest {
    pub script: String,
    pub cwd: PathBuf,
    pub env: HashMap<String, String>,
    pub policy: TruncationPolicy,
    pub run_in_background: bool,
    pub timeout_secs: Option<u64>,
    pub display_name: Option<String>,
    /// Cancels the foreground exec (spec.md §5: every suspending operation
    /// accepts an abort signal). Ignored when `run_in_background` is set —
    /// backgrounded processes are cancelled via `terminate`, not this.
    pub abort: AbortSignal,
}

fn is_redundant_cd(script: &str, cwd: &std::path::Path) -> bool {
    let trimmed = script.trim();
    let cwd_str = cwd.display().to_string();
    trimmed == format!("cd {cwd_str}")
        || trimmed == format!("cd \"{cwd_str}\"")
        || trimmed == "cd ."
        || trimmed == "cd"
}

pub async fn run_bash(
    runtime: &dyn Runtime,
    background: &BackgroundProcessManager,
    workspace: &WorkspaceId,
    req: BashRequest,
) -> Result<ToolOutcome> {
    let trimmed = req.script.trim();
    if trimmed.is_empty() {
        return Ok(ToolOutcome::err("script must not be empty"));
    }
    if trimmed.starts_with("sleep") {
        return Ok(ToolOutcome::err("script must not start with sleep"));
    }
    if is_redundant_cd(trimmed, &req.cwd) {
        return Ok(ToolOutcome::err("redundant cd to the working directory"));
    }

    if req.run_in_background {
        let spawned = background
            .spawn(
                workspace,
                &req.script,
                Some(req.cwd.clone()),
                req.env.clone(),
                req.display_name.clone(),
            )
            .await?;
        return Ok(ToolOutcome::ok(json!({
            "backgroundProcessId": spawned.process_id,
            "stdout_path": spawned.output_dir.join("output.log").display().to_string(),
            "stderr_path": spawned.output_dir.join("output.log").display().to_string(),
        })));
    }

    let opts = ExecOptions {
        cwd: Some(req.cwd.clone()),
        env: req.env,
        timeout: req.timeout_secs.map(std::time::Duration::from_secs),
        niceness: None,
    };
    let abort = req.abort;
    let stream = runtime.exec(&req.script, opts, abort.clone()).await?;

    match req.policy {
        TruncationPolicy::Tmpfile => run_tmpfile(stream, abort).await,
        TruncationPolicy::Truncate => run_truncate(stream).await,
    }
}

async fn drain_concurrently(mut stream: ExecStream) -> (Vec<u8>, i32) {
    let mut stdout_buf = Vec::new();
    let mut stderr_buf = Vec::new();
    let (stdout_res, stderr_res) = tokio::join!(
        stream.stdout.read_to_end(&mut stdout_buf),
        stream.stderr.read_to_end(&mut stderr_buf),
    );
    let _ = stdout_res;
    let _ = stderr_res;
    let code = stream.exit_code.await.unwrap_or(-1);
    stdout_buf.extend_from_slice(&stderr_buf);
    (stdout_buf, code)
}

async fn run_truncate(stream: ExecStream) -> Result<ToolOutcome> {
    let (bytes, exit_code) = drain_concurrently(stream).await;
    let text = String::from_utf8_lossy(&bytes);
    let total_lines = text.lines().count();

    if bytes.len() > TRUNCATE_MAX_BYTES {
        let truncated: String = text.chars().take(TRUNCATE_MAX_BYTES).collect();
        return Ok(ToolOutcome::ok(json!({
            "output": truncated,
            "exitCode": exit_code,
            "truncated": { "reason": "byte limit exceeded", "totalLines": total_lines },
        })));
    }

    Ok(ToolOutcome::ok(json!({
        "output": text,
        "exitCode": exit_code,
    })))
}

const DRAIN_CHUNK_BYTES: usize = 8 * 1024;

/// Reads `reader` to completion, scanning for a line (run of bytes between
/// `\n`s) longer than `TMPFILE_MAX_LINE_BYTES`. The instant one is found,
/// `abort` is cancelled — `LocalRuntime::exec`'s wait task is already racing
/// on that same signal and kills the child immediately — and this function
/// returns `true` without waiting for the rest of the stream.
async fn drain_with_line_guard(
    reader: &mut (dyn AsyncRead + Send + Unpin),
    out: &mut Vec<u8>,
    abort: &AbortSignal,
) -> bool {
    let mut chunk = [0u8; DRAIN_CHUNK_BYTES];
    let mut current_line_len = 0usize;
    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => return false,
            Ok(n) => n,
        };
        out.extend_from_slice(&chunk[..n]);
        for &b in &chunk[..n] {
            if b == b'\n' {
                current_line_len = 0;
            } else {
                current_line_len += 1;
                if current_line_len > TMPFILE_MAX_LINE_BYTES {
                    abort.cancel();
                    return true;
                }
            }
        }
    }
}

async fn run_tmpfile(mut stream: ExecStream, abort: AbortSignal) -> Result<ToolOutcome> {
    let mut stdout_buf = Vec::new();
    let mut stderr_buf = Vec::new();

    // Both streams are scanned concurrently so a corrupt line on either one
    // kills the process without waiting on the other to finish.
    let (stdout_corrupt, stderr_corrupt) = tokio::join!(
        drain_with_line_guard(stream.stdout.as_mut(), &mut stdout_buf, &abort),
        drain_with_line_guard(stream.stderr.as_mut(), &mut stderr_buf, &abort),
    );
    let killed_for_corrupt_line = stdout_corrupt || stderr_corrupt;

    let mut combined = stdout_buf;
    combined.extend_from_slice(&stderr_buf);
    let text = String::from_utf8_lossy(&combined).into_owned();

    let exit_code = stream.exit_code.await.unwrap_or(-1);
    let total_lines = text.lines().count();
    let total_bytes = text.len();

    let overflow_reason = if killed_for_corrupt_line {
        Some("a single output line exceeded 1 KiB (treated as corrupt input)".to_string())
    } else if total_lines > TMPFILE_MAX_LINES {
        Some(format!(
            "Line count exceeded: {total_lines} lines (limit {TMPFILE_MAX_LINES})"
        ))
    } else if total_bytes > TMPFILE_MAX_DISPLAY_BYTES {
        Some(format!(
            "Byte count exceeded: {total_bytes} bytes (limit {TMPFILE_MAX_DISPLAY_BYTES})"
        ))
    } else {
        None
    };

    let Some(reason) = overflow_reason else {
        return Ok(ToolOutcome::ok(json!({
            "output": text,
            "exitCode": exit_code,
        })));
    };

    let tmp_path = std::env::temp_dir().join(format!("mux-bash-overflow-{}.log", uuid::Uuid::new_v4()));
    tokio::fs::write(&tmp_path, &text).await?;

    Ok(ToolOutcome::err(format!(
        "{reason}; full output saved to {}",
        tmp_path.display()
    )))
}
