//! `code_execution` (spec.md §4.6, expansion). A restricted execution
//! bridge: the "script" argument runs through the same `Runtime::exec` path
//! as `bash`, capped and reported like a truncate-policy bash call, but
//! modeled behind a `ToolBridge` trait rather than folded into `bash`
//! because future bridges may dispatch to something other than a shell.

use crate::error::Result;
use crate::runtime::{AbortSignal, ExecOptions, Runtime};
use crate::tools::bash::TRUNCATE_MAX_BYTES;
use crate::tools::ToolOutcome;
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::io::AsyncReadExt;

pub struct CodeExecutionRequest {
    pub script: String,
    pub cwd: PathBuf,
    pub env: HashMap<String, String>,
    pub timeout_secs: Option<u64>,
}

#[async_trait]
pub trait ToolBridge: Send + Sync {
    async fn execute(&self, req: CodeExecutionRequest) -> Result<ToolOutcome>;
}

pub struct ShellToolBridge {
    runtime: std::sync::Arc<dyn Runtime>,
}

impl ShellToolBridge {
    pub fn new(runtime: std::sync::Arc<dyn Runtime>) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl ToolBridge for ShellToolBridge {
    async fn execute(&self, req: CodeExecutionRequest) -> Result<ToolOutcome> {
        if req.script.trim().is_empty() {
            return Ok(ToolOutcome::err("script must not be empty"));
        }

        let opts = ExecOptions {
            cwd: Some(req.cwd),
            env: req.env,
            timeout: req.timeout_secs.map(std::time::Duration::from_secs),
            niceness: None,
        };
        let mut stream = self.runtime.exec(&req.script, opts, AbortSignal::new()).await?;

        let mut stdout_buf = Vec::new();
        let mut stderr_buf = Vec::new();
        let (a, b) = tokio::join!(
            stream.stdout.read_to_end(&mut stdout_buf),
            stream.stderr.read_to_end(&mut stderr_buf),
        );
        let _ = a;
        let _ = b;
        let exit_code = stream.exit_code.await.unwrap_or(-1);

        stdout_buf.extend_from_slice(&stderr_buf);
        let text = String::from_utf8_lossy(&stdout_buf);

        if stdout_buf.len() > TRUNCATE_MAX_BYTES {
            let truncated: String = text.chars().take(TRUNCATE_MAX_BYTES).collect();
            return Ok(ToolOutcome::ok(json!({
                "output": truncated,
                "exitCode": exit_code,
                "truncated": { "reason": "byte limit exceeded" },
            })));
        }

        Ok(ToolOutcome::ok(json!({
            "output": text,
            "exitCode": exit_code,
        })))
    }
}
