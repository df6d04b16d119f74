use crate::context::HookInvocationContext;
use crate::error::HookError;
use crate::protocol::{build_env, build_result_payload};
use crate::types::{HookConfig, HookPhase};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::{timeout, Instant};

/// What happened when a hook ran. `Allowed` for the coroutine variant keeps
/// the spawned process alive in `pending` so `finish` can later hand it the
/// tool result; the dedicated one-shot `tool_pre`/`tool_post` hooks never
/// populate `pending`.
pub enum HookOutcome {
    Allowed { pending: Option<PendingHook> },
    Blocked { reason: String },
}

pub struct PendingHook {
    child: Child,
    spilled_input: Option<PathBuf>,
}

pub struct HookExecutor {
    config: HookConfig,
}

impl HookExecutor {
    pub fn new(config: HookConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HookConfig {
        &self.config
    }

    /// Runs the pre-call gate: the dedicated `tool_pre` one-shot hook if
    /// configured, otherwise the coroutine `tool_hook` (left running,
    /// waiting for its readiness line). Returns `Allowed` with no pending
    /// process when no hook is configured at all.
    pub async fn run_pre(
        &self,
        ctx: &HookInvocationContext,
        spill_dir: &std::path::Path,
        caller_env: &HashMap<String, String>,
    ) -> Result<HookOutcome, HookError> {
        if let Some(pre) = &self.config.pre_hook {
            return self
                .run_one_shot(
                    pre,
                    ctx,
                    spill_dir,
                    caller_env,
                    self.config.pre_hook_timeout,
                    HookPhase::Pre,
                )
                .await
                .map_err(|e| match e {
                    HookError::Spawn(_) | HookError::Io(_) => e,
                    other => other,
                });
        }

        let Some(hook_path) = &self.config.coroutine_hook else {
            return Ok(HookOutcome::Allowed { pending: None });
        };

        let (env, spilled) = build_env(ctx, &self.config, HookPhase::Pre, spill_dir, caller_env)
            .map_err(HookError::Io)?;

        let mut child = Command::new(hook_path)
            .current_dir(&ctx.project_dir)
            .envs(&env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(HookError::Spawn)?;

        let ready_token = HookPhase::Pre.env_exec_value().to_string();
        let stdout = child.stdout.take().ok_or(HookError::NoReadySignal)?;
        let mut lines = BufReader::new(stdout).lines();

        let deadline = self.config.pre_hook_timeout;
        let warn_at = self.config.slow_hook_warning_threshold;
        let start = Instant::now();
        let wait_ready = async {
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if line.trim() == ready_token => return Ok(()),
                    Ok(Some(_)) => continue,
                    Ok(None) => return Err(HookError::NoReadySignal),
                    Err(e) => return Err(HookError::Io(e)),
                }
            }
        };

        match timeout(deadline, wait_ready).await {
            Ok(Ok(())) => {
                if start.elapsed() > warn_at {
                    tracing::warn!(hook = %hook_path.display(), elapsed = ?start.elapsed(), "slow pre-tool hook");
                }
                Ok(HookOutcome::Allowed {
                    pending: Some(PendingHook {
                        child,
                        spilled_input: spilled,
                    }),
                })
            }
            Ok(Err(e)) => {
                let _ = child.kill().await;
                Err(e)
            }
            Err(_) => {
                let _ = child.kill().await;
                Err(HookError::TimeoutPre(deadline))
            }
        }
    }

    /// Completes a coroutine hook by handing it the tool result, or runs
    /// the dedicated `tool_post` one-shot gate. Non-blocking: a post-hook
    /// failure is logged, never surfaced as a turn error, matching
    /// `trigger_post_tool_use`'s non-blocking contract in the teacher.
    pub async fn run_post(
        &self,
        ctx: &HookInvocationContext,
        pending: Option<PendingHook>,
        tool_result: &serde_json::Value,
        spill_dir: &std::path::Path,
        caller_env: &HashMap<String, String>,
    ) -> Result<(), HookError> {
        if let Some(post) = &self.config.post_hook {
            if let Err(e) = self
                .run_one_shot(
                    post,
                    ctx,
                    spill_dir,
                    caller_env,
                    self.config.post_hook_timeout,
                    HookPhase::Post,
                )
                .await
            {
                tracing::warn!(error = %e, "post-tool hook failed (non-blocking)");
            }
        }

        let Some(mut pending) = pending else {
            return Ok(());
        };

        let (result_env, spilled_result) =
            build_result_payload(tool_result, self.config.inline_input_byte_cap, spill_dir)
                .map_err(HookError::Io)?;
        let payload = result_env
            .get("MUX_TOOL_RESULT")
            .cloned()
            .unwrap_or_default();

        if let Some(mut stdin) = pending.child.stdin.take() {
            let _ = stdin.write_all(payload.as_bytes()).await;
            let _ = stdin.write_all(b"\n").await;
            drop(stdin);
        }

        let wait = timeout(self.config.post_hook_timeout, pending.child.wait()).await;
        match wait {
            Ok(Ok(_status)) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "hook process wait failed (non-blocking)"),
            Err(_) => {
                tracing::warn!("post-tool hook timed out waiting for exit (non-blocking)");
                let _ = pending.child.kill().await;
            }
        }

        cleanup(&pending.spilled_input);
        cleanup(&spilled_result);
        Ok(())
    }

    async fn run_one_shot(
        &self,
        path: &std::path::Path,
        ctx: &HookInvocationContext,
        spill_dir: &std::path::Path,
        caller_env: &HashMap<String, String>,
        hook_timeout: Duration,
        phase: HookPhase,
    ) -> Result<HookOutcome, HookError> {
        let (env, spilled) = build_env(ctx, &self.config, phase, spill_dir, caller_env)
            .map_err(HookError::Io)?;
        let mut child = Command::new(path)
            .current_dir(&ctx.project_dir)
            .envs(&env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(HookError::Spawn)?;

        let result = timeout(hook_timeout, child.wait()).await;
        cleanup(&spilled);
        match result {
            Ok(Ok(status)) if status.success() => Ok(HookOutcome::Allowed { pending: None }),
            Ok(Ok(status)) => Ok(HookOutcome::Blocked {
                reason: format!("hook exited with {status}"),
            }),
            Ok(Err(e)) => Err(HookError::Io(e)),
            Err(_) => {
                let _ = child.kill().await;
                Err(HookError::TimeoutPre(hook_timeout))
            }
        }
    }
}

fn cleanup(path: &Option<PathBuf>) {
    if let Some(path) = path {
        let _ = std::fs::remove_file(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mux_protocol::WorkspaceId;
    use std::os::unix::fs::PermissionsExt;

    fn write_executable(dir: &std::path::Path, name: &str, script: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, script).expect("write script");
        let mut perms = std::fs::metadata(&path).expect("metadata").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).expect("chmod");
        path
    }

    #[tokio::test]
    async fn no_hook_configured_is_allowed() {
        let executor = HookExecutor::new(HookConfig::default());
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = HookInvocationContext::new(
            WorkspaceId::new("w1"),
            dir.path().to_path_buf(),
            "bash",
            serde_json::json!({}),
        );
        let outcome = executor
            .run_pre(&ctx, dir.path(), &HashMap::new())
            .await
            .expect("run_pre");
        assert!(matches!(outcome, HookOutcome::Allowed { pending: None }));
    }

    #[tokio::test]
    async fn coroutine_hook_signals_ready_and_reads_result() {
        let dir = tempfile::tempdir().expect("tempdir");
        let script = "#!/bin/sh\necho \"$MUX_EXEC\"\nread line\nexit 0\n";
        let hook_path = write_executable(dir.path(), "tool_hook", script);

        let config = HookConfig {
            coroutine_hook: Some(hook_path),
            pre_hook_timeout: Duration::from_secs(5),
            post_hook_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        let executor = HookExecutor::new(config);
        let ctx = HookInvocationContext::new(
            WorkspaceId::new("w1"),
            dir.path().to_path_buf(),
            "bash",
            serde_json::json!({"script": "echo hi"}),
        );

        let outcome = executor
            .run_pre(&ctx, dir.path(), &HashMap::new())
            .await
            .expect("run_pre");
        let HookOutcome::Allowed { pending } = outcome else {
            panic!("expected allowed outcome");
        };
        assert!(pending.is_some());

        executor
            .run_post(
                &ctx,
                pending,
                &serde_json::json!({"success": true}),
                dir.path(),
                &HashMap::new(),
            )
            .await
            .expect("run_post");
    }

    #[tokio::test]
    async fn pre_hook_timeout_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let script = "#!/bin/sh\nsleep 5\n";
        let hook_path = write_executable(dir.path(), "tool_hook", script);
        let config = HookConfig {
            coroutine_hook: Some(hook_path),
            pre_hook_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let executor = HookExecutor::new(config);
        let ctx = HookInvocationContext::new(
            WorkspaceId::new("w1"),
            dir.path().to_path_buf(),
            "bash",
            serde_json::json!({}),
        );
        let result = executor.run_pre(&ctx, dir.path(), &HashMap::new()).await;
        assert!(matches!(result, Err(HookError::TimeoutPre(_))));
    }
}
