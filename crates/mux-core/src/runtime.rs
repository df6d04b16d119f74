//! Capability over `{ exec, stat, readFile, writeFile, spawnBackground,
//! normalizePath, resolvePath, tempDir }`, abstracting local vs. remote
//! execution. The `exec` contract (concurrent stdout/stderr draining via
//! paired reader tasks, a `tokio::select!` race against timeout/abort) is
//! grounded on `cocode-rs/exec/shell/src/executor.rs`'s `execute_backgroundable`,
//! stripped of sandboxing, which is out of scope per spec.md §1.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::oneshot;
#[cfg(unix)]
use std::os::unix::process::CommandExt;

use crate::error::{MuxErr, Result};

/// Reserved sentinel exit codes signaling non-process outcomes.
pub const EXIT_CODE_TIMEOUT: i32 = 124;
pub const EXIT_CODE_ABORTED: i32 = 130;

#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
    pub timeout: Option<Duration>,
    /// `setpriority(PRIO_PROCESS, ...)` value applied to the child before
    /// `exec`, on unix only. `None` leaves the inherited niceness untouched.
    pub niceness: Option<i32>,
}

/// A running child process's streams. Stdout/stderr MUST be drained
/// concurrently with awaiting `exit_code` — sequential reads deadlock on
/// stderr backpressure the moment a command writes enough to fill its pipe
/// buffer.
pub struct ExecStream {
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    pub stderr: Box<dyn AsyncRead + Send + Unpin>,
    pub exit_code: oneshot::Receiver<i32>,
}

#[derive(Debug, Clone)]
pub struct SpawnedBackground {
    pub pid: u32,
    /// Equal to `pid` on unix: `spawnBackground` detaches into its own
    /// process group so a single signal to the leader kills the tree.
    pub pgid: i32,
}

#[async_trait]
pub trait Runtime: Send + Sync {
    async fn exec(&self, script: &str, opts: ExecOptions, abort: AbortSignal) -> Result<ExecStream>;

    async fn stat(&self, path: &Path) -> Result<FileStat>;

    async fn read_file(&self, path: &Path) -> Result<Vec<u8>>;

    async fn write_file(&self, path: &Path, contents: &[u8]) -> Result<()>;

    async fn spawn_background(
        &self,
        script: &str,
        opts: ExecOptions,
    ) -> Result<(SpawnedBackground, tokio::process::Child)>;

    /// Resolves `p` relative to `base` using *this runtime's* path
    /// semantics, not the host's — an SSH runtime targeting a POSIX box
    /// must use POSIX rules even when the host driving it is Windows.
    fn normalize_path(&self, p: &str, base: &Path) -> PathBuf;

    fn resolve_path(&self, p: &Path) -> Result<PathBuf>;

    fn temp_dir(&self) -> PathBuf;
}

#[derive(Debug, Clone, Copy)]
pub struct FileStat {
    pub size: u64,
    pub is_dir: bool,
    pub is_symlink: bool,
}

/// A cooperative abort signal; cheap to clone, checked at suspension
/// points.
#[derive(Clone, Debug)]
pub struct AbortSignal(tokio_util::sync::CancellationToken);

impl AbortSignal {
    pub fn new() -> Self {
        Self(tokio_util::sync::CancellationToken::new())
    }

    pub fn child(&self) -> Self {
        Self(self.0.child_token())
    }

    pub fn cancel(&self) {
        self.0.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.0.cancelled().await
    }
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// The only runtime shipped in this crate: local process execution.
/// Remote runtimes (worktree/ssh/devcontainer) are named by
/// `mux_protocol::RuntimeKind` but treated as external collaborators, per
/// spec.md §1's non-goals.
pub struct LocalRuntime;

impl Default for LocalRuntime {
    fn default() -> Self {
        Self
    }
}

#[async_trait]
impl Runtime for LocalRuntime {
    async fn exec(
        &self,
        script: &str,
        opts: ExecOptions,
        abort: AbortSignal,
    ) -> Result<ExecStream> {
        let mut command = Command::new("/bin/sh");
        command.arg("-c").arg(script);
        if let Some(cwd) = &opts.cwd {
            command.current_dir(cwd);
        }
        command.envs(&opts.env);
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        #[cfg(unix)]
        {
            let niceness = opts.niceness;
            unsafe {
                command.pre_exec(move || {
                    libc::setpgid(0, 0);
                    apply_niceness(niceness)
                });
            }
        }

        let mut child = command
            .spawn()
            .map_err(|e| MuxErr::RuntimeStartFailed(e.to_string()))?;

        let stdout = child.stdout.take().ok_or_else(|| {
            MuxErr::RuntimeStartFailed("child stdout not captured".to_string())
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            MuxErr::RuntimeStartFailed("child stderr not captured".to_string())
        })?;

        let (tx, rx) = oneshot::channel();
        let timeout = opts.timeout;
        tokio::spawn(async move {
            let wait = child.wait();
            let code = if let Some(timeout) = timeout {
                tokio::select! {
                    status = wait => status.ok().and_then(|s| s.code()).unwrap_or(-1),
                    _ = tokio::time::sleep(timeout) => {
                        let _ = child.start_kill();
                        EXIT_CODE_TIMEOUT
                    }
                    _ = abort.cancelled() => {
                        let _ = child.start_kill();
                        EXIT_CODE_ABORTED
                    }
                }
            } else {
                tokio::select! {
                    status = wait => status.ok().and_then(|s| s.code()).unwrap_or(-1),
                    _ = abort.cancelled() => {
                        let _ = child.start_kill();
                        EXIT_CODE_ABORTED
                    }
                }
            };
            let _ = tx.send(code);
        });

        Ok(ExecStream {
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
            exit_code: rx,
        })
    }

    async fn stat(&self, path: &Path) -> Result<FileStat> {
        let meta = tokio::fs::symlink_metadata(path).await?;
        let is_symlink = meta.file_type().is_symlink();
        let meta = if is_symlink {
            tokio::fs::metadata(path).await.unwrap_or(meta)
        } else {
            meta
        };
        Ok(FileStat {
            size: meta.len(),
            is_dir: meta.is_dir(),
            is_symlink,
        })
    }

    async fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(path).await?)
    }

    async fn write_file(&self, path: &Path, contents: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("mux-tmp");
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn spawn_background(
        &self,
        script: &str,
        opts: ExecOptions,
    ) -> Result<(SpawnedBackground, tokio::process::Child)> {
        let mut command = Command::new("/bin/sh");
        command.arg("-c").arg(script);
        if let Some(cwd) = &opts.cwd {
            command.current_dir(cwd);
        }
        command.envs(&opts.env);
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        #[cfg(unix)]
        {
            let niceness = opts.niceness;
            unsafe {
                // New session + new process group: the leader's PID equals
                // the PGID, so signaling the leader reaches the whole tree.
                command.pre_exec(move || {
                    libc::setsid();
                    apply_niceness(niceness)
                });
            }
        }

        let child = command
            .spawn()
            .map_err(|e| MuxErr::RuntimeStartFailed(e.to_string()))?;
        let pid = child
            .id()
            .ok_or_else(|| MuxErr::RuntimeStartFailed("no pid for spawned child".to_string()))?;
        Ok((
            SpawnedBackground {
                pid,
                pgid: pid as i32,
            },
            child,
        ))
    }

    fn normalize_path(&self, p: &str, base: &Path) -> PathBuf {
        let candidate = Path::new(p);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            base.join(candidate)
        }
    }

    fn resolve_path(&self, p: &Path) -> Result<PathBuf> {
        Ok(dunce_canonicalize(p).unwrap_or_else(|| p.to_path_buf()))
    }

    fn temp_dir(&self) -> PathBuf {
        std::env::temp_dir()
    }
}

fn dunce_canonicalize(p: &Path) -> Option<PathBuf> {
    std::fs::canonicalize(p).ok()
}

/// Run from the child's `pre_exec`, after `fork` but before `exec`: sets the
/// process's own niceness via `setpriority(PRIO_PROCESS, 0, ...)`. A no-op
/// when `niceness` is `None`.
#[cfg(unix)]
fn apply_niceness(niceness: Option<i32>) -> std::io::Result<()> {
    if let Some(n) = niceness {
        // SAFETY: async-signal-safe libc call made from pre_exec, per its
        // contract (no allocation, no locking).
        let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, n) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn exec_reports_exit_code_and_output() {
        let rt = LocalRuntime;
        let mut stream = rt
            .exec("echo hello", ExecOptions::default(), AbortSignal::new())
            .await
            .expect("exec");
        let mut out = String::new();
        stream.stdout.read_to_string(&mut out).await.expect("read stdout");
        let code = stream.exit_code.await.expect("exit code");
        assert_eq!(code, 0);
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn exec_times_out_with_sentinel_code() {
        let rt = LocalRuntime;
        let mut stream = rt
            .exec(
                "sleep 2",
                ExecOptions {
                    timeout: Some(Duration::from_millis(50)),
                    ..Default::default()
                },
                AbortSignal::new(),
            )
            .await
            .expect("exec");
        let code = stream.exit_code.await.expect("exit code");
        assert_eq!(code, EXIT_CODE_TIMEOUT);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn exec_applies_requested_niceness_to_the_child() {
        let rt = LocalRuntime;
        let mut stream = rt
            .exec(
                "cat /proc/self/stat",
                ExecOptions {
                    niceness: Some(10),
                    ..Default::default()
                },
                AbortSignal::new(),
            )
            .await
            .expect("exec");
        let mut out = String::new();
        stream.stdout.read_to_string(&mut out).await.expect("read stdout");
        // Field 19 of /proc/[pid]/stat is the process's niceness.
        let nice: i32 = out
            .rsplit(')')
            .next()
            .expect("stat has a comm field")
            .split_whitespace()
            .nth(16)
            .expect("stat has a niceness field")
            .parse()
            .expect("niceness is an integer");
        assert_eq!(nice, 10);
    }

    #[tokio::test]
    async fn exec_aborts_with_sentinel_code() {
        let rt = LocalRuntime;
        let abort = AbortSignal::new();
        let mut stream = rt
            .exec("sleep 2", ExecOptions::default(), abort.clone())
            .await
            .expect("exec");
        abort.cancel();
        let code = stream.exit_code.await.expect("exit code");
        assert_eq!(code, EXIT_CODE_ABORTED);
    }

    #[test]
    fn normalize_path_joins_relative_against_base() {
        let rt = LocalRuntime;
        let base = Path::new("/workspace/project");
        assert_eq!(
            rt.normalize_path("src/main.rs", base),
            PathBuf::from("/workspace/project/src/main.rs")
        );
        assert_eq!(
            rt.normalize_path("/etc/passwd", base),
            PathBuf::from("/etc/passwd")
        );
    }
}
