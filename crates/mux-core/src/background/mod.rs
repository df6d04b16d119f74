//! Spawns detached shell processes, tails unified output, serializes
//! incremental reads, handles termination (spec.md §4.3).

use crate::error::{MuxErr, Result};
use crate::paths::background_process_dir;
use crate::runtime::{AbortSignal, ExecOptions, Runtime};
use chrono::Utc;
use dashmap::DashMap;
use mux_protocol::{BackgroundProcessRecord, ProcessStatus, WorkspaceId};
use regex::Regex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{Mutex, Notify};

const TERMINATE_GRACE: Duration = Duration::from_millis(500);
const SYNTHETIC_SIGNAL_BASE: i32 = 128;
const POLL_WARNING_THRESHOLD: u32 = 3;

struct ProcessEntry {
    record: Mutex<BackgroundProcessRecord>,
    output_path: PathBuf,
    meta_path: PathBuf,
    cursor: Mutex<u64>,
    read_lock: Mutex<()>,
    exited: Arc<Notify>,
    poll_count: AtomicU32,
    pgid: i32,
}

pub struct SpawnResult {
    pub process_id: String,
    pub output_dir: PathBuf,
}

#[derive(Debug, Default)]
pub struct GetOutputRequest {
    pub filter: Option<String>,
    pub filter_exclude: bool,
    pub timeout_secs: Option<u64>,
    /// Cancels a blocked read (spec.md §5: background reads listen for
    /// abort to cancel blocked stream readers).
    pub abort: AbortSignal,
}

#[derive(Debug)]
pub struct GetOutputResponse {
    pub output: String,
    pub status: ProcessStatus,
    pub exit_code: Option<i32>,
    pub note: Option<String>,
}

pub struct BackgroundProcessManager {
    runtime: Arc<dyn Runtime>,
    tmp_dir: PathBuf,
    processes: DashMap<String, Arc<ProcessEntry>>,
}

impl BackgroundProcessManager {
    pub fn new(runtime: Arc<dyn Runtime>, tmp_dir: PathBuf) -> Self {
        Self {
            runtime,
            tmp_dir,
            processes: DashMap::new(),
        }
    }

    pub async fn spawn(
        &self,
        workspace: &WorkspaceId,
        script: &str,
        cwd: Option<PathBuf>,
        env: std::collections::HashMap<String, String>,
        display_name: Option<String>,
    ) -> Result<SpawnResult> {
        if script.trim().is_empty() {
            return Err(MuxErr::Validation("empty script".to_string()));
        }

        let opts = ExecOptions {
            cwd,
            env,
            timeout: None,
            niceness: None,
        };
        let (spawned, mut child) = self.runtime.spawn_background(script, opts).await?;

        let output_dir = background_process_dir(&self.tmp_dir, workspace, spawned.pid);
        tokio::fs::create_dir_all(&output_dir).await?;
        let output_path = output_dir.join("output.log");
        let meta_path = output_dir.join("meta.json");

        let id = display_name.clone().unwrap_or_else(|| spawned.pid.to_string());
        if self.processes.contains_key(&id) {
            return Err(MuxErr::Validation(format!(
                "background process id {id} already exists"
            )));
        }

        let record = BackgroundProcessRecord {
            id: id.clone(),
            pid: spawned.pid,
            workspace_id: workspace.clone(),
            output_dir: output_dir.display().to_string(),
            script: script.to_string(),
            start_time: Utc::now(),
            status: ProcessStatus::Running,
            exit_code: None,
            exit_time: None,
            display_name,
        };
        write_meta(&meta_path, &record).await?;

        let entry = Arc::new(ProcessEntry {
            record: Mutex::new(record),
            output_path: output_path.clone(),
            meta_path: meta_path.clone(),
            cursor: Mutex::new(0),
            read_lock: Mutex::new(()),
            exited: Arc::new(Notify::new()),
            poll_count: AtomicU32::new(0),
            pgid: spawned.pgid,
        });
        self.processes.insert(id.clone(), entry.clone());

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let out_file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&output_path)
            .await?;
        let out_file = Arc::new(Mutex::new(out_file));

        if let Some(mut stdout) = stdout {
            let out_file = out_file.clone();
            tokio::spawn(async move {
                tail_stream(&mut stdout, out_file).await;
            });
        }
        if let Some(mut stderr) = stderr {
            let out_file = out_file.clone();
            tokio::spawn(async move {
                tail_stream(&mut stderr, out_file).await;
            });
        }

        let entry_for_wait = entry.clone();
        let output_dir_for_exit = output_dir.clone();
        tokio::spawn(async move {
            let status = child.wait().await;
            let exit_code = status.ok().and_then(|s| s.code()).unwrap_or(-1);
            let mut record = entry_for_wait.record.lock().await;
            if !matches!(
                record.status,
                ProcessStatus::Killed
            ) {
                record.status = if exit_code == 0 {
                    ProcessStatus::Exited
                } else {
                    ProcessStatus::Failed
                };
            }
            record.exit_code = Some(exit_code);
            record.exit_time = Some(Utc::now());
            let _ = tokio::fs::write(
                output_dir_for_exit.join("exit_code"),
                exit_code.to_string(),
            )
            .await;
            let _ = write_meta(&entry_for_wait.meta_path, &record).await;
            drop(record);
            entry_for_wait.exited.notify_waiters();
        });

        Ok(SpawnResult {
            process_id: id,
            output_dir,
        })
    }

    pub async fn get_process(&self, id: &str) -> Option<BackgroundProcessRecord> {
        let entry = self.processes.get(id)?.clone();
        Some(entry.record.lock().await.clone())
    }

    pub async fn list(&self, workspace: Option<&WorkspaceId>) -> Vec<BackgroundProcessRecord> {
        let mut out = Vec::new();
        for entry in self.processes.iter() {
            let record = entry.value().record.lock().await.clone();
            if workspace.map(|w| *w == record.workspace_id).unwrap_or(true) {
                out.push(record);
            }
        }
        out
    }

    /// Side-effect-free read from a given byte offset; never advances the
    /// cursor `get_output` uses.
    pub async fn peek_output(&self, id: &str, from_offset: u64) -> Result<String> {
        let Some(entry) = self.processes.get(id).map(|e| e.clone()) else {
            return Err(MuxErr::NotFound(format!("no background process {id}")));
        };
        read_from(&entry.output_path, from_offset).await
    }

    /// The non-trivial operation. Reads are serialized by `read_lock` so
    /// two concurrent calls cannot return overlapping ranges. Blocks up to
    /// `timeout_secs` for new non-excluded content, process exit, or abort.
    pub async fn get_output(
        &self,
        id: &str,
        req: GetOutputRequest,
    ) -> Result<GetOutputResponse> {
        if req.filter_exclude && req.filter.is_none() {
            return Err(MuxErr::Validation(
                "filter_exclude requires filter".to_string(),
            ));
        }
        let Some(entry) = self.processes.get(id).map(|e| e.clone()) else {
            return Err(MuxErr::NotFound(format!("no background process {id}")));
        };
        let _serialize = entry.read_lock.lock().await;

        let regex = req
            .filter
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| MuxErr::Validation(format!("invalid filter regex: {e}")))?;

        let deadline = req
            .timeout_secs
            .filter(|s| *s > 0)
            .map(|s| tokio::time::Instant::now() + Duration::from_secs(s));

        let poll_count = entry.poll_count.fetch_add(1, Ordering::SeqCst) + 1;

        loop {
            let offset = *entry.cursor.lock().await;
            let raw = read_from(&entry.output_path, offset).await?;
            let record = entry.record.lock().await.clone();
            let exited = !matches!(record.status, ProcessStatus::Running);

            let (kept, consumed_len, had_partial) =
                filter_lines(&raw, regex.as_ref(), req.filter_exclude, exited);

            if !kept.is_empty() || exited {
                *entry.cursor.lock().await = offset + consumed_len as u64;
                let note = polling_note(poll_count, req.filter_exclude, !kept.is_empty());
                return Ok(GetOutputResponse {
                    output: kept,
                    status: record.status,
                    exit_code: record.exit_code,
                    note,
                });
            }
            let _ = had_partial;

            if req.abort.is_cancelled() {
                return Ok(GetOutputResponse {
                    output: String::new(),
                    status: record.status,
                    exit_code: record.exit_code,
                    note: None,
                });
            }

            match deadline {
                None => {
                    return Ok(GetOutputResponse {
                        output: String::new(),
                        status: record.status,
                        exit_code: record.exit_code,
                        note: None,
                    });
                }
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
                    if remaining.is_zero() {
                        return Ok(GetOutputResponse {
                            output: String::new(),
                            status: record.status,
                            exit_code: record.exit_code,
                            note: None,
                        });
                    }
                    tokio::select! {
                        _ = entry.exited.notified() => {}
                        _ = req.abort.cancelled() => {}
                        _ = tokio::time::sleep(Duration::from_millis(200).min(remaining)) => {}
                    }
                }
            }
        }
    }

    /// Idempotent: sends the termination signal to the process-group
    /// leader; escalates to a forced kill if it doesn't exit within a grace
    /// window.
    pub async fn terminate(&self, id: &str) -> Result<BackgroundProcessRecord> {
        let Some(entry) = self.processes.get(id).map(|e| e.clone()) else {
            return Err(MuxErr::NotFound(format!("no background process {id}")));
        };
        {
            let record = entry.record.lock().await;
            if !matches!(record.status, ProcessStatus::Running) {
                return Ok(record.clone());
            }
        }

        send_signal(entry.pgid, nix::sys::signal::Signal::SIGTERM);
        tokio::select! {
            _ = entry.exited.notified() => {}
            _ = tokio::time::sleep(TERMINATE_GRACE) => {
                send_signal(entry.pgid, nix::sys::signal::Signal::SIGKILL);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }

        let mut record = entry.record.lock().await;
        if matches!(record.status, ProcessStatus::Running) {
            record.status = ProcessStatus::Killed;
            record.exit_code = Some(SYNTHETIC_SIGNAL_BASE + nix::sys::signal::Signal::SIGKILL as i32);
            record.exit_time = Some(Utc::now());
        } else if record.status != ProcessStatus::Killed {
            record.status = ProcessStatus::Killed;
        }
        let _ = write_meta(&entry.meta_path, &record).await;
        Ok(record.clone())
    }

    pub async fn terminate_all(&self) {
        let ids: Vec<String> = self.processes.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            let _ = self.terminate(&id).await;
        }
    }

    pub async fn cleanup(&self, workspace: &WorkspaceId) {
        let candidates: Vec<(String, Arc<ProcessEntry>)> = self
            .processes
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        for (id, entry) in candidates {
            if entry.record.lock().await.workspace_id == *workspace {
                let _ = self.terminate(&id).await;
                self.processes.remove(&id);
            }
        }
    }
}

async fn tail_stream(
    stream: &mut (impl tokio::io::AsyncRead + Unpin),
    out_file: Arc<Mutex<tokio::fs::File>>,
) {
    let mut buf = [0u8; 8192];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let mut file = out_file.lock().await;
                if file.write_all(&buf[..n]).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn read_from(path: &std::path::Path, offset: u64) -> Result<String> {
    use tokio::io::{AsyncSeekExt, AsyncReadExt as _};
    let mut file = match tokio::fs::File::open(path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(String::new()),
        Err(e) => return Err(MuxErr::Io(e)),
    };
    file.seek(std::io::SeekFrom::Start(offset)).await?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).await?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Splits `raw` into complete lines, applies the filter, and reports how
/// many bytes were consumed (so the cursor only advances past complete
/// lines, except on process exit where any trailing partial line is
/// flushed).
fn filter_lines(
    raw: &str,
    regex: Option<&Regex>,
    filter_exclude: bool,
    process_exited: bool,
) -> (String, usize, bool) {
    let mut consumed = 0usize;
    let mut lines = Vec::new();
    let mut had_partial = false;

    let mut rest = raw;
    loop {
        if let Some(idx) = rest.find('\n') {
            let line = &rest[..idx];
            consumed += idx + 1;
            lines.push(line.to_string());
            rest = &rest[idx + 1..];
        } else if !rest.is_empty() {
            had_partial = true;
            if process_exited {
                consumed += rest.len();
                lines.push(rest.to_string());
            }
            break;
        } else {
            break;
        }
    }

    let kept: Vec<String> = lines
        .into_iter()
        .filter(|line| match regex {
            None => true,
            Some(re) => re.is_match(line) != filter_exclude,
        })
        .collect();

    (kept.join("\n"), consumed, had_partial)
}

fn polling_note(poll_count: u32, filter_exclude: bool, got_content: bool) -> Option<String> {
    if got_content || poll_count < POLL_WARNING_THRESHOLD {
        return None;
    }
    if filter_exclude {
        Some(
            "repeated getOutput calls with filterExclude against a still-running process; \
             consider a longer timeout_secs instead of polling"
                .to_string(),
        )
    } else {
        Some(
            "repeated getOutput calls against a still-running process with no filter; \
             consider a longer timeout_secs instead of polling"
                .to_string(),
        )
    }
}

fn send_signal(pgid: i32, signal: nix::sys::signal::Signal) {
    let _ = nix::sys::signal::killpg(nix::unistd::Pid::from_raw(pgid), signal);
}

async fn write_meta(path: &std::path::Path, record: &BackgroundProcessRecord) -> Result<()> {
    let json = serde_json::to_vec_pretty(record)?;
    tokio::fs::write(path, json).await?;
    Ok(())
}
