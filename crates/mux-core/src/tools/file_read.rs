//! `file_read` (spec.md §4.6). 1-based `offset`/`limit`, `<lineNumber>\t
//! <content>` formatting, per-line and whole-output caps.

use crate::runtime::Runtime;
use crate::tools::ToolOutcome;
use serde_json::json;
use std::path::Path;

pub const MAX_LINE_BYTES: usize = 1024;
pub const MAX_OUTPUT_BYTES: usize = 16 * 1024;
pub const MAX_OUTPUT_LINES: usize = 1000;

pub struct FileReadRequest {
    pub path: String,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

pub async fn run_file_read(
    runtime: &dyn Runtime,
    base: &Path,
    req: FileReadRequest,
) -> ToolOutcome {
    let target = runtime.normalize_path(&req.path, base);

    let stat = match runtime.stat(&target).await {
        Ok(s) => s,
        Err(_) => {
            return ToolOutcome::err(format!(
                "ENOENT: no such file or directory, open '{}'",
                target.display()
            ));
        }
    };
    if stat.is_dir {
        return ToolOutcome::err(format!("EISDIR: illegal operation on a directory, read '{}'", target.display()));
    }

    let bytes = match runtime.read_file(&target).await {
        Ok(b) => b,
        Err(e) => return ToolOutcome::err(e.to_string()),
    };
    let content = String::from_utf8_lossy(&bytes);
    let all_lines: Vec<&str> = content.lines().collect();

    let start = req.offset.unwrap_or(1).max(1) - 1;
    let end = match req.limit {
        Some(limit) => (start + limit).min(all_lines.len()),
        None => all_lines.len(),
    };
    let slice = if start < all_lines.len() {
        &all_lines[start..end.max(start)]
    } else {
        &[]
    };

    let mut rendered = String::new();
    let mut emitted_lines = 0usize;
    for (idx, line) in slice.iter().enumerate() {
        let line_number = start + idx + 1;
        let truncated = if line.len() > MAX_LINE_BYTES {
            format!("{}... [truncated]", &line[..MAX_LINE_BYTES])
        } else {
            line.to_string()
        };
        rendered.push_str(&format!("{line_number}\t{truncated}\n"));
        emitted_lines += 1;
        if emitted_lines >= MAX_OUTPUT_LINES || rendered.len() >= MAX_OUTPUT_BYTES {
            break;
        }
    }
    if rendered.len() > MAX_OUTPUT_BYTES {
        rendered.truncate(MAX_OUTPUT_BYTES);
    }

    ToolOutcome::ok(json!({
        "output": rendered,
        "totalLines": all_lines.len(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::LocalRuntime;

    #[tokio::test]
    async fn missing_file_reports_enoent_without_raising() {
        let rt = LocalRuntime;
        let dir = tempfile::tempdir().expect("tempdir");
        let outcome = run_file_read(
            &rt,
            dir.path(),
            FileReadRequest {
                path: "missing.txt".to_string(),
                offset: None,
                limit: None,
            },
        )
        .await;
        match outcome {
            ToolOutcome::Failure { error, .. } => assert!(error.contains("ENOENT")),
            ToolOutcome::Success(_) => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn formats_lines_with_one_based_numbers() {
        let rt = LocalRuntime;
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("f.txt");
        tokio::fs::write(&path, "a\nb\nc\n").await.expect("write");
        let outcome = run_file_read(
            &rt,
            dir.path(),
            FileReadRequest {
                path: "f.txt".to_string(),
                offset: Some(2),
                limit: Some(1),
            },
        )
        .await;
        let ToolOutcome::Success(value) = outcome else {
            panic!("expected success");
        };
        assert_eq!(value["output"], "2\tb\n");
    }
}
