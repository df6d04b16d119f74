//! The shared `executeFileEditOperation` pipeline behind every `file_edit_*`
//! tool (spec.md §4.6): resolve, enforce plan-mode containment, read, run
//! the operation, write atomically, and produce a unified diff.

use crate::runtime::Runtime;
use crate::tools::ToolOutcome;
use serde_json::json;
use similar::TextDiff;
use std::path::{Path, PathBuf};

pub struct PlanModeConfig {
    pub plan_file_only: bool,
    pub plan_file_path: PathBuf,
}

/// The caller-supplied transform: takes the current content (empty string
/// if the file doesn't yet exist) and returns the new content, or an error
/// message if the operation doesn't apply (e.g. a find/replace whose target
/// string isn't present).
pub trait EditOperation {
    fn apply(&self, current: &str) -> Result<String, String>;
}

pub struct ReplaceOperation {
    pub new_content: String,
}

impl EditOperation for ReplaceOperation {
    fn apply(&self, _current: &str) -> Result<String, String> {
        Ok(self.new_content.clone())
    }
}

pub struct FindReplaceOperation {
    pub find: String,
    pub replace: String,
}

impl EditOperation for FindReplaceOperation {
    fn apply(&self, current: &str) -> Result<String, String> {
        if !current.contains(&self.find) {
            return Err(format!("string not found: {}", self.find));
        }
        Ok(current.replacen(&self.find, &self.replace, 1))
    }
}

pub async fn execute_file_edit_operation(
    runtime: &dyn Runtime,
    base: &Path,
    path: &str,
    plan: &PlanModeConfig,
    operation: &dyn EditOperation,
) -> ToolOutcome {
    let target = runtime.normalize_path(path, base);

    if plan.plan_file_only {
        if target == plan.plan_file_path && path != plan.plan_file_path.to_string_lossy().as_ref() {
            return ToolOutcome::err(
                "writes are restricted to the exact plan file path configured for this session",
            );
        }
        if target != plan.plan_file_path {
            return ToolOutcome::err("only the plan file can be edited while in plan mode");
        }
    } else if target == plan.plan_file_path {
        return ToolOutcome::err("the plan file is read-only outside the plan agent");
    }

    let current = match runtime.read_file(&target).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(_) => String::new(),
    };

    let new_content = match operation.apply(&current) {
        Ok(c) => c,
        Err(e) => return ToolOutcome::err(e),
    };

    if let Err(e) = runtime.write_file(&target, new_content.as_bytes()).await {
        return ToolOutcome::err(e.to_string());
    }

    let diff = TextDiff::from_lines(&current, &new_content)
        .unified_diff()
        .context_radius(3)
        .header("before", "after")
        .to_string();

    ToolOutcome::ok(json!({
        "path": target.display().to_string(),
        "diff": diff,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::LocalRuntime;

    fn plan_disabled() -> PlanModeConfig {
        PlanModeConfig {
            plan_file_only: false,
            plan_file_path: PathBuf::from("/nonexistent/plan.md"),
        }
    }

    #[tokio::test]
    async fn plan_mode_rejects_writes_outside_plan_file_before_reading() {
        let rt = LocalRuntime;
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("src").join("main.ts");
        let plan = PlanModeConfig {
            plan_file_only: true,
            plan_file_path: dir.path().join("plan.md"),
        };
        let op = ReplaceOperation {
            new_content: "malicious".to_string(),
        };
        let outcome = execute_file_edit_operation(
            &rt,
            dir.path(),
            "src/main.ts",
            &plan,
            &op,
        )
        .await;
        match outcome {
            ToolOutcome::Failure { error, .. } => {
                assert!(error.contains("only the plan file can be edited"))
            }
            ToolOutcome::Success(_) => panic!("expected rejection"),
        }
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn outside_plan_mode_the_plan_file_is_read_only() {
        let rt = LocalRuntime;
        let dir = tempfile::tempdir().expect("tempdir");
        let plan_path = dir.path().join("plan.md");
        tokio::fs::write(&plan_path, "original").await.expect("seed");
        let plan = PlanModeConfig {
            plan_file_only: false,
            plan_file_path: plan_path.clone(),
        };
        let op = ReplaceOperation {
            new_content: "new".to_string(),
        };
        let outcome = execute_file_edit_operation(&rt, dir.path(), "plan.md", &plan, &op).await;
        assert!(!outcome.is_success());
        let contents = tokio::fs::read_to_string(&plan_path).await.expect("read");
        assert_eq!(contents, "original");
    }

    #[tokio::test]
    async fn edit_produces_a_unified_diff() {
        let rt = LocalRuntime;
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("f.txt");
        tokio::fs::write(&path, "line1\n").await.expect("seed");
        let plan = plan_disabled();
        let op = FindReplaceOperation {
            find: "line1".to_string(),
            replace: "line1 edited".to_string(),
        };
        let outcome = execute_file_edit_operation(&rt, dir.path(), "f.txt", &plan, &op).await;
        let ToolOutcome::Success(value) = outcome else {
            panic!("expected success");
        };
        assert!(value["diff"].as_str().unwrap().contains("line1 edited"));
    }
}
