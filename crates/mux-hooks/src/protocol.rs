use crate::context::HookInvocationContext;
use crate::types::{HookConfig, HookPhase};
use std::collections::HashMap;
use std::path::PathBuf;

/// The environment a hook process is launched with. Additional `env`
/// provided by the caller is merged in last, so caller values shadow these
/// defaults (per spec.md §6).
pub fn build_env(
    ctx: &HookInvocationContext,
    config: &HookConfig,
    phase: HookPhase,
    spill_dir: &std::path::Path,
    caller_env: &HashMap<String, String>,
) -> std::io::Result<(HashMap<String, String>, Option<PathBuf>)> {
    let mut env = HashMap::new();
    env.insert("MUX_TOOL".to_string(), ctx.tool_name.clone());
    env.insert(
        "MUX_WORKSPACE_ID".to_string(),
        ctx.workspace_id.to_string(),
    );
    env.insert(
        "MUX_PROJECT_DIR".to_string(),
        ctx.project_dir.display().to_string(),
    );
    env.insert(
        "MUX_EXEC".to_string(),
        phase.env_exec_value().to_string(),
    );

    let input_str = serde_json::to_string(&ctx.tool_input).unwrap_or_default();
    let spilled = if input_str.len() > config.inline_input_byte_cap {
        let path = spill_dir.join(format!("mux-tool-input-{}.json", uuid_like()));
        std::fs::write(&path, &input_str)?;
        env.insert(
            "MUX_TOOL_INPUT".to_string(),
            "__MUX_TOOL_INPUT_FILE__".to_string(),
        );
        env.insert(
            "MUX_TOOL_INPUT_PATH".to_string(),
            path.display().to_string(),
        );
        Some(path)
    } else {
        env.insert("MUX_TOOL_INPUT".to_string(), input_str);
        None
    };

    for (k, v) in caller_env {
        env.insert(k.clone(), v.clone());
    }

    Ok((env, spilled))
}

/// Writes the tool result for the hook to consume, spilling to
/// `MUX_TOOL_RESULT_PATH` when large, matching the input-side policy.
pub fn build_result_payload(
    result: &serde_json::Value,
    inline_byte_cap: usize,
    spill_dir: &std::path::Path,
) -> std::io::Result<(HashMap<String, String>, Option<PathBuf>)> {
    let mut env = HashMap::new();
    let result_str = serde_json::to_string(result).unwrap_or_default();
    let spilled = if result_str.len() > inline_byte_cap {
        let path = spill_dir.join(format!("mux-tool-result-{}.json", uuid_like()));
        std::fs::write(&path, &result_str)?;
        env.insert(
            "MUX_TOOL_RESULT".to_string(),
            "__MUX_TOOL_RESULT_FILE__".to_string(),
        );
        env.insert(
            "MUX_TOOL_RESULT_PATH".to_string(),
            path.display().to_string(),
        );
        Some(path)
    } else {
        env.insert("MUX_TOOL_RESULT".to_string(), result_str);
        None
    };
    Ok((env, spilled))
}

// Avoids pulling the `uuid` crate into this small protocol module purely for
// temp-file disambiguation; collisions are harmless since callers hold the
// workspace lock around spill-directory writes.
fn uuid_like() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("{nanos:x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use mux_protocol::WorkspaceId;

    #[test]
    fn small_input_stays_inline() {
        let ctx = HookInvocationContext::new(
            WorkspaceId::new("w1"),
            PathBuf::from("/proj"),
            "bash",
            serde_json::json!({"script": "echo hi"}),
        );
        let config = HookConfig {
            inline_input_byte_cap: 8192,
            ..Default::default()
        };
        let dir = tempfile::tempdir().expect("tempdir");
        let (env, spilled) =
            build_env(&ctx, &config, HookPhase::Pre, dir.path(), &HashMap::new())
                .expect("build_env");
        assert!(spilled.is_none());
        assert_eq!(env.get("MUX_TOOL").map(String::as_str), Some("bash"));
        assert!(env.get("MUX_TOOL_INPUT").unwrap().contains("echo hi"));
    }

    #[test]
    fn large_input_is_spilled_and_bounded() {
        let ctx = HookInvocationContext::new(
            WorkspaceId::new("w1"),
            PathBuf::from("/proj"),
            "bash",
            serde_json::json!({"script": "x".repeat(1000)}),
        );
        let config = HookConfig {
            inline_input_byte_cap: 16,
            ..Default::default()
        };
        let dir = tempfile::tempdir().expect("tempdir");
        let (env, spilled) =
            build_env(&ctx, &config, HookPhase::Pre, dir.path(), &HashMap::new())
                .expect("build_env");
        assert!(spilled.is_some());
        assert_eq!(
            env.get("MUX_TOOL_INPUT").map(String::as_str),
            Some("__MUX_TOOL_INPUT_FILE__")
        );
        assert!(env.get("MUX_TOOL_INPUT_PATH").is_some());
    }

    #[test]
    fn caller_env_shadows_defaults() {
        let ctx = HookInvocationContext::new(
            WorkspaceId::new("w1"),
            PathBuf::from("/proj"),
            "bash",
            serde_json::json!({}),
        );
        let config = HookConfig::default();
        let dir = tempfile::tempdir().expect("tempdir");
        let mut caller_env = HashMap::new();
        caller_env.insert("MUX_TOOL".to_string(), "overridden".to_string());
        let (env, _) = build_env(&ctx, &config, HookPhase::Pre, dir.path(), &caller_env)
            .expect("build_env");
        assert_eq!(env.get("MUX_TOOL").map(String::as_str), Some("overridden"));
    }
}
