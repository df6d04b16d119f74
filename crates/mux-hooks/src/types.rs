use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    Pre,
    Post,
}

impl HookPhase {
    pub fn env_exec_value(self) -> &'static str {
        match self {
            HookPhase::Pre => "mux-hook-pre-ready",
            HookPhase::Post => "mux-hook-post-ready",
        }
    }
}

/// Resolved hook configuration for a project: the coroutine hook, and/or
/// the dedicated one-shot gates.
#[derive(Debug, Clone, Default)]
pub struct HookConfig {
    /// `<project>/.mux/tool_hook`, co-invoked for every tool call.
    pub coroutine_hook: Option<PathBuf>,
    /// `<project>/.mux/tool_pre`, a one-shot pre-call gate.
    pub pre_hook: Option<PathBuf>,
    /// `<project>/.mux/tool_post`, a one-shot post-call gate.
    pub post_hook: Option<PathBuf>,
    pub pre_hook_timeout: Duration,
    pub post_hook_timeout: Duration,
    /// Logged, not enforced: a hook running longer than this emits a
    /// slow-hook warning while still being allowed to finish.
    pub slow_hook_warning_threshold: Duration,
    /// Tool inputs larger than this are spilled to `MUX_TOOL_INPUT_PATH`
    /// instead of being placed directly in the environment.
    pub inline_input_byte_cap: usize,
}

impl HookConfig {
    pub fn from_project_dir(project_dir: &std::path::Path) -> Self {
        let hooks_dir = project_dir.join(".mux");
        let executable = |name: &str| -> Option<PathBuf> {
            let path = hooks_dir.join(name);
            is_executable(&path).then_some(path)
        };
        Self {
            coroutine_hook: executable("tool_hook"),
            pre_hook: executable("tool_pre"),
            post_hook: executable("tool_post"),
            pre_hook_timeout: Duration::from_secs(10),
            post_hook_timeout: Duration::from_secs(10),
            slow_hook_warning_threshold: Duration::from_secs(3),
            inline_input_byte_cap: 8 * 1024,
        }
    }

    pub fn has_any_hook(&self) -> bool {
        self.coroutine_hook.is_some() || self.pre_hook.is_some() || self.post_hook.is_some()
    }
}

#[cfg(unix)]
fn is_executable(path: &std::path::Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &std::path::Path) -> bool {
    path.is_file()
}
