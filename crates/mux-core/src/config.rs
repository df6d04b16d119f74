//! Minimal typed configuration (SPEC_FULL.md §1 expansion). Config loading
//! itself is out of scope per spec.md's non-goals — no discovery, no
//! profile layering — but the shape is a typed struct merged from a TOML
//! file and environment overrides rather than scattered constants, the way
//! `codex-common`'s `cli` feature treats `ConfigOverrides`.

use crate::error::{MuxErr, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Process-wide defaults: where state lives, and knobs that don't vary
/// per workspace.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub mux_home: PathBuf,
    pub exec_niceness: Option<i32>,
    pub tmpfile_overflow_dir: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            mux_home: default_mux_home(),
            exec_niceness: None,
            tmpfile_overflow_dir: None,
        }
    }
}

fn default_mux_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mux")
}

/// Per-workspace overrides layered on top of [`RuntimeConfig`].
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct SessionConfig {
    pub exec_subagent_hard_restart_experiment: bool,
    pub startup_auto_retry_check_timeout_secs: u64,
    pub background_get_output_default_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            exec_subagent_hard_restart_experiment: false,
            startup_auto_retry_check_timeout_secs: 30,
            background_get_output_default_timeout_secs: 10,
        }
    }
}

impl SessionConfig {
    pub fn startup_auto_retry_check_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_auto_retry_check_timeout_secs)
    }
}

/// Loads `RuntimeConfig` from a TOML file, falling back to defaults if the
/// file is absent; `MUX_HOME` overrides `mux_home` when set, matching the
/// teacher's env-override-beats-file precedence.
pub fn load_runtime_config(path: &Path) -> Result<RuntimeConfig> {
    let mut config = match std::fs::read_to_string(path) {
        Ok(contents) => toml::from_str(&contents)
            .map_err(|e| MuxErr::Validation(format!("invalid config at {}: {e}", path.display())))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => RuntimeConfig::default(),
        Err(e) => return Err(MuxErr::Io(e)),
    };

    if let Ok(home) = std::env::var("MUX_HOME") {
        config.mux_home = PathBuf::from(home);
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let config = load_runtime_config(Path::new("/nonexistent/mux.toml")).expect("load");
        assert_eq!(config.exec_niceness, None);
    }

    #[test]
    fn env_override_beats_the_file_default() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("mux.toml");
        std::fs::write(&path, "mux_home = \"/from/file\"\n").expect("write");

        std::env::set_var("MUX_HOME", "/from/env");
        let config = load_runtime_config(&path).expect("load");
        std::env::remove_var("MUX_HOME");

        assert_eq!(config.mux_home, PathBuf::from("/from/env"));
    }

    #[test]
    fn session_config_defaults_match_spec_timings() {
        let config = SessionConfig::default();
        assert_eq!(config.startup_auto_retry_check_timeout(), Duration::from_secs(30));
    }
}
