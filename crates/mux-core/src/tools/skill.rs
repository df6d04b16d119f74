//! `agent_skill_read` / `_write` / `_list` / `_delete` (spec.md §4.6).
//! Symlink containment against the real mux home, case-canonicalized
//! `SKILL.md`, and front-matter `name:` injection.

use crate::error::{MuxErr, Result};
use crate::paths::MuxHome;
use crate::tools::ToolOutcome;
use serde_json::json;
use std::path::{Path, PathBuf};

/// Gate for write-capable skill tools: only set when the caller is the
/// dedicated help-chat workspace.
pub const WRITE_GATE_ENV: &str = "MUX_HELP_CHAT_WORKSPACE_ID";

fn canonical_real(path: &Path) -> std::io::Result<PathBuf> {
    std::fs::canonicalize(path)
}

/// Resolves `<skills_dir>/<name>/<sub_path>` refusing any escape through a
/// symlinked intermediate segment, per spec.md's containment rule. Every
/// prefix of the path is checked against the real mux home.
fn resolve_contained_skill_file_path(
    mux_home: &MuxHome,
    name: &str,
    sub_path: &str,
) -> Result<PathBuf> {
    let home_real = canonical_real(&mux_home.0)
        .map_err(|e| MuxErr::Validation(format!("mux home not resolvable: {e}")))?;

    let skills_root = mux_home.skills_dir();
    if let Ok(meta) = std::fs::symlink_metadata(&skills_root) {
        if meta.file_type().is_symlink() {
            return Err(MuxErr::Validation("skills root must not be a symlink".to_string()));
        }
    }

    let skill_dir = mux_home.skill_dir(name);
    if let Ok(meta) = std::fs::symlink_metadata(&skill_dir) {
        if meta.file_type().is_symlink() {
            return Err(MuxErr::Validation(format!("skill directory {name} must not be a symlink")));
        }
    }

    let candidate = skill_dir.join(sub_path);
    // Check every intermediate segment that currently exists; a symlink
    // swapped into a subdirectory is rejected the moment it resolves
    // outside the real mux home.
    let mut probe = mux_home.0.clone();
    for segment in candidate
        .strip_prefix(&mux_home.0)
        .unwrap_or(&candidate)
        .components()
    {
        probe.push(segment);
        if let Ok(real) = canonical_real(&probe) {
            if !real.starts_with(&home_real) {
                return Err(MuxErr::Validation(format!(
                    "path escapes mux home via a symlinked segment: {}",
                    probe.display()
                )));
            }
        }
    }

    Ok(candidate)
}

/// `skill.md`, `Skill.md`, `SKILL.MD`, ... all canonicalize to `SKILL.md`.
fn canonical_skill_md_name(dir: &Path) -> Result<Option<PathBuf>> {
    let Ok(mut entries) = std::fs::read_dir(dir) else {
        return Ok(None);
    };
    while let Some(entry) = entries.next().transpose().map_err(MuxErr::Io)? {
        let file_name = entry.file_name();
        if file_name.to_string_lossy().eq_ignore_ascii_case("skill.md") {
            return Ok(Some(entry.path()));
        }
    }
    Ok(None)
}

fn inject_front_matter_name(content: &str, name: &str) -> String {
    if let Some(rest) = content.strip_prefix("---\n") {
        if let Some(end) = rest.find("\n---") {
            let front = &rest[..end];
            let mut doc: serde_yaml::Value = serde_yaml::from_str(front).unwrap_or(serde_yaml::Value::Null);
            let needs_injection = match &doc {
                serde_yaml::Value::Mapping(m) => {
                    m.get(serde_yaml::Value::String("name".to_string()))
                        .and_then(|v| v.as_str())
                        != Some(name)
                }
                _ => true,
            };
            if needs_injection {
                if let serde_yaml::Value::Mapping(ref mut m) = doc {
                    m.insert(
                        serde_yaml::Value::String("name".to_string()),
                        serde_yaml::Value::String(name.to_string()),
                    );
                } else {
                    let mut m = serde_yaml::Mapping::new();
                    m.insert(
                        serde_yaml::Value::String("name".to_string()),
                        serde_yaml::Value::String(name.to_string()),
                    );
                    doc = serde_yaml::Value::Mapping(m);
                }
                let new_front = serde_yaml::to_string(&doc).unwrap_or_default();
                let body = &rest[end + 4..];
                return format!("---\n{new_front}---{body}");
            }
            return content.to_string();
        }
    }
    format!("---\nname: {name}\n---\n{content}")
}

pub async fn read_skill(mux_home: &MuxHome, name: &str) -> Result<ToolOutcome> {
    let dir = resolve_contained_skill_file_path(mux_home, name, "")?;
    let Some(md_path) = canonical_skill_md_name(&dir)? else {
        return Ok(ToolOutcome::err(format!("no SKILL.md found for skill {name}")));
    };
    let content = tokio::fs::read_to_string(&md_path).await?;
    Ok(ToolOutcome::ok(json!({ "content": content })))
}

pub async fn write_skill(
    mux_home: &MuxHome,
    name: &str,
    content: &str,
    write_gate_present: bool,
) -> Result<ToolOutcome> {
    if !write_gate_present {
        return Ok(ToolOutcome::err(format!(
            "skill writes require {WRITE_GATE_ENV} to be set"
        )));
    }
    let dir = resolve_contained_skill_file_path(mux_home, name, "")?;
    tokio::fs::create_dir_all(&dir).await?;

    let target = match canonical_skill_md_name(&dir)? {
        Some(existing) => existing,
        None => dir.join("SKILL.md"),
    };
    if let Ok(meta) = tokio::fs::symlink_metadata(&target).await {
        if meta.file_type().is_symlink() {
            return Ok(ToolOutcome::err("refusing to write through an existing symlink"));
        }
    }

    let injected = inject_front_matter_name(content, name);
    tokio::fs::write(&target, injected).await?;
    Ok(ToolOutcome::ok(json!({ "path": target.display().to_string() })))
}

pub async fn delete_skill(
    mux_home: &MuxHome,
    name: &str,
    write_gate_present: bool,
) -> Result<ToolOutcome> {
    if !write_gate_present {
        return Ok(ToolOutcome::err(format!(
            "skill writes require {WRITE_GATE_ENV} to be set"
        )));
    }
    let dir = resolve_contained_skill_file_path(mux_home, name, "")?;
    match tokio::fs::remove_dir_all(&dir).await {
        Ok(()) => Ok(ToolOutcome::ok(json!({ "deleted": name }))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Ok(ToolOutcome::err(format!("no such skill: {name}")))
        }
        Err(e) => Err(MuxErr::Io(e)),
    }
}

pub async fn list_skills(mux_home: &MuxHome) -> Result<ToolOutcome> {
    let root = mux_home.skills_dir();
    let mut names = Vec::new();
    if let Ok(mut entries) = tokio::fs::read_dir(&root).await {
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
    }
    names.sort();
    Ok(ToolOutcome::ok(json!({ "skills": names })))
}
