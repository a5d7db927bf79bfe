//! Filesystem tools: read, write, edit, and list.
//!
//! All four share a [`PathGuard`] that expands `~`, canonicalizes, and — when
//! the runtime is configured with `restrict_to_workspace` — refuses anything
//! that resolves outside the workspace.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use aisbot_core::utils::expand_home;

use super::base::{require_string, Tool};

// ─────────────────────────────────────────────
// PathGuard
// ─────────────────────────────────────────────

/// Resolves user-supplied paths, optionally confined to one directory.
#[derive(Clone)]
pub struct PathGuard {
    allowed_dir: Option<PathBuf>,
}

impl PathGuard {
    /// Unconfined guard: paths are expanded and canonicalized only.
    pub fn open() -> Self {
        Self { allowed_dir: None }
    }

    /// Guard confined to `dir`.
    pub fn confined(dir: impl Into<PathBuf>) -> Self {
        Self {
            allowed_dir: Some(dir.into()),
        }
    }

    /// From a config flag: confined to `workspace` when `restrict` is set.
    pub fn from_restriction(workspace: &Path, restrict: bool) -> Self {
        if restrict {
            Self::confined(workspace)
        } else {
            Self::open()
        }
    }

    /// Resolve `raw` to an absolute path, rejecting escapes from the
    /// allowed directory. Non-existent paths resolve through their nearest
    /// existing parent so writes to new files still get checked; `..`
    /// components are normalized away before the containment check.
    pub fn resolve(&self, raw: &str) -> anyhow::Result<PathBuf> {
        let expanded = expand_home(raw);

        let resolved = if expanded.exists() {
            expanded.canonicalize().unwrap_or(expanded)
        } else if let Some(parent) = expanded.parent() {
            let canonical_parent = if parent.as_os_str().is_empty() {
                std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
            } else if parent.exists() {
                parent.canonicalize().unwrap_or_else(|_| parent.to_path_buf())
            } else {
                parent.to_path_buf()
            };
            match expanded.file_name() {
                Some(name) => canonical_parent.join(name),
                None => expanded,
            }
        } else {
            expanded
        };
        let resolved = normalize_components(&resolved);

        if let Some(allowed) = &self.allowed_dir {
            let allowed = if allowed.exists() {
                allowed.canonicalize().unwrap_or_else(|_| allowed.clone())
            } else {
                allowed.clone()
            };
            if !resolved.starts_with(&allowed) {
                anyhow::bail!(
                    "Access denied: '{}' is outside the workspace '{}'",
                    resolved.display(),
                    allowed.display()
                );
            }
        }

        Ok(resolved)
    }
}

/// Lexically drop `.` and resolve `..` components. `starts_with` compares
/// component-wise, so a containment check is only meaningful afterwards.
fn normalize_components(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

// ─────────────────────────────────────────────
// read_file
// ─────────────────────────────────────────────

/// Returns the full text content of a file.
pub struct ReadFileTool {
    guard: PathGuard,
}

impl ReadFileTool {
    pub fn new(guard: PathGuard) -> Arc<Self> {
        Arc::new(Self { guard })
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file at the given path. Returns the full text content."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file to read"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let raw = require_string(&params, "path")?;
        let path = self.guard.resolve(&raw)?;

        if !path.is_file() {
            anyhow::bail!("File not found: {}", path.display());
        }
        std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", path.display()))
    }
}

// ─────────────────────────────────────────────
// write_file
// ─────────────────────────────────────────────

/// Creates or overwrites a file, making parent directories as needed.
pub struct WriteFileTool {
    guard: PathGuard,
}

impl WriteFileTool {
    pub fn new(guard: PathGuard) -> Arc<Self> {
        Arc::new(Self { guard })
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating it (and parent directories) if needed, \
         or overwriting if it exists."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Destination path"
                },
                "content": {
                    "type": "string",
                    "description": "Content to write"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let raw = require_string(&params, "path")?;
        let content = require_string(&params, "content")?;
        let path = self.guard.resolve(&raw)?;

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    anyhow::anyhow!("Failed to create directory {}: {e}", parent.display())
                })?;
            }
        }

        let bytes = content.len();
        std::fs::write(&path, &content)
            .map_err(|e| anyhow::anyhow!("Failed to write {}: {e}", path.display()))?;
        Ok(format!("Wrote {bytes} bytes to {}", path.display()))
    }
}

// ─────────────────────────────────────────────
// edit_file
// ─────────────────────────────────────────────

/// Replaces one occurrence of a text snippet within a file.
pub struct EditFileTool {
    guard: PathGuard,
}

impl EditFileTool {
    pub fn new(guard: PathGuard) -> Arc<Self> {
        Arc::new(Self { guard })
    }
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Edit a file by replacing the first occurrence of old_text with new_text. \
         Include enough surrounding context in old_text to make it unique."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file to edit"
                },
                "old_text": {
                    "type": "string",
                    "description": "Exact text to find"
                },
                "new_text": {
                    "type": "string",
                    "description": "Replacement text"
                }
            },
            "required": ["path", "old_text", "new_text"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let raw = require_string(&params, "path")?;
        let old_text = require_string(&params, "old_text")?;
        let new_text = require_string(&params, "new_text")?;
        let path = self.guard.resolve(&raw)?;

        if !path.is_file() {
            anyhow::bail!("File not found: {}", path.display());
        }
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", path.display()))?;

        let matches = content.matches(&old_text).count();
        if matches == 0 {
            anyhow::bail!("old_text not found in {}", path.display());
        }
        if matches > 1 {
            anyhow::bail!(
                "old_text occurs {matches} times in {}; add more context to make it unique",
                path.display()
            );
        }

        let updated = content.replacen(&old_text, &new_text, 1);
        std::fs::write(&path, updated)
            .map_err(|e| anyhow::anyhow!("Failed to write {}: {e}", path.display()))?;
        Ok(format!("Edited {}", path.display()))
    }
}

// ─────────────────────────────────────────────
// list_dir
// ─────────────────────────────────────────────

/// Lists a directory, folders first.
pub struct ListDirTool {
    guard: PathGuard,
}

impl ListDirTool {
    pub fn new(guard: PathGuard) -> Arc<Self> {
        Arc::new(Self { guard })
    }
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List the entries of a directory. Directories are suffixed with '/'."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory to list"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let raw = require_string(&params, "path")?;
        let path = self.guard.resolve(&raw)?;

        if !path.is_dir() {
            anyhow::bail!("Not a directory: {}", path.display());
        }

        let mut dirs = Vec::new();
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&path)
            .map_err(|e| anyhow::anyhow!("Failed to list {}: {e}", path.display()))?
            .flatten()
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.path().is_dir() {
                dirs.push(format!("{name}/"));
            } else {
                files.push(name);
            }
        }
        dirs.sort();
        files.sort();

        if dirs.is_empty() && files.is_empty() {
            return Ok(format!("{} is empty", path.display()));
        }
        Ok(dirs.into_iter().chain(files).collect::<Vec<_>>().join("\n"))
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
