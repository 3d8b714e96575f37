//! Workspace layout, sentinel files, and name resolution (spec §3, §6).
//!
//! A workspace is a directory tree under `workspaces/<project>/<name>/`.
//! This module only knows paths and presence/absence of sentinel files; it
//! never interprets `state.json` itself (that's [`crate::state`]).

use crate::error::WilliamError;
use chrono::Utc;
use std::path::{Path, PathBuf};

/// Handle to one workspace directory. Cheap to construct; all methods are
/// plain path joins or file-presence checks.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub dir: PathBuf,
}

impl Workspace {
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.join("state.json")
    }

    pub fn progress_path(&self) -> PathBuf {
        self.dir.join("progress.txt")
    }

    pub fn prd_path(&self) -> PathBuf {
        self.dir.join("prd.md")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.dir.join("logs")
    }

    pub fn stopped_path(&self) -> PathBuf {
        self.dir.join(".stopped")
    }

    pub fn paused_path(&self) -> PathBuf {
        self.dir.join(".paused")
    }

    pub fn stuck_hint_path(&self) -> PathBuf {
        self.dir.join(".stuck-hint.md")
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped_path().exists()
    }

    pub fn is_paused(&self) -> bool {
        self.paused_path().exists()
    }

    pub fn stuck_hint(&self) -> Option<String> {
        std::fs::read_to_string(self.stuck_hint_path()).ok()
    }

    /// Write `.stopped` with the current ISO-8601 timestamp (`stop` command).
    pub fn write_stopped(&self) -> Result<(), WilliamError> {
        std::fs::write(self.stopped_path(), Utc::now().to_rfc3339()).map_err(|source| {
            WilliamError::Io {
                path: self.stopped_path(),
                source,
            }
        })
    }

    /// Write `.paused` with a human-readable reason line.
    pub fn write_paused(&self, reason: &str) -> Result<(), WilliamError> {
        let content = format!("{}\n{}\n", Utc::now().to_rfc3339(), reason);
        std::fs::write(self.paused_path(), content).map_err(|source| WilliamError::Io {
            path: self.paused_path(),
            source,
        })
    }

    /// ISO-8601 iteration log path, with `:` and `.` replaced by `-` so the
    /// filename is portable across filesystems (spec §9).
    pub fn iteration_log_path(&self, story_id: &str) -> PathBuf {
        let ts = Utc::now().to_rfc3339().replace([':', '.'], "-");
        self.logs_dir().join(format!("{}-{}.log", ts, story_id))
    }

    /// `revision-N/` subdirectory for a revision workspace (spec §3).
    pub fn revision_dir(&self, number: u32) -> Workspace {
        Workspace::at(self.dir.join(format!("revision-{}", number)))
    }
}

/// Resolve a workspace name against `workspaces/*/<name>/` per spec §6:
/// - a bare name must match exactly one project directory
/// - `project/name` is an exact path
/// - `name/revision-N` or `project/name/revision-N` resolves the revision
///   subdirectory
pub fn resolve(install_root: &Path, spec: &str) -> Result<Workspace, WilliamError> {
    let workspaces_root = install_root.join("workspaces");
    let parts: Vec<&str> = spec.split('/').collect();

    match parts.as_slice() {
        [project, name, rev] if rev.starts_with("revision-") => {
            let base = workspaces_root.join(project).join(name);
            let rev_dir = base.join(rev);
            require_exists(&rev_dir, spec)
        }
        [name, rev] if rev.starts_with("revision-") => {
            let base = find_unique(&workspaces_root, name)?;
            let rev_dir = base.dir.join(rev);
            require_exists(&rev_dir, spec)
        }
        [project, name] => {
            let dir = workspaces_root.join(project).join(name);
            require_exists(&dir, spec)
        }
        [name] => find_unique(&workspaces_root, name),
        _ => Err(WilliamError::WorkspaceNotFound(spec.to_string())),
    }
}

fn require_exists(dir: &Path, spec: &str) -> Result<Workspace, WilliamError> {
    if dir.is_dir() {
        Ok(Workspace::at(dir))
    } else {
        Err(WilliamError::WorkspaceNotFound(spec.to_string()))
    }
}

fn find_unique(workspaces_root: &Path, name: &str) -> Result<Workspace, WilliamError> {
    let mut matches = Vec::new();
    if let Ok(projects) = std::fs::read_dir(workspaces_root) {
        for project in projects.flatten() {
            let candidate = project.path().join(name);
            if candidate.is_dir() {
                matches.push(candidate);
            }
        }
    }

    match matches.len() {
        0 => Err(WilliamError::WorkspaceNotFound(name.to_string())),
        1 => Ok(Workspace::at(matches.remove(0))),
        _ => Err(WilliamError::AmbiguousWorkspace(name.to_string())),
    }
}

/// List every workspace directory under `workspaces/<project>/*`, grouped
/// by project (for the `list`/`status` commands). Revision subdirectories
/// are tagged separately by the caller by checking `revision_number` in
/// state, not discovered here.
pub fn list_all(install_root: &Path) -> Vec<(String, Vec<String>)> {
    let workspaces_root = install_root.join("workspaces");
    let mut out = Vec::new();

    let Ok(projects) = std::fs::read_dir(&workspaces_root) else {
        return out;
    };

    let mut project_dirs: Vec<_> = projects.flatten().collect();
    project_dirs.sort_by_key(|e| e.file_name());

    for project in project_dirs {
        if !project.path().is_dir() {
            continue;
        }
        let project_name = project.file_name().to_string_lossy().to_string();
        let mut names = Vec::new();
        if let Ok(entries) = std::fs::read_dir(project.path()) {
            let mut entries: Vec<_> = entries.flatten().collect();
            entries.sort_by_key(|e| e.file_name());
            for entry in entries {
                if entry.path().is_dir() {
                    names.push(entry.file_name().to_string_lossy().to_string());
                }
            }
        }
        out.push((project_name, names));
    }

    out
}
