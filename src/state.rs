//! Workspace State Store (C2).
//!
//! `WorkspaceState` is the durable per-workspace record. All mutation goes
//! through pure, value-in/value-out transitions; persistence is a separate,
//! explicit, atomic write (write-to-temp + rename) so a crash mid-write can
//! never leave a truncated `state.json` (spec §4.2, §9).

use crate::error::WilliamError;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::prd::ParsedPrd;

/// Whether a story currently passes, has been skipped, or is still open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Passes {
    Bool(bool),
    Skipped(SkippedMarker),
}

/// Serde helper so `"skipped"` round-trips as a string literal rather than
/// a bool, matching the `state.json` schema in spec §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkippedMarker {
    #[serde(rename = "skipped")]
    Skipped,
}

impl Passes {
    pub fn is_open(&self) -> bool {
        matches!(self, Passes::Bool(false))
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_open()
    }

    pub fn skipped() -> Self {
        Passes::Skipped(SkippedMarker::Skipped)
    }
}

/// Per-story state entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryState {
    pub passes: Passes,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_attempt: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

impl StoryState {
    fn new() -> Self {
        Self {
            passes: Passes::Bool(false),
            attempts: 0,
            completed_at: None,
            last_attempt: None,
            skip_reason: None,
        }
    }
}

/// One completed revision of a revision workspace (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionEntry {
    pub number: u32,
    pub completed_at: DateTime<Utc>,
    pub item_count: u32,
    pub path: PathBuf,
}

/// The durable per-workspace record (`state.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceState {
    pub workspace: String,
    pub project: String,
    pub target_dir: PathBuf,
    pub branch_name: String,
    pub source_file: PathBuf,
    /// Insertion-ordered map, preserving PRD order (a `BTreeMap` would
    /// reorder by key; `serde_json` serializes an `IndexMap` as a plain
    /// object, matching the `state.json` schema in spec §6).
    pub stories: IndexMap<String, StoryState>,
    pub current_story: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worktree_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_workspace: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub revisions: Vec<RevisionEntry>,
}

/// Workspace metadata supplied at `initFromPrd` time (everything the parsed
/// PRD itself doesn't carry).
pub struct WorkspaceMeta {
    pub workspace: String,
    pub project: String,
    pub target_dir: PathBuf,
    pub branch_name: String,
    pub source_file: PathBuf,
}

impl WorkspaceState {
    /// `initFromPrd`: seed `stories` with `{passes: false, attempts: 0}` for
    /// every parsed story (in PRD order), and recompute `currentStory`.
    pub fn init_from_prd(parsed: &ParsedPrd, meta: WorkspaceMeta) -> Self {
        let stories = parsed
            .stories
            .iter()
            .map(|s| (s.id.clone(), StoryState::new()))
            .collect::<IndexMap<_, _>>();

        let mut state = Self {
            workspace: meta.workspace,
            project: meta.project,
            target_dir: meta.target_dir,
            branch_name: meta.branch_name,
            source_file: meta.source_file,
            stories,
            current_story: None,
            started_at: Utc::now(),
            worktree_path: None,
            parent_workspace: None,
            revision_number: None,
            revisions: Vec::new(),
        };
        state.recompute_current_story();
        state
    }

    /// `getCurrentStory`: first story id whose `passes === false`, in PRD
    /// order, or `None` if every story is terminal.
    pub fn compute_current_story(&self) -> Option<String> {
        self.stories
            .iter()
            .find(|(_, st)| st.passes.is_open())
            .map(|(id, _)| id.clone())
    }


    fn recompute_current_story(&mut self) {
        self.current_story = self.compute_current_story();
    }

    /// `markComplete`: sets `passes = true`, stamps `completedAt`. Does
    /// *not* reset `attempts`. Recomputes `currentStory`.
    pub fn mark_complete(&mut self, id: &str) {
        if let Some(st) = self.stories.get_mut(id) {
            st.passes = Passes::Bool(true);
            st.completed_at = Some(Utc::now());
        }
        self.recompute_current_story();
    }

    /// `markSkipped`: sets `passes = "skipped"`, stamps `completedAt` and
    /// `skipReason`. Recomputes `currentStory`.
    pub fn mark_skipped(&mut self, id: &str, reason: impl Into<String>) {
        if let Some(st) = self.stories.get_mut(id) {
            st.passes = Passes::skipped();
            st.completed_at = Some(Utc::now());
            st.skip_reason = Some(reason.into());
        }
        self.recompute_current_story();
    }

    /// `incrementAttempts`: `attempts += 1`, stamps `lastAttempt`.
    pub fn increment_attempts(&mut self, id: &str) {
        if let Some(st) = self.stories.get_mut(id) {
            st.attempts += 1;
            st.last_attempt = Some(Utc::now());
        }
    }

    pub fn story(&self, id: &str) -> Option<&StoryState> {
        self.stories.get(id)
    }

    pub fn stories_passed(&self) -> usize {
        self.stories
            .iter()
            .filter(|(_, s)| matches!(s.passes, Passes::Bool(true)))
            .count()
    }

    pub fn stories_skipped(&self) -> usize {
        self.stories
            .iter()
            .filter(|(_, s)| matches!(s.passes, Passes::Skipped(_)))
            .count()
    }

    pub fn is_complete(&self) -> bool {
        self.current_story.is_none()
    }

    /// Load `state.json` from `path`. Failure is fatal for the caller's
    /// workspace (spec §4.2, §7).
    pub fn load(path: &Path) -> Result<Self, WilliamError> {
        let content = std::fs::read_to_string(path).map_err(|source| WilliamError::StateLoad {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| WilliamError::StateParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Persist `state.json` atomically: write to a sibling temp file, then
    /// rename over the destination.
    pub fn save(&self, path: &Path) -> Result<(), WilliamError> {
        let pretty = serde_json::to_string_pretty(self).map_err(|source| WilliamError::StateParse {
            path: path.to_path_buf(),
            source,
        })?;

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir).map_err(|source| WilliamError::StateSave {
            path: path.to_path_buf(),
            source,
        })?;

        let tmp_path = dir.join(format!(
            ".{}.tmp",
            path.file_name().and_then(|s| s.to_str()).unwrap_or("state.json")
        ));
        std::fs::write(&tmp_path, pretty).map_err(|source| WilliamError::StateSave {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::rename(&tmp_path, path).map_err(|source| WilliamError::StateSave {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prd::parse;

    fn sample_parsed() -> ParsedPrd {
        parse(
            "# T\n\n## User Stories\n\n### US-001: A\n\n**Description:**\nfoo\n\n**Acceptance Criteria:**\n- x\n\n### US-002: B\n\n**Description:**\nbar\n\n**Acceptance Criteria:**\n- y\n",
        )
    }

    fn meta() -> WorkspaceMeta {
        WorkspaceMeta {
            workspace: "demo".into(),
            project: "proj".into(),
            target_dir: PathBuf::from("/tmp/proj"),
            branch_name: "feature/demo".into(),
            source_file: PathBuf::from("/tmp/proj/prd.md"),
        }
    }

    #[test]
    fn init_sets_first_story_current_and_zeroed_entries() {
        let parsed = sample_parsed();
        let state = WorkspaceState::init_from_prd(&parsed, meta());
        assert_eq!(state.stories.len(), 2);
        assert_eq!(state.current_story, Some("US-001".to_string()));
        for (_, st) in &state.stories {
            assert!(matches!(st.passes, Passes::Bool(false)));
            assert_eq!(st.attempts, 0);
        }
    }

    #[test]
    fn mark_complete_advances_current_story_and_keeps_attempts() {
        let parsed = sample_parsed();
        let mut state = WorkspaceState::init_from_prd(&parsed, meta());
        state.increment_attempts("US-001");
        state.increment_attempts("US-001");
        state.mark_complete("US-001");

        let st = state.story("US-001").unwrap();
        assert!(matches!(st.passes, Passes::Bool(true)));
        assert_eq!(st.attempts, 2);
        assert!(st.completed_at.is_some());
        assert_eq!(state.current_story, Some("US-002".to_string()));
    }

    #[test]
    fn mark_skipped_sets_reason_and_advances() {
        let parsed = sample_parsed();
        let mut state = WorkspaceState::init_from_prd(&parsed, meta());
        state.mark_skipped("US-001", "too many attempts");

        let st = state.story("US-001").unwrap();
        assert!(matches!(st.passes, Passes::Skipped(_)));
        assert_eq!(st.skip_reason.as_deref(), Some("too many attempts"));
        assert_eq!(state.current_story, Some("US-002".to_string()));
    }

    #[test]
    fn all_terminal_means_complete() {
        let parsed = sample_parsed();
        let mut state = WorkspaceState::init_from_prd(&parsed, meta());
        state.mark_complete("US-001");
        state.mark_skipped("US-002", "n/a");
        assert!(state.is_complete());
        assert_eq!(state.current_story, None);
    }

    #[test]
    fn save_then_load_roundtrips_and_is_atomic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let parsed = sample_parsed();
        let mut state = WorkspaceState::init_from_prd(&parsed, meta());
        state.increment_attempts("US-001");
        state.save(&path).unwrap();

        assert!(path.exists());
        // no leftover temp file
        assert!(!dir.path().join(".state.json.tmp").exists());

        let loaded = WorkspaceState::load(&path).unwrap();
        assert_eq!(loaded.stories.len(), 2);
        assert_eq!(loaded.story("US-001").unwrap().attempts, 1);
    }

    #[test]
    fn serializes_with_camel_case_keys_matching_the_on_disk_schema() {
        let parsed = sample_parsed();
        let mut state = WorkspaceState::init_from_prd(&parsed, meta());
        state.mark_skipped("US-002", "n/a");

        let raw = serde_json::to_string(&state).unwrap();
        for key in [
            "\"targetDir\"",
            "\"branchName\"",
            "\"sourceFile\"",
            "\"currentStory\"",
            "\"startedAt\"",
        ] {
            assert!(raw.contains(key), "missing {key} in {raw}");
        }
        for key in ["\"target_dir\"", "\"current_story\"", "\"started_at\""] {
            assert!(!raw.contains(key), "unexpected snake_case {key} in {raw}");
        }

        let story_raw = serde_json::to_string(state.story("US-002").unwrap()).unwrap();
        assert!(story_raw.contains("\"skipReason\""));
        assert!(story_raw.contains("\"completedAt\""));
        assert!(!story_raw.contains("skip_reason"));
    }

    #[test]
    fn load_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.json");
        assert!(WorkspaceState::load(&path).is_err());
    }

    #[test]
    fn unknown_story_ids_are_no_ops() {
        let parsed = sample_parsed();
        let mut state = WorkspaceState::init_from_prd(&parsed, meta());
        state.mark_complete("US-999");
        assert_eq!(state.current_story, Some("US-001".to_string()));
    }

    #[test]
    fn empty_prd_has_no_current_story() {
        let parsed: ParsedPrd = parse("# Empty\n");
        assert!(parsed.stories.is_empty());
        let state = WorkspaceState::init_from_prd(&parsed, meta());
        assert_eq!(state.current_story, None);
        assert!(state.is_complete());
    }
}
