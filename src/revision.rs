//! Revision workspace bookkeeping (spec §3).
//!
//! A revision workspace is a `revision-N/` subdirectory of a completed
//! parent, sharing the parent's branch/worktree, used to apply focused
//! fixes. The interactive flow that decides *what* goes into a revision is
//! external (spec §1 Out of scope); this module only computes the
//! directory layout and records completed-revision entries in the
//! parent's state — data-model bookkeeping, not a new workflow engine.

use crate::error::WilliamError;
use crate::state::{RevisionEntry, WorkspaceState};
use crate::workspace::Workspace;
use chrono::Utc;

/// The next unused revision number for `state`, starting at 1.
pub fn next_revision_number(state: &WorkspaceState) -> u32 {
    state
        .revisions
        .iter()
        .map(|r| r.number)
        .max()
        .unwrap_or(0)
        + 1
}

/// Resolve the on-disk revision subworkspace for the next revision number,
/// creating its directory (and `logs/`) if absent.
pub fn prepare_next(parent: &Workspace, parent_state: &WorkspaceState) -> Result<(Workspace, u32), WilliamError> {
    let number = next_revision_number(parent_state);
    let revision = parent.revision_dir(number);
    std::fs::create_dir_all(revision.logs_dir()).map_err(|source| WilliamError::Io {
        path: revision.dir.clone(),
        source,
    })?;
    Ok((revision, number))
}

/// Record that revision `number` (produced at `path`, covering `item_count`
/// stories) has completed, appending an entry to the parent's state.
pub fn record_completed(
    parent_state: &mut WorkspaceState,
    number: u32,
    item_count: u32,
    path: std::path::PathBuf,
) {
    parent_state.revisions.push(RevisionEntry {
        number,
        completed_at: Utc::now(),
        item_count,
        path,
    });
}
