//! Error taxonomy for the core (spec §7).
//!
//! Recoverable conditions (malformed PRD input, a single broken NDJSON
//! line, stderr noise) never surface as an `Err` here — they are absorbed
//! and reported through the `UiEmitter` instead. The variants below are
//! reserved for conditions that are fatal *for one iteration or one
//! workspace*: state I/O, child-spawn failure, and workspace resolution.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the core library.
#[derive(Debug, Error)]
pub enum WilliamError {
    #[error("workspace state at {path:?} could not be loaded: {source}")]
    StateLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("workspace state at {path:?} is not valid JSON: {source}")]
    StateParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to persist workspace state at {path:?}: {source}")]
    StateSave {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn coding agent: {0}")]
    ChildSpawn(String),

    #[error("no workspace matching {0:?} was found")]
    WorkspaceNotFound(String),

    #[error("workspace name {0:?} matched more than one project; qualify as project/name")]
    AmbiguousWorkspace(String),

    #[error("archive requires a .stopped sentinel in {0:?}")]
    NotStopped(PathBuf),

    #[error("io error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
