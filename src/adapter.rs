//! Tool-Adapter Interface (C9).
//!
//! The only polymorphic surface in the core (spec §9): "how to spawn the
//! agent" and "how to interpret its textual result". Modeled as a plain
//! trait rather than a class hierarchy — a concrete adapter wraps one
//! coding-agent CLI binary.

use crate::error::WilliamError;
use std::path::Path;
use tokio::process::Child;

/// The sentinel-scan result of a completed session's accumulated text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterResult {
    pub story_complete: bool,
    pub all_complete: bool,
    pub raw_output: String,
}

const STORY_COMPLETE_SENTINEL: &str = "<promise>STORY_COMPLETE</promise>";
const ALL_COMPLETE_SENTINEL: &str = "<promise>ALL_COMPLETE</promise>";

/// Spawns the agent and interprets its output. `spawn` hands back a live
/// [`Child`] whose stdout/stderr the stream consumer drains; `parse_output`
/// is the substring sentinel scan described in spec C8 step 8.
pub trait ToolAdapter: Send + Sync {
    /// Human-readable adapter name (`claude`, etc.), used for `--tool` and
    /// logging.
    fn name(&self) -> &str;

    /// Spawn the agent with `prompt` delivered on stdin and `cwd` as the
    /// working directory. The child must be configured to emit
    /// newline-delimited JSON on stdout.
    fn spawn(&self, prompt: &str, cwd: &Path) -> Result<Child, WilliamError>;

    /// Scan `raw_text` (a session's accumulated `full_text`) for the
    /// completion sentinels. Substring match, case-sensitive, unguarded by
    /// position (spec §9 Open Questions).
    fn parse_output(&self, raw_text: &str) -> AdapterResult {
        AdapterResult {
            story_complete: raw_text.contains(STORY_COMPLETE_SENTINEL)
                || raw_text.contains(ALL_COMPLETE_SENTINEL),
            all_complete: raw_text.contains(ALL_COMPLETE_SENTINEL),
            raw_output: raw_text.to_string(),
        }
    }
}

/// Adapter for a `claude`-style CLI: spawns `<binary> -p <prompt-flag>` with
/// streaming JSON output enabled, stdin/stdout/stderr piped.
pub struct ClaudeAdapter {
    binary: String,
    extra_args: Vec<String>,
}

impl ClaudeAdapter {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            extra_args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }
}

impl Default for ClaudeAdapter {
    fn default() -> Self {
        Self::new("claude")
    }
}

impl ToolAdapter for ClaudeAdapter {
    fn name(&self) -> &str {
        "claude"
    }

    fn spawn(&self, _prompt: &str, cwd: &Path) -> Result<Child, WilliamError> {
        use std::process::Stdio;

        // The prompt itself is written to stdin by the stream consumer once
        // the child is running, not passed as an argument here (spec §4.9).
        let mut command = tokio::process::Command::new(&self.binary);
        command
            .arg("--output-format")
            .arg("stream-json")
            .args(&self.extra_args)
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        command
            .spawn()
            .map_err(|e| WilliamError::ChildSpawn(e.to_string()))
    }
}
