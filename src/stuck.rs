//! Stuck Detector (C7).
//!
//! Runs after every iteration's attempts/completion have already been
//! recorded. Evaluates a fixed escalation ladder — `continue → hint → skip
//! → pause` — and is the sole writer of `.stuck-hint.md` and `.paused`
//! (spec §4.7, §9 "ownership of the hint file").

use crate::error::WilliamError;
use crate::ndjson::StreamSession;
use crate::state::WorkspaceState;
use crate::text::truncate;
use crate::workspace::Workspace;
use serde_json::Value;
use std::collections::HashMap;

const PAUSE_ATTEMPTS: u32 = 7;
const SKIP_ATTEMPTS: u32 = 5;
const HINT_ATTEMPTS: u32 = 3;
const TOOL_LOOP_THRESHOLD: usize = 10;

/// The one action the detector can recommend for this iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StuckAction {
    Continue,
    Hint,
    Skip,
    Pause,
}

/// Evaluate the ladder for `story_id` and apply any side effects (writing
/// `.stuck-hint.md`/`.paused`, or mutating `state` via `markSkipped`) the
/// chosen action implies. Returns the action taken.
pub fn evaluate(
    workspace: &Workspace,
    state: &mut WorkspaceState,
    story_id: &str,
    session: &StreamSession,
) -> Result<StuckAction, WilliamError> {
    let attempts = state.story(story_id).map(|s| s.attempts).unwrap_or(0);
    let hint_present = workspace.stuck_hint_path().exists();

    if hint_present && attempts >= PAUSE_ATTEMPTS {
        workspace.write_paused(&format!(
            "paused after {} attempts on {} with a stuck hint present",
            attempts, story_id
        ))?;
        return Ok(StuckAction::Pause);
    }

    if hint_present && attempts >= SKIP_ATTEMPTS {
        state.mark_skipped(
            story_id,
            format!(
                "Skipped after {} attempts with stuck hint present",
                attempts
            ),
        );
        return Ok(StuckAction::Skip);
    }

    let signals = detect_signals(session);
    if attempts >= HINT_ATTEMPTS || signals.any() {
        write_hint(workspace, story_id, attempts, session, &signals)?;
        return Ok(StuckAction::Hint);
    }

    Ok(StuckAction::Continue)
}

#[derive(Debug, Default)]
struct Signals {
    tool_loop: bool,
    zero_progress: bool,
    high_error_rate: bool,
}

impl Signals {
    fn any(&self) -> bool {
        self.tool_loop || self.zero_progress || self.high_error_rate
    }

    fn reasons(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.tool_loop {
            out.push("tool loop detected (same tool+input repeated)");
        }
        if self.zero_progress {
            out.push("zero progress (tools used but no files written)");
        }
        if self.high_error_rate {
            out.push("high error rate in tool results");
        }
        out
    }
}

fn detect_signals(session: &StreamSession) -> Signals {
    let mut counts: HashMap<(String, String), usize> = HashMap::new();
    for tool_use in &session.tool_uses {
        let key = (
            tool_use.name.clone(),
            serde_json::to_string(&tool_use.input).unwrap_or_default(),
        );
        *counts.entry(key).or_insert(0) += 1;
    }
    let tool_loop = counts.values().any(|&c| c >= TOOL_LOOP_THRESHOLD);

    let zero_progress = !session.tool_uses.is_empty()
        && !session
            .tool_uses
            .iter()
            .any(|t| t.name == "Write" || t.name == "Edit");

    let high_error_rate = !session.tool_results.is_empty() && {
        let errors = session.tool_results.iter().filter(|r| r.is_error).count();
        (errors as f64) / (session.tool_results.len() as f64) > 0.5
    };

    Signals {
        tool_loop,
        zero_progress,
        high_error_rate,
    }
}

fn write_hint(
    workspace: &Workspace,
    story_id: &str,
    attempts: u32,
    session: &StreamSession,
    signals: &Signals,
) -> Result<(), WilliamError> {
    let mut reasons = signals.reasons();
    if attempts >= HINT_ATTEMPTS && reasons.is_empty() {
        reasons.push("attempt threshold reached without a detected signal");
    }

    let mut out = format!("# Stuck Hint for {}\n\n", story_id);
    out.push_str("## Reason\n\n");
    if reasons.is_empty() {
        out.push_str("- (no specific signal; attempts threshold reached)\n");
    } else {
        for reason in &reasons {
            out.push_str(&format!("- {}\n", reason));
        }
    }
    out.push('\n');

    let errors: Vec<String> = session
        .tool_results
        .iter()
        .filter(|r| r.is_error)
        .take(20)
        .map(|r| format!("- [{}] {}", r.tool_use_id, truncate(&r.content, 200)))
        .collect();
    if !errors.is_empty() {
        out.push_str("## Error Results\n\n");
        out.push_str(&errors.join("\n"));
        out.push_str("\n\n");
    }

    let files: Vec<String> = session
        .tool_uses
        .iter()
        .filter(|t| t.name == "Write" || t.name == "Edit")
        .filter_map(|t| path_value(&t.input))
        .take(10)
        .collect();
    if !files.is_empty() {
        out.push_str("## Files Modified\n\n");
        for f in &files {
            out.push_str(&format!("- `{}`\n", f));
        }
        out.push('\n');
    }

    out.push_str("## Session Stats\n\n");
    out.push_str(&format!("- Attempts: {}\n", attempts));
    out.push_str(&format!("- Tool uses: {}\n", session.tool_uses.len()));
    out.push_str(&format!("- Tool results: {}\n", session.tool_results.len()));
    out.push('\n');

    out.push_str("## Suggestion\n\n");
    out.push_str(
        "Re-read the acceptance criteria for this story before continuing. Prefer a smaller, \
         more targeted change over repeating the same approach; if a command keeps failing, \
         inspect its error output directly rather than re-running it unchanged.\n",
    );

    std::fs::write(workspace.stuck_hint_path(), out).map_err(|source| WilliamError::Io {
        path: workspace.stuck_hint_path(),
        source,
    })
}

fn path_value(input: &Value) -> Option<String> {
    input
        .get("file_path")
        .or_else(|| input.get("path"))
        .and_then(Value::as_str)
        .map(str::to_string)
}
