//! Iteration Loop (C8).
//!
//! The per-workspace driver: loads state, builds the prompt, spawns the
//! agent, consumes its stream, updates state, runs stuck detection, emits
//! dashboard frames, and honors stop/pause signals (spec §4.8). This is
//! the largest component and the one everything else in the crate feeds.

use crate::adapter::ToolAdapter;
use crate::chain_context::{self, ChainContext};
use crate::context::{self, ContextInputs};
use crate::emitter::{DashboardFrame, StuckStatus, UiEmitter};
use crate::error::WilliamError;
use crate::prd::{self, ParsedPrd};
use crate::state::WorkspaceState;
use crate::stream_consumer;
use crate::stuck::{self, StuckAction};
use crate::template::{self, AGENT_INSTRUCTION_TEMPLATE};
use crate::workspace::Workspace;
use std::collections::HashMap;

/// Options that shape one `run` invocation (spec §4.8 signature).
pub struct LoopOptions<'a> {
    pub adapter: &'a dyn ToolAdapter,
    pub max_iterations: u32,
    pub sleep_ms: u64,
}

/// Why the loop stopped running, so a caller (the CLI) can decide an exit
/// code without the core ever panicking or throwing for expected
/// operational conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopOutcome {
    AllComplete,
    Stopped,
    Paused,
    MaxIterationsReached,
}

struct Cumulative {
    cost_usd: f64,
    input_tokens: u64,
    output_tokens: u64,
}

/// Run the iteration loop for one workspace until it completes, is
/// stopped/paused, or `max_iterations` is exhausted.
pub async fn run(
    workspace_name: &str,
    workspace: &Workspace,
    options: LoopOptions<'_>,
    emitter: &mut dyn UiEmitter,
) -> Result<LoopOutcome, WilliamError> {
    let mut cumulative = Cumulative {
        cost_usd: 0.0,
        input_tokens: 0,
        output_tokens: 0,
    };
    let mut chain_context_block: Option<String> = None;

    for iteration in 1..=options.max_iterations {
        if workspace.is_stopped() {
            emitter.system(&format!("{}: .stopped present, exiting", workspace_name));
            return Ok(LoopOutcome::Stopped);
        }
        if workspace.is_paused() {
            emitter.system(&format!("{}: .paused present, exiting", workspace_name));
            return Ok(LoopOutcome::Paused);
        }

        let mut state = WorkspaceState::load(&workspace.state_path())?;
        let Some(story_id) = state.current_story.clone() else {
            emitter.system(&format!("{}: all stories complete", workspace_name));
            return Ok(LoopOutcome::AllComplete);
        };

        let raw_prd = std::fs::read_to_string(workspace.prd_path()).map_err(|source| WilliamError::Io {
            path: workspace.prd_path(),
            source,
        })?;
        let parsed = prd::parse(&raw_prd);
        let progress_txt = std::fs::read_to_string(workspace.progress_path()).unwrap_or_default();
        let stuck_hint = workspace.stuck_hint();
        let original_prd = if state.parent_workspace.is_some() {
            std::fs::read_to_string(
                state
                    .parent_workspace
                    .as_ref()
                    .map(|p| p.join("prd.md"))
                    .unwrap_or_default(),
            )
            .ok()
        } else {
            None
        };

        let Some(story) = parsed.stories.iter().find(|s| s.id == story_id) else {
            emitter.error(&format!(
                "story {} not found in re-parsed PRD; stopping",
                story_id
            ));
            return Ok(LoopOutcome::AllComplete);
        };
        let story_title = story.title.clone();

        let context_inputs = ContextInputs {
            raw_prd: &raw_prd,
            state: &state,
            progress_txt: &progress_txt,
            stuck_hint: stuck_hint.as_deref(),
            chain_context_block: chain_context_block.as_deref(),
            original_prd: original_prd.as_deref(),
        };
        let prd_context = context::build(&parsed, &context_inputs);
        let story_status_table = story_status_lines(&parsed, &state);
        let codebase_patterns = crate::progress::extract_codebase_patterns(&progress_txt);
        let recent_learnings = crate::progress::last_dated_entries(&progress_txt, 3).join("\n\n");

        let mut values = HashMap::new();
        values.insert("branch_name".to_string(), state.branch_name.clone());
        values.insert("story_id".to_string(), story_id.clone());
        values.insert("story_title".to_string(), story_title.clone());
        values.insert("prd_context".to_string(), prd_context);
        values.insert("story_status_table".to_string(), story_status_table);
        values.insert("codebase_patterns".to_string(), codebase_patterns);
        values.insert("recent_learnings".to_string(), recent_learnings);
        values.insert(
            "stuck_hint".to_string(),
            stuck_hint.clone().unwrap_or_default(),
        );
        values.insert(
            "chain_context".to_string(),
            chain_context_block.clone().unwrap_or_default(),
        );
        values.insert(
            "progress_path".to_string(),
            workspace.progress_path().display().to_string(),
        );
        let prompt = template::render(AGENT_INSTRUCTION_TEMPLATE, &values);

        emitter.story_start(&story_id, &story_title);
        emitter.dashboard_update(pre_iteration_frame(
            workspace_name,
            &story_id,
            &story_title,
            iteration,
            options.max_iterations,
            &state,
            &cumulative,
            stuck_hint.as_deref(),
        ));

        let child = options
            .adapter
            .spawn(&prompt, &state.target_dir)
            .map_err(|e| {
                emitter.error(&format!("failed to spawn agent: {}", e));
                e
            })?;

        let log_path = workspace.iteration_log_path(&story_id);
        let session = stream_consumer::drain(child, &prompt, &log_path, emitter).await?;

        let result = options.adapter.parse_output(&session.full_text);
        let mut story_completed = false;
        let all_complete = result.all_complete;

        if result.story_complete {
            state.mark_complete(&story_id);
            story_completed = true;
            let _ = std::fs::remove_file(workspace.stuck_hint_path());
            let ctx: ChainContext = chain_context::extract(&session);
            chain_context_block = Some(chain_context::format(&ctx, &story_id));
            emitter.story_complete(&story_id, &story_title);
        } else {
            state.increment_attempts(&story_id);
        }

        state.save(&workspace.state_path())?;

        cumulative.cost_usd += session.total_cost_usd.unwrap_or(0.0);
        cumulative.input_tokens += session.input_tokens.unwrap_or(0);
        cumulative.output_tokens += session.output_tokens.unwrap_or(0);

        emitter.result(
            session.total_cost_usd.unwrap_or(0.0),
            session.input_tokens.unwrap_or(0),
            session.output_tokens.unwrap_or(0),
            session.duration_ms.unwrap_or(0),
        );
        emitter.dashboard_update(post_iteration_frame(
            workspace_name,
            &story_id,
            &story_title,
            iteration,
            options.max_iterations,
            &state,
            &cumulative,
            &session,
            workspace.stuck_hint_path().exists(),
        ));

        if !story_completed {
            let action = stuck::evaluate(workspace, &mut state, &story_id, &session)?;
            match action {
                StuckAction::Pause => {
                    state.save(&workspace.state_path())?;
                    emitter.system(&format!("{}: paused by stuck detector", workspace_name));
                    return Ok(LoopOutcome::Paused);
                }
                StuckAction::Skip => {
                    state.save(&workspace.state_path())?;
                    emitter.story_skipped(&story_id, &story_title);
                }
                StuckAction::Hint => {
                    emitter.system(&format!("{}: wrote a stuck hint for {}", workspace_name, story_id));
                }
                StuckAction::Continue => {}
            }
        }

        if all_complete || state.is_complete() {
            if all_complete && !state.is_complete() {
                emitter.system(&format!(
                    "{}: ALL_COMPLETE sentinel seen with pending stories remaining",
                    workspace_name
                ));
            }
            return Ok(LoopOutcome::AllComplete);
        }

        tokio::time::sleep(std::time::Duration::from_millis(options.sleep_ms)).await;
    }

    emitter.error(&format!(
        "{}: max iterations ({}) reached without completion",
        workspace_name, options.max_iterations
    ));
    Ok(LoopOutcome::MaxIterationsReached)
}

fn story_status_lines(parsed: &ParsedPrd, state: &WorkspaceState) -> String {
    use crate::state::Passes;
    let current = state.current_story.as_deref();
    let mut out = String::new();
    for story in &parsed.stories {
        let symbol = if current == Some(story.id.as_str()) {
            '→'
        } else {
            match state.story(&story.id).map(|s| s.passes) {
                Some(Passes::Bool(true)) => '✓',
                Some(Passes::Skipped(_)) => '⊘',
                _ => '·',
            }
        };
        out.push_str(&format!("{} {} — {}\n", symbol, story.id, story.title));
    }
    out.trim_end().to_string()
}

fn stuck_status(attempts: u32, hint_present: bool) -> StuckStatus {
    if !hint_present {
        StuckStatus::Normal
    } else if attempts >= 4 {
        StuckStatus::ApproachingSkip
    } else {
        StuckStatus::HintWritten
    }
}

#[allow(clippy::too_many_arguments)]
fn pre_iteration_frame(
    workspace_name: &str,
    story_id: &str,
    story_title: &str,
    iteration: u32,
    max_iterations: u32,
    state: &WorkspaceState,
    cumulative: &Cumulative,
    stuck_hint: Option<&str>,
) -> DashboardFrame {
    let attempts = state.story(story_id).map(|s| s.attempts).unwrap_or(0);
    DashboardFrame {
        workspace: workspace_name.to_string(),
        story_id: Some(story_id.to_string()),
        story_title: Some(story_title.to_string()),
        iteration,
        max_iterations,
        stories_passed: state.stories_passed(),
        stories_total: state.stories.len(),
        stories_skipped: state.stories_skipped(),
        cumulative_cost_usd: cumulative.cost_usd,
        cumulative_input_tokens: cumulative.input_tokens,
        cumulative_output_tokens: cumulative.output_tokens,
        current_story_attempts: attempts,
        stuck_status: stuck_status(attempts, stuck_hint.is_some()),
        files_modified: 0,
    }
}

#[allow(clippy::too_many_arguments)]
fn post_iteration_frame(
    workspace_name: &str,
    story_id: &str,
    story_title: &str,
    iteration: u32,
    max_iterations: u32,
    state: &WorkspaceState,
    cumulative: &Cumulative,
    session: &crate::ndjson::StreamSession,
    hint_present: bool,
) -> DashboardFrame {
    let attempts = state.story(story_id).map(|s| s.attempts).unwrap_or(0);
    let mut seen = std::collections::HashSet::new();
    for tool_use in &session.tool_uses {
        if tool_use.name != "Write" && tool_use.name != "Edit" {
            continue;
        }
        if let Some(path) = tool_use
            .input
            .get("file_path")
            .or_else(|| tool_use.input.get("path"))
            .and_then(|v| v.as_str())
        {
            seen.insert(path.to_string());
        }
    }

    DashboardFrame {
        workspace: workspace_name.to_string(),
        story_id: Some(story_id.to_string()),
        story_title: Some(story_title.to_string()),
        iteration,
        max_iterations,
        stories_passed: state.stories_passed(),
        stories_total: state.stories.len(),
        stories_skipped: state.stories_skipped(),
        cumulative_cost_usd: cumulative.cost_usd,
        cumulative_input_tokens: cumulative.input_tokens,
        cumulative_output_tokens: cumulative.output_tokens,
        current_story_attempts: attempts,
        stuck_status: stuck_status(attempts, hint_present),
        files_modified: seen.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::RecordingEmitter;
    use crate::prd::parse;
    use crate::state::WorkspaceMeta;
    use std::path::Path;
    use tokio::process::Child;

    struct StaticAdapter {
        output: String,
    }

    impl ToolAdapter for StaticAdapter {
        fn name(&self) -> &str {
            "static"
        }

        fn spawn(&self, _prompt: &str, cwd: &Path) -> Result<Child, WilliamError> {
            // `cat` with no args echoes stdin back once closed; we pipe a
            // pre-baked NDJSON payload through a short shell one-liner
            // instead, so the test exercises the real stdout path.
            let script = format!("printf '%s' {}", shell_quote(&self.output));
            tokio::process::Command::new("sh")
                .arg("-c")
                .arg(script)
                .current_dir(cwd)
                .stdin(std::process::Stdio::piped())
                .stdout(std::process::Stdio::piped())
                .stderr(std::process::Stdio::piped())
                .spawn()
                .map_err(|e| WilliamError::ChildSpawn(e.to_string()))
        }
    }

    fn shell_quote(s: &str) -> String {
        format!("'{}'", s.replace('\'', "'\\''"))
    }

    fn write_prd(dir: &Path, content: &str) {
        std::fs::write(dir.join("prd.md"), content).unwrap();
    }

    #[tokio::test]
    async fn single_story_success_completes_in_one_iteration() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::at(dir.path());
        let prd_text = "# T\n\n## User Stories\n\n### US-001: Only story\n\n**Description:**\nfoo\n\n**Acceptance Criteria:**\n- x\n";
        write_prd(dir.path(), prd_text);

        let parsed = parse(prd_text);
        let state = WorkspaceState::init_from_prd(
            &parsed,
            WorkspaceMeta {
                workspace: "demo".into(),
                project: "proj".into(),
                target_dir: dir.path().to_path_buf(),
                branch_name: "feature/demo".into(),
                source_file: workspace.prd_path(),
            },
        );
        state.save(&workspace.state_path()).unwrap();

        let ndjson = "{\"type\":\"assistant\",\"message\":{\"content\":[{\"type\":\"text\",\"text\":\"<promise>STORY_COMPLETE</promise>\"}]}}\n{\"type\":\"result\",\"subtype\":\"success\",\"total_cost_usd\":0.25,\"usage\":{\"input_tokens\":5,\"output_tokens\":5},\"duration_ms\":10,\"num_turns\":1,\"result\":\"\"}\n";
        let adapter = StaticAdapter {
            output: ndjson.to_string(),
        };
        let mut emitter = RecordingEmitter::default();

        let outcome = run(
            "demo",
            &workspace,
            LoopOptions {
                adapter: &adapter,
                max_iterations: 5,
                sleep_ms: 0,
            },
            &mut emitter,
        )
        .await
        .unwrap();

        assert_eq!(outcome, LoopOutcome::AllComplete);
        let final_state = WorkspaceState::load(&workspace.state_path()).unwrap();
        assert!(final_state.is_complete());
        assert_eq!(final_state.story("US-001").unwrap().attempts, 0);

        let logs: Vec<_> = std::fs::read_dir(workspace.logs_dir()).unwrap().collect();
        assert_eq!(logs.len(), 1);
    }

    #[tokio::test]
    async fn stopped_sentinel_exits_without_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::at(dir.path());
        workspace.write_stopped().unwrap();

        let adapter = StaticAdapter {
            output: String::new(),
        };
        let mut emitter = RecordingEmitter::default();

        let outcome = run(
            "demo",
            &workspace,
            LoopOptions {
                adapter: &adapter,
                max_iterations: 5,
                sleep_ms: 0,
            },
            &mut emitter,
        )
        .await
        .unwrap();

        assert_eq!(outcome, LoopOutcome::Stopped);
    }
}
