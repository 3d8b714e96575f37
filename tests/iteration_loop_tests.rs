//! End-to-end iteration-loop scenarios, exercised through the public API
//! rather than `loop_engine`'s own inline unit tests. Mirrors the
//! end-to-end scenarios catalogued in the spec: a tool-loop stuck signal
//! escalating to a hint, and a forced skip once attempts and an existing
//! hint cross the skip threshold.

use std::path::Path;
use william_core::adapter::ToolAdapter;
use william_core::emitter::{TuiEvent, UiEmitter};
use william_core::error::WilliamError;
use william_core::loop_engine::{self, LoopOptions, LoopOutcome};
use william_core::prd;
use william_core::state::{WorkspaceMeta, WorkspaceState};
use william_core::workspace::Workspace;

/// Local stand-in for a TUI: records every event for assertions, the same
/// role the teacher's headless test harness plays against its own event
/// bus.
#[derive(Default)]
struct CapturingEmitter {
    events: Vec<TuiEvent>,
}

impl UiEmitter for CapturingEmitter {
    fn emit(&mut self, event: TuiEvent) {
        self.events.push(event);
    }
}

/// Adapter that ignores the prompt and replays a fixed NDJSON transcript
/// through a `sh -c printf` child, so the stream consumer exercises a real
/// stdout pipe rather than an in-memory stub.
struct ScriptedAdapter {
    transcript: String,
}

impl ToolAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        "scripted"
    }

    fn spawn(&self, _prompt: &str, cwd: &Path) -> Result<tokio::process::Child, WilliamError> {
        let script = format!("printf '%s' '{}'", self.transcript.replace('\'', "'\\''"));
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

fn single_story_prd() -> &'static str {
    "# T\n\n## User Stories\n\n### US-001: Only story\n\n**Description:**\nfoo\n\n**Acceptance Criteria:**\n- x\n"
}

fn init_workspace(dir: &Path, prd_text: &str) -> Workspace {
    let workspace = Workspace::at(dir);
    std::fs::write(workspace.prd_path(), prd_text).unwrap();
    std::fs::write(workspace.progress_path(), "").unwrap();

    let parsed = prd::parse(prd_text);
    let state = WorkspaceState::init_from_prd(
        &parsed,
        WorkspaceMeta {
            workspace: "demo".into(),
            project: "proj".into(),
            target_dir: dir.to_path_buf(),
            branch_name: "feature/demo".into(),
            source_file: workspace.prd_path(),
        },
    );
    state.save(&workspace.state_path()).unwrap();
    workspace
}

fn bash_tool_use_line(id: usize) -> String {
    format!(
        "{{\"type\":\"assistant\",\"message\":{{\"content\":[{{\"type\":\"tool_use\",\"id\":\"t{id}\",\"name\":\"Bash\",\"input\":{{\"command\":\"ls\"}}}}]}}}}\n"
    )
}

#[tokio::test]
async fn tool_loop_escalates_to_hint_without_completion() {
    let dir = tempfile::tempdir().unwrap();
    let workspace = init_workspace(dir.path(), single_story_prd());

    let mut transcript = String::new();
    for i in 0..12 {
        transcript.push_str(&bash_tool_use_line(i));
    }
    transcript.push_str("{\"type\":\"result\",\"subtype\":\"success\",\"total_cost_usd\":0.01,\"usage\":{\"input_tokens\":3,\"output_tokens\":3},\"duration_ms\":5,\"num_turns\":1,\"result\":\"\"}\n");

    let adapter = ScriptedAdapter { transcript };
    let mut emitter = CapturingEmitter::default();

    let outcome = loop_engine::run(
        "demo",
        &workspace,
        LoopOptions {
            adapter: &adapter,
            max_iterations: 1,
            sleep_ms: 0,
        },
        &mut emitter,
    )
    .await
    .unwrap();

    assert_eq!(outcome, LoopOutcome::MaxIterationsReached);
    assert!(workspace.stuck_hint_path().exists());
    let hint = std::fs::read_to_string(workspace.stuck_hint_path()).unwrap();
    assert!(hint.contains("tool loop"));

    let state = WorkspaceState::load(&workspace.state_path()).unwrap();
    assert_eq!(state.story("US-001").unwrap().attempts, 1);

    let saw_error_or_system = emitter
        .events
        .iter()
        .any(|e| matches!(e, TuiEvent::System { .. } | TuiEvent::Error { .. }));
    assert!(saw_error_or_system);
}

#[tokio::test]
async fn attempts_and_existing_hint_force_a_skip_and_advance_story() {
    let dir = tempfile::tempdir().unwrap();
    let prd_text = "# T\n\n## User Stories\n\n### US-001: First\n\n**Description:**\nfoo\n\n**Acceptance Criteria:**\n- x\n\n### US-002: Second\n\n**Description:**\nbar\n\n**Acceptance Criteria:**\n- y\n";
    let workspace = init_workspace(dir.path(), prd_text);

    // Pre-seed US-001 at 5 attempts with a stuck hint already present, as
    // if four prior iterations had already run.
    let mut state = WorkspaceState::load(&workspace.state_path()).unwrap();
    for _ in 0..5 {
        state.increment_attempts("US-001");
    }
    state.save(&workspace.state_path()).unwrap();
    std::fs::write(workspace.stuck_hint_path(), "# Stuck Hint\n\nPrior guidance.\n").unwrap();

    let transcript = "{\"type\":\"assistant\",\"message\":{\"content\":[{\"type\":\"text\",\"text\":\"still stuck\"}]}}\n{\"type\":\"result\",\"subtype\":\"success\",\"total_cost_usd\":0.02,\"usage\":{\"input_tokens\":4,\"output_tokens\":4},\"duration_ms\":5,\"num_turns\":1,\"result\":\"\"}\n".to_string();
    let adapter = ScriptedAdapter { transcript };
    let mut emitter = CapturingEmitter::default();

    let outcome = loop_engine::run(
        "demo",
        &workspace,
        LoopOptions {
            adapter: &adapter,
            max_iterations: 1,
            sleep_ms: 0,
        },
        &mut emitter,
    )
    .await
    .unwrap();

    assert_eq!(outcome, LoopOutcome::MaxIterationsReached);

    let state = WorkspaceState::load(&workspace.state_path()).unwrap();
    let first = state.story("US-001").unwrap();
    assert!(matches!(first.passes, william_core::state::Passes::Skipped(_)));
    assert!(first.skip_reason.is_some());
    assert_eq!(state.current_story.as_deref(), Some("US-002"));

    let saw_skip_event = emitter
        .events
        .iter()
        .any(|e| matches!(e, TuiEvent::StorySkipped { .. }));
    assert!(saw_skip_event);
}

#[tokio::test]
async fn story_complete_removes_a_pre_existing_stuck_hint() {
    let dir = tempfile::tempdir().unwrap();
    let workspace = init_workspace(dir.path(), single_story_prd());

    // A prior iteration already escalated to a hint; this iteration finally
    // clears the acceptance criteria.
    std::fs::write(workspace.stuck_hint_path(), "# Stuck Hint\n\nPrior guidance.\n").unwrap();
    assert!(workspace.stuck_hint_path().exists());

    let transcript = "{\"type\":\"assistant\",\"message\":{\"content\":[{\"type\":\"text\",\"text\":\"<promise>STORY_COMPLETE</promise>\"}]}}\n{\"type\":\"result\",\"subtype\":\"success\",\"total_cost_usd\":0.05,\"usage\":{\"input_tokens\":6,\"output_tokens\":6},\"duration_ms\":8,\"num_turns\":1,\"result\":\"\"}\n".to_string();
    let adapter = ScriptedAdapter { transcript };
    let mut emitter = CapturingEmitter::default();

    let outcome = loop_engine::run(
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
    assert!(!workspace.stuck_hint_path().exists());

    let state = WorkspaceState::load(&workspace.state_path()).unwrap();
    assert!(matches!(
        state.story("US-001").unwrap().passes,
        william_core::state::Passes::Bool(true)
    ));
}
