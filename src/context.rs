//! Context Builder (C3).
//!
//! Assembles the single Markdown block handed to the agent for one
//! iteration: either the raw PRD verbatim (small PRDs) or a curated set of
//! sections, story-status table, and nearby stories (large PRDs), always
//! followed by codebase patterns, recent progress, and an optional stuck
//! hint (spec §4.3).

use crate::prd::ParsedPrd;
use crate::progress::{extract_codebase_patterns, last_dated_entries};
use crate::state::{Passes, WorkspaceState};

/// Above this many bytes of raw PRD source, switch from "emit verbatim" to
/// the curated large-PRD strategy.
const LARGE_PRD_THRESHOLD: usize = 10 * 1024;

const RECENT_PROGRESS_ENTRIES: usize = 3;
const PREVIOUS_COMPLETED_LIMIT: usize = 2;
const UPCOMING_LIMIT: usize = 2;

/// Everything the context builder needs beyond the parsed PRD itself.
pub struct ContextInputs<'a> {
    pub raw_prd: &'a str,
    pub state: &'a WorkspaceState,
    pub progress_txt: &'a str,
    pub stuck_hint: Option<&'a str>,
    /// Already-formatted chain context from the previous completed story
    /// (see [`crate::chain_context::format`]).
    pub chain_context_block: Option<&'a str>,
    /// Set for a revision workspace: the full original PRD text.
    pub original_prd: Option<&'a str>,
}

fn symbol_for(state: &WorkspaceState, story_id: &str, current: Option<&str>) -> char {
    if current == Some(story_id) {
        return '→';
    }
    match state.story(story_id).map(|s| s.passes) {
        Some(Passes::Bool(true)) => '✓',
        Some(Passes::Skipped(_)) => '⊘',
        _ => '·',
    }
}

fn story_status_table(parsed: &ParsedPrd, state: &WorkspaceState) -> String {
    let mut out = String::from("## Story Status\n\n");
    let current = state.current_story.as_deref();
    for story in &parsed.stories {
        let symbol = symbol_for(state, &story.id, current);
        out.push_str(&format!("{} {} — {}\n", symbol, story.id, story.title));
    }
    out.trim_end().to_string()
}

fn large_strategy(parsed: &ParsedPrd, state: &WorkspaceState) -> String {
    let mut blocks = Vec::new();

    let labeled = [
        ("Introduction", &parsed.introduction),
        ("Goals", &parsed.goals),
        ("Non-Goals", &parsed.non_goals),
        ("Technical Considerations", &parsed.technical_considerations),
        ("Functional Requirements", &parsed.functional_requirements),
    ];
    for (label, body) in labeled {
        if !body.trim().is_empty() {
            blocks.push(format!("## {}\n\n{}", label, body.trim()));
        }
    }

    blocks.push(story_status_table(parsed, state));

    let Some(current_id) = state.current_story.clone() else {
        return blocks.join("\n\n");
    };
    let current_idx = parsed.stories.iter().position(|s| s.id == current_id);

    if let Some(idx) = current_idx {
        let completed: Vec<_> = parsed.stories[..idx]
            .iter()
            .filter(|s| matches!(state.story(&s.id).map(|st| st.passes), Some(Passes::Bool(true))))
            .collect();
        let skip = completed.len().saturating_sub(PREVIOUS_COMPLETED_LIMIT);
        for story in &completed[skip..] {
            blocks.push(format!(
                "## Previously Completed: {}\n\n{}",
                story.id, story.raw
            ));
        }

        blocks.push(format!(
            "## Current Story\n\n{}",
            parsed.stories[idx].raw
        ));

        let upcoming: Vec<_> = parsed.stories[idx + 1..]
            .iter()
            .filter(|s| state.story(&s.id).map(|st| st.passes.is_open()).unwrap_or(true))
            .take(UPCOMING_LIMIT)
            .collect();
        for story in upcoming {
            blocks.push(format!(
                "## Upcoming: {} — {}\n\n{}",
                story.id,
                story.title,
                story.description
            ));
        }
    }

    blocks.join("\n\n")
}

/// Build the full context block for one iteration.
pub fn build(parsed: &ParsedPrd, inputs: &ContextInputs) -> String {
    let mut blocks = Vec::new();

    if let Some(chain) = inputs.chain_context_block {
        if !chain.trim().is_empty() {
            blocks.push(chain.trim().to_string());
        }
    }

    if let Some(original) = inputs.original_prd {
        blocks.push(format!("## Original PRD\n\n{}", original.trim()));
    }

    let main_block = if inputs.raw_prd.len() < LARGE_PRD_THRESHOLD {
        inputs.raw_prd.to_string()
    } else {
        large_strategy(parsed, inputs.state)
    };
    blocks.push(main_block);

    let patterns = extract_codebase_patterns(inputs.progress_txt);
    if !patterns.trim().is_empty() {
        blocks.push(patterns);
    }

    let recent = last_dated_entries(inputs.progress_txt, RECENT_PROGRESS_ENTRIES);
    if !recent.is_empty() {
        blocks.push(format!(
            "## Recent Progress\n\n{}",
            recent.join("\n\n")
        ));
    }

    if let Some(hint) = inputs.stuck_hint {
        if !hint.trim().is_empty() {
            blocks.push(format!("## Stuck Recovery Hint\n\n{}", hint.trim()));
        }
    }

    blocks.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prd::parse;
    use crate::state::WorkspaceMeta;
    use std::path::PathBuf;

    fn meta() -> WorkspaceMeta {
        WorkspaceMeta {
            workspace: "demo".into(),
            project: "proj".into(),
            target_dir: PathBuf::from("/tmp/proj"),
            branch_name: "feature/demo".into(),
            source_file: PathBuf::from("/tmp/proj/prd.md"),
        }
    }

    fn small_prd() -> &'static str {
        "# T\n\n## User Stories\n\n### US-001: A\n\n**Description:**\nfoo\n\n**Acceptance Criteria:**\n- x\n"
    }

    #[test]
    fn small_prd_is_emitted_verbatim() {
        let raw = small_prd();
        let parsed = parse(raw);
        let state = WorkspaceState::init_from_prd(&parsed, meta());
        let inputs = ContextInputs {
            raw_prd: raw,
            state: &state,
            progress_txt: "",
            stuck_hint: None,
            chain_context_block: None,
            original_prd: None,
        };
        let out = build(&parsed, &inputs);
        assert!(out.contains(raw));
    }

    fn large_prd_with_n_stories(n: usize) -> String {
        let mut prd = String::from("# Big PRD\n\n## Introduction\n\nSome intro text.\n\n## User Stories\n\n");
        for i in 1..=n {
            prd.push_str(&format!(
                "### US-{:03}: Story {}\n\n**Description:**\nDescription for story {}.\n\n**Acceptance Criteria:**\n- criterion A for {}\n- criterion B for {}\n\n",
                i, i, i, i, i
            ));
        }
        // Pad past the large-PRD threshold with filler prose in Introduction.
        prd.push_str(&"x".repeat(11 * 1024));
        prd
    }

    #[test]
    fn large_prd_uses_story_status_and_windowed_stories() {
        let raw = large_prd_with_n_stories(13);
        let parsed = parse(&raw);
        let mut state = WorkspaceState::init_from_prd(&parsed, meta());
        for i in 1..=4 {
            state.mark_complete(&format!("US-{:03}", i));
        }

        let inputs = ContextInputs {
            raw_prd: &raw,
            state: &state,
            progress_txt: "",
            stuck_hint: None,
            chain_context_block: None,
            original_prd: None,
        };
        let out = build(&parsed, &inputs);

        assert!(out.contains("## Story Status"));
        assert!(out.contains("## Current Story"));
        assert!(out.contains("## Previously Completed: US-003"));
        assert!(out.contains("## Previously Completed: US-004"));
        assert!(!out.contains("## Previously Completed: US-002"));
        assert!(out.contains("## Upcoming: US-006"));
        assert!(out.contains("## Upcoming: US-007"));
        assert!(!out.contains("criterion A for 6"));
        assert!(!out.contains("criterion A for 2"));
    }

    #[test]
    fn revision_workspace_prepends_original_prd() {
        let raw = small_prd();
        let parsed = parse(raw);
        let state = WorkspaceState::init_from_prd(&parsed, meta());
        let inputs = ContextInputs {
            raw_prd: raw,
            state: &state,
            progress_txt: "",
            stuck_hint: None,
            chain_context_block: None,
            original_prd: Some("# Original\n\noriginal body"),
        };
        let out = build(&parsed, &inputs);
        assert!(out.contains("## Original PRD"));
        assert!(out.find("## Original PRD").unwrap() < out.find(raw).unwrap());
    }

    #[test]
    fn stuck_hint_and_chain_context_are_included_when_present() {
        let raw = small_prd();
        let parsed = parse(raw);
        let state = WorkspaceState::init_from_prd(&parsed, meta());
        let inputs = ContextInputs {
            raw_prd: raw,
            state: &state,
            progress_txt: "",
            stuck_hint: Some("watch out for X"),
            chain_context_block: Some("## Chain Context from US-000\n\nstuff"),
            original_prd: None,
        };
        let out = build(&parsed, &inputs);
        assert!(out.contains("## Stuck Recovery Hint"));
        assert!(out.contains("watch out for X"));
        assert!(out.contains("## Chain Context from US-000"));
    }
}
