//! Prompt template and `{{placeholder}}` substitution (spec §4.8 step 4,
//! §6 "Template substitution").
//!
//! `{{identifier}}` (word characters only) is replaced by the string value
//! mapped to `identifier`; unknown identifiers substitute to the empty
//! string, never an error — grounded in the teacher's
//! `ralph_loop::prompt_builder`, generalized from a fixed `format!` call
//! into data-driven substitution so the template text itself can live
//! outside the binary.

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{(\w+)\}\}").unwrap())
}

/// Substitute every `{{identifier}}` occurrence in `template` with
/// `values[identifier]`, or the empty string if the identifier is absent.
pub fn render(template: &str, values: &HashMap<String, String>) -> String {
    placeholder_re()
        .replace_all(template, |caps: &regex::Captures| {
            values.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned()
}

/// The fixed per-iteration agent-instruction template (spec §4.8 step 4).
/// Every placeholder here is populated by the iteration loop; any it
/// doesn't set simply renders empty.
pub const AGENT_INSTRUCTION_TEMPLATE: &str = r#"# Task Instructions

You are working on branch `{{branch_name}}`, story `{{story_id}}`: {{story_title}}.

Your context is fresh for this iteration — everything you need is below or
on disk. Focus only on this story; do not work ahead on other stories.

## Context

{{prd_context}}

## Story Status

{{story_status_table}}

## Codebase Patterns

{{codebase_patterns}}

## Recent Learnings

{{recent_learnings}}

## Stuck Recovery Hint

{{stuck_hint}}

## Chain Context From Previous Story

{{chain_context}}

## Completion Protocol

When every acceptance criterion for `{{story_id}}` is met, emit the literal
text `<promise>STORY_COMPLETE</promise>`. If this was the last remaining
story, instead emit `<promise>ALL_COMPLETE</promise>`.

Append a dated entry describing what you did to `{{progress_path}}` before
finishing.
"#;
