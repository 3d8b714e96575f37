//! Chain Context Extractor (C5).
//!
//! Derives a compact summary of one completed story's session — files
//! touched, commands run, errors, recent decisions, usage — and formats it
//! as a Markdown block for the next story's prompt (spec §4.5).

use crate::ndjson::StreamSession;
use crate::text::truncate;
use serde_json::Value;

#[derive(Debug, Clone, Default)]
pub struct ChainContext {
    pub files_modified: Vec<String>,
    pub files_read: Vec<String>,
    pub commands_run: Vec<String>,
    pub errors: Vec<String>,
    pub key_decisions: Vec<String>,
    pub total_cost_usd: Option<f64>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub duration_ms: Option<u64>,
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}

/// Build a [`ChainContext`] out of a completed session.
pub fn extract(session: &StreamSession) -> ChainContext {
    let mut ctx = ChainContext {
        total_cost_usd: session.total_cost_usd,
        input_tokens: session.input_tokens,
        output_tokens: session.output_tokens,
        duration_ms: session.duration_ms,
        ..Default::default()
    };

    for tool_use in &session.tool_uses {
        match tool_use.name.as_str() {
            "Write" | "Edit" => {
                if let Some(path) = path_value(&tool_use.input) {
                    push_unique(&mut ctx.files_modified, path);
                }
            }
            "Read" => {
                if let Some(path) = path_value(&tool_use.input) {
                    push_unique(&mut ctx.files_read, path);
                }
            }
            "Bash" => {
                if let Some(cmd) = tool_use.input.get("command").and_then(Value::as_str) {
                    push_unique(&mut ctx.commands_run, cmd.to_string());
                }
            }
            _ => {}
        }
    }

    for result in &session.tool_results {
        if result.is_error {
            ctx.errors.push(format!(
                "[{}] {}",
                result.tool_use_id,
                truncate(&result.content, 300)
            ));
        }
    }

    let mut decisions = Vec::new();
    for event in &session.events {
        if event.get("type").and_then(Value::as_str) != Some("assistant") {
            continue;
        }
        let Some(blocks) = event.pointer("/message/content").and_then(Value::as_array) else {
            continue;
        };
        for block in blocks {
            if block.get("type").and_then(Value::as_str) != Some("text") {
                continue;
            }
            if let Some(text) = block.get("text").and_then(Value::as_str) {
                if !text.trim().is_empty() {
                    decisions.push(text.to_string());
                }
            }
        }
    }
    let skip = decisions.len().saturating_sub(5);
    ctx.key_decisions = decisions.split_off(skip);

    ctx
}

fn path_value(input: &Value) -> Option<String> {
    input
        .get("file_path")
        .or_else(|| input.get("path"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Format a [`ChainContext`] as the Markdown block fed into the next
/// iteration's prompt. Subsections appear only if non-empty; Session Stats
/// is always present.
pub fn format(ctx: &ChainContext, story_id: &str) -> String {
    let mut out = format!("## Chain Context from {}\n\n", story_id);

    if !ctx.files_modified.is_empty() {
        out.push_str("### Files Modified\n\n");
        for path in ctx.files_modified.iter().take(15) {
            out.push_str(&format!("- `{}`\n", path));
        }
        out.push('\n');
    }

    if !ctx.files_read.is_empty() {
        out.push_str("### Files Referenced\n\n");
        for path in ctx.files_read.iter().take(15) {
            out.push_str(&format!("- `{}`\n", path));
        }
        out.push('\n');
    }

    if !ctx.commands_run.is_empty() {
        out.push_str("### Commands Run\n\n");
        for cmd in ctx.commands_run.iter().take(20) {
            out.push_str(&format!("- `{}`\n", truncate(cmd, 200)));
        }
        out.push('\n');
    }

    if !ctx.errors.is_empty() {
        out.push_str("### Errors Encountered\n\n");
        for err in ctx.errors.iter().take(10) {
            out.push_str(&format!("- {}\n", truncate(err, 200)));
        }
        out.push('\n');
    }

    if !ctx.key_decisions.is_empty() {
        out.push_str("### Key Decisions\n\n");
        for decision in ctx.key_decisions.iter().take(5) {
            out.push_str(&format!("- {}\n", truncate(decision, 500)));
        }
        out.push('\n');
    }

    out.push_str("### Session Stats\n\n");
    out.push_str(&format!(
        "- Cost: ${:.4}\n",
        ctx.total_cost_usd.unwrap_or(0.0)
    ));
    out.push_str(&format!(
        "- Tokens: {} in / {} out\n",
        ctx.input_tokens.unwrap_or(0),
        ctx.output_tokens.unwrap_or(0)
    ));
    out.push_str(&format!(
        "- Duration: {:.1}s\n",
        ctx.duration_ms.unwrap_or(0) as f64 / 1000.0
    ));

    out.trim_end().to_string()
}
