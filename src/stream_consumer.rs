//! Stream Consumer (C6).
//!
//! Binds a spawned child's stdout/stderr to the NDJSON parser, fans out
//! typed events to the UI emitter, appends every raw line to the iteration
//! log file, and resolves with the final [`StreamSession`] once the child
//! closes (spec §4.6).

use crate::emitter::UiEmitter;
use crate::error::WilliamError;
use crate::ndjson::{LineOutcome, NdjsonParser, StreamSession};
use crate::text::truncate;
use serde_json::Value;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Child;

const SUMMARY_MAX_LEN: usize = 80;
const ERROR_TRUNCATE_LEN: usize = 200;

/// Drain `child`'s stdout/stderr to completion, writing every NDJSON line
/// (and verbatim stderr) to `log_path`, forwarding typed events to
/// `emitter`, and returning the session accumulated along the way.
pub async fn drain(
    mut child: Child,
    prompt: &str,
    log_path: &Path,
    emitter: &mut dyn UiEmitter,
) -> Result<StreamSession, WilliamError> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| WilliamError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let mut log = File::create(log_path)
        .await
        .map_err(|source| WilliamError::Io {
            path: log_path.to_path_buf(),
            source,
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        let _ = stdin.write_all(prompt.as_bytes()).await;
        let _ = stdin.shutdown().await;
    }

    let stdout = child.stdout.take().expect("child spawned with piped stdout");
    let stderr = child.stderr.take().expect("child spawned with piped stderr");
    let mut stdout_lines = BufReader::new(stdout).lines();
    let mut stderr_lines = BufReader::new(stderr).lines();

    let mut parser = NdjsonParser::new();
    let mut stdout_done = false;
    let mut stderr_done = false;

    while !stdout_done || !stderr_done {
        tokio::select! {
            line = stdout_lines.next_line(), if !stdout_done => {
                match line {
                    Ok(Some(line)) => {
                        if log.write_all(line.as_bytes()).await.is_ok() {
                            let _ = log.write_all(b"\n").await;
                        }
                        for outcome in parser.feed(&format!("{}\n", line)) {
                            handle_outcome(outcome, emitter);
                        }
                    }
                    Ok(None) => stdout_done = true,
                    Err(_) => stdout_done = true,
                }
            }
            line = stderr_lines.next_line(), if !stderr_done => {
                match line {
                    Ok(Some(line)) => {
                        emitter.error(&line);
                        if log.write_all(line.as_bytes()).await.is_ok() {
                            let _ = log.write_all(b"\n").await;
                        }
                    }
                    Ok(None) => stderr_done = true,
                    Err(_) => stderr_done = true,
                }
            }
        }
    }

    for outcome in parser.flush() {
        handle_outcome(outcome, emitter);
    }

    emitter.thinking_stop();

    let status = child.wait().await.map_err(|source| WilliamError::Io {
        path: log_path.to_path_buf(),
        source,
    })?;
    if !status.success() {
        log::warn!("agent process exited with status {}", status);
    }

    let _ = log.flush().await;

    Ok(parser.into_session())
}

fn handle_outcome(outcome: LineOutcome, emitter: &mut dyn UiEmitter) {
    match outcome {
        LineOutcome::ParseError(_raw) => {
            emitter.error("malformed NDJSON line from agent");
        }
        LineOutcome::Message(value) => dispatch_message(&value, emitter),
    }
}

fn dispatch_message(value: &Value, emitter: &mut dyn UiEmitter) {
    match value.get("type").and_then(Value::as_str) {
        Some("system") => {
            if value.get("subtype").and_then(Value::as_str) == Some("init") {
                let model = value.get("model").and_then(Value::as_str).unwrap_or("unknown");
                emitter.system(&format!("agent session started (model: {})", model));
            }
        }
        Some("assistant") => {
            let Some(blocks) = value.pointer("/message/content").and_then(Value::as_array) else {
                return;
            };
            for block in blocks {
                match block.get("type").and_then(Value::as_str) {
                    Some("text") => {
                        if let Some(text) = block.get("text").and_then(Value::as_str) {
                            emitter.assistant_text(text);
                        }
                    }
                    Some("tool_use") => {
                        let name = block.get("name").and_then(Value::as_str).unwrap_or("tool");
                        let input = block.get("input").cloned().unwrap_or(Value::Null);
                        emitter.tool_call(name, &summarize_input(&input));
                    }
                    _ => {}
                }
            }
        }
        Some("user") => {
            let Some(blocks) = value.pointer("/message/content").and_then(Value::as_array) else {
                return;
            };
            for block in blocks {
                if block.get("type").and_then(Value::as_str) != Some("tool_result") {
                    continue;
                }
                if block.get("is_error").and_then(Value::as_bool).unwrap_or(false) {
                    let content = stringify(block.get("content"));
                    emitter.error(&truncate(&content, ERROR_TRUNCATE_LEN));
                }
            }
            emitter.thinking_start();
        }
        Some("result") => {
            let cost = value.get("total_cost_usd").and_then(Value::as_f64).unwrap_or(0.0);
            let input_tokens = value
                .pointer("/usage/input_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            let output_tokens = value
                .pointer("/usage/output_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            let duration_ms = value.get("duration_ms").and_then(Value::as_u64).unwrap_or(0);
            emitter.result(cost, input_tokens, output_tokens, duration_ms);
        }
        _ => {}
    }
}

/// One-line summary of a tool_use's input, preferring the fields a human
/// would want to see first (spec §4.6).
fn summarize_input(input: &Value) -> String {
    let preferred = ["command", "file_path", "pattern", "query"];
    for key in preferred {
        if let Some(s) = input.get(key).and_then(Value::as_str) {
            return truncate(s, SUMMARY_MAX_LEN);
        }
    }
    if let Some(obj) = input.as_object() {
        for value in obj.values() {
            if let Some(s) = value.as_str() {
                return truncate(s, SUMMARY_MAX_LEN);
            }
        }
    }
    String::new()
}

fn stringify(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summarize_prefers_command_over_other_fields() {
        let input = serde_json::json!({"command": "ls -la", "file_path": "a.rs"});
        assert_eq!(summarize_input(&input), "ls -la");
    }

    #[test]
    fn summarize_falls_back_to_file_path() {
        let input = serde_json::json!({"file_path": "src/main.rs"});
        assert_eq!(summarize_input(&input), "src/main.rs");
    }

    #[test]
    fn summarize_truncates_long_values() {
        let long = "x".repeat(200);
        let input = serde_json::json!({"query": long});
        let summary = summarize_input(&input);
        assert!(summary.ends_with("..."));
        assert_eq!(summary.len(), SUMMARY_MAX_LEN + 3);
    }

    #[test]
    fn summarize_empty_object_is_empty_string() {
        let input = serde_json::json!({});
        assert_eq!(summarize_input(&input), "");
    }
}
