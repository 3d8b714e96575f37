//! NDJSON Session Parser (C4).
//!
//! Chunk-tolerant line parser over the coding agent's newline-delimited
//! JSON event stream. Accepts arbitrary byte/string chunks in arrival
//! order and builds up a cumulative [`StreamSession`]. A malformed line
//! never corrupts state or halts subsequent parsing (spec §4.4, §8
//! "NDJSON resilience").

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One tool invocation the agent requested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolUse {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// One tool result returned to the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_use_id: String,
    pub content: String,
    pub is_error: bool,
}

/// Terminal outcome reported by the agent's `result` message, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultSubtype {
    Success,
    ErrorMaxTurns,
    ErrorTool,
    ErrorUnknown,
}

impl ResultSubtype {
    fn from_str(s: &str) -> Self {
        match s {
            "success" => Self::Success,
            "error_max_turns" => Self::ErrorMaxTurns,
            "error_tool" => Self::ErrorTool,
            _ => Self::ErrorUnknown,
        }
    }
}

/// The cumulative record built from one agent invocation's NDJSON stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamSession {
    pub events: Vec<Value>,
    pub full_text: String,
    pub tool_uses: Vec<ToolUse>,
    pub tool_results: Vec<ToolResult>,
    pub total_cost_usd: Option<f64>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub duration_ms: Option<u64>,
    pub num_turns: Option<u64>,
    pub result_subtype: Option<ResultSubtype>,
    pub session_id: Option<String>,
}

/// One outcome of trying to parse a single NDJSON line.
#[derive(Debug, Clone)]
pub enum LineOutcome {
    /// Successfully parsed and folded into the session; carries the raw
    /// event value so callers (the stream consumer) can dispatch further.
    Message(Value),
    /// The line was not valid JSON; it is dropped, not retried.
    ParseError(String),
}

/// Chunk-tolerant parser. Feed it chunks as they arrive; call `flush()`
/// once the underlying stream has closed to parse any trailing partial
/// line that was never newline-terminated.
#[derive(Debug, Default)]
pub struct NdjsonParser {
    buffer: String,
    session: StreamSession,
}

impl NdjsonParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self) -> &StreamSession {
        &self.session
    }

    pub fn into_session(self) -> StreamSession {
        self.session
    }

    /// Feed an arbitrary chunk of bytes (as text). Returns one
    /// [`LineOutcome`] per complete line found, in order.
    pub fn feed(&mut self, chunk: &str) -> Vec<LineOutcome> {
        self.buffer.push_str(chunk);
        let mut outcomes = Vec::new();

        loop {
            let Some(pos) = self.buffer.find('\n') else {
                break;
            };
            let line = self.buffer[..pos].to_string();
            self.buffer.drain(..=pos);
            if let Some(outcome) = self.parse_line(&line) {
                outcomes.push(outcome);
            }
        }

        outcomes
    }

    /// Parse whatever remains in the buffer as a final line (the stream
    /// may not end in a trailing newline), then clear the buffer.
    pub fn flush(&mut self) -> Vec<LineOutcome> {
        let remaining = std::mem::take(&mut self.buffer);
        self.parse_line(&remaining).into_iter().collect()
    }

    fn parse_line(&mut self, line: &str) -> Option<LineOutcome> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }

        match serde_json::from_str::<Value>(trimmed) {
            Ok(value) => {
                self.fold(&value);
                Some(LineOutcome::Message(value))
            }
            Err(_) => Some(LineOutcome::ParseError(line.to_string())),
        }
    }

    /// Fold one successfully parsed event into the cumulative session.
    fn fold(&mut self, value: &Value) {
        self.session.events.push(value.clone());

        let Some(ty) = value.get("type").and_then(Value::as_str) else {
            return;
        };

        match ty {
            "system" => {
                if value.get("subtype").and_then(Value::as_str) == Some("init") {
                    if let Some(sid) = value.get("session_id").and_then(Value::as_str) {
                        self.session.session_id = Some(sid.to_string());
                    }
                }
            }
            "assistant" => {
                let Some(blocks) = value
                    .pointer("/message/content")
                    .and_then(Value::as_array)
                else {
                    return;
                };
                for block in blocks {
                    match block.get("type").and_then(Value::as_str) {
                        Some("text") => {
                            if let Some(text) = block.get("text").and_then(Value::as_str) {
                                self.session.full_text.push_str(text);
                            }
                        }
                        Some("tool_use") => {
                            let id = block
                                .get("id")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string();
                            let name = block
                                .get("name")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string();
                            let input = block.get("input").cloned().unwrap_or(Value::Null);
                            self.session.tool_uses.push(ToolUse { id, name, input });
                        }
                        _ => {}
                    }
                }
            }
            "user" => {
                let Some(blocks) = value
                    .pointer("/message/content")
                    .and_then(Value::as_array)
                else {
                    return;
                };
                for block in blocks {
                    if block.get("type").and_then(Value::as_str) != Some("tool_result") {
                        continue;
                    }
                    let tool_use_id = block
                        .get("tool_use_id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    let content = stringify_content(block.get("content"));
                    let is_error = block
                        .get("is_error")
                        .and_then(Value::as_bool)
                        .unwrap_or(false);
                    self.session.tool_results.push(ToolResult {
                        tool_use_id,
                        content,
                        is_error,
                    });
                }
            }
            "result" => {
                if let Some(cost) = value.get("total_cost_usd").and_then(Value::as_f64) {
                    self.session.total_cost_usd = Some(cost);
                }
                if let Some(tok) = value.pointer("/usage/input_tokens").and_then(Value::as_u64) {
                    self.session.input_tokens = Some(tok);
                }
                if let Some(tok) = value.pointer("/usage/output_tokens").and_then(Value::as_u64) {
                    self.session.output_tokens = Some(tok);
                }
                if let Some(ms) = value.get("duration_ms").and_then(Value::as_u64) {
                    self.session.duration_ms = Some(ms);
                }
                if let Some(turns) = value.get("num_turns").and_then(Value::as_u64) {
                    self.session.num_turns = Some(turns);
                }
                if let Some(subtype) = value.get("subtype").and_then(Value::as_str) {
                    self.session.result_subtype = Some(ResultSubtype::from_str(subtype));
                }
            }
            _ => {}
        }
    }
}

fn stringify_content(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_count(outcomes: &[LineOutcome]) -> (usize, usize) {
        let messages = outcomes
            .iter()
            .filter(|o| matches!(o, LineOutcome::Message(_)))
            .count();
        let errors = outcomes
            .iter()
            .filter(|o| matches!(o, LineOutcome::ParseError(_)))
            .count();
        (messages, errors)
    }

    #[test]
    fn resilience_one_bad_line_between_two_good_ones() {
        let stream = "{\"type\":\"system\",\"subtype\":\"init\",\"session_id\":\"s1\"}\nxxx not json\n{\"type\":\"result\",\"subtype\":\"success\",\"total_cost_usd\":0.1,\"usage\":{\"input_tokens\":1,\"output_tokens\":1},\"duration_ms\":1,\"num_turns\":1,\"result\":\"\"}\n";
        let mut parser = NdjsonParser::new();
        let outcomes = parser.feed(stream);
        let (messages, errors) = line_count(&outcomes);
        assert_eq!(messages, 2);
        assert_eq!(errors, 1);
        assert_eq!(parser.session().total_cost_usd, Some(0.1));
        assert_eq!(parser.session().session_id.as_deref(), Some("s1"));
    }

    #[test]
    fn chunking_is_irrelevant_to_the_resulting_session() {
        let stream = "{\"type\":\"assistant\",\"message\":{\"content\":[{\"type\":\"text\",\"text\":\"hello \"}]}}\n{\"type\":\"assistant\",\"message\":{\"content\":[{\"type\":\"text\",\"text\":\"world\"}]}}\n";

        let mut whole = NdjsonParser::new();
        whole.feed(stream);
        whole.flush();

        // Split at arbitrary byte boundaries, including mid-line.
        let mut chunked = NdjsonParser::new();
        for chunk in stream.as_bytes().chunks(7) {
            chunked.feed(std::str::from_utf8(chunk).unwrap());
        }
        chunked.flush();

        assert_eq!(whole.session().full_text, chunked.session().full_text);
        assert_eq!(whole.session().full_text, "hello world");
    }

    #[test]
    fn flush_parses_a_trailing_line_without_newline() {
        let mut parser = NdjsonParser::new();
        parser.feed("{\"type\":\"assistant\",\"message\":{\"content\":[{\"type\":\"text\",\"text\":\"partial\"}]}}");
        assert_eq!(parser.session().full_text, "");
        let outcomes = parser.flush();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(parser.session().full_text, "partial");
    }

    #[test]
    fn blank_lines_are_ignored_without_emitting_anything() {
        let mut parser = NdjsonParser::new();
        let outcomes = parser.feed("\n   \n\n");
        assert!(outcomes.is_empty());
    }

    #[test]
    fn tool_use_and_tool_result_are_collected_and_linked() {
        let mut parser = NdjsonParser::new();
        parser.feed("{\"type\":\"assistant\",\"message\":{\"content\":[{\"type\":\"tool_use\",\"id\":\"t1\",\"name\":\"Bash\",\"input\":{\"command\":\"ls\"}}]}}\n");
        parser.feed("{\"type\":\"user\",\"message\":{\"content\":[{\"type\":\"tool_result\",\"tool_use_id\":\"t1\",\"content\":\"oops\",\"is_error\":true}]}}\n");

        let session = parser.session();
        assert_eq!(session.tool_uses.len(), 1);
        assert_eq!(session.tool_uses[0].name, "Bash");
        assert_eq!(session.tool_results.len(), 1);
        assert_eq!(session.tool_results[0].tool_use_id, "t1");
        assert!(session.tool_results[0].is_error);
    }
}
