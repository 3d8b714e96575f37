//! UI Emitter Interface (C10).
//!
//! A one-way, construction-time-wired channel from the core to whatever
//! renders it (a TUI, a log file, a test harness). The core never awaits a
//! response (spec §4.10, §9 "avoid dynamic subscribe/unsubscribe
//! patterns").

use serde::{Deserialize, Serialize};

/// Severity used by `system`/`error` messages so a renderer can color them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Error,
}

/// Stuck status surfaced on the dashboard (spec §4.8 step 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StuckStatus {
    Normal,
    HintWritten,
    ApproachingSkip,
}

/// One dashboard snapshot, emitted before and after each iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardFrame {
    pub workspace: String,
    pub story_id: Option<String>,
    pub story_title: Option<String>,
    pub iteration: u32,
    pub max_iterations: u32,
    pub stories_passed: usize,
    pub stories_total: usize,
    pub stories_skipped: usize,
    pub cumulative_cost_usd: f64,
    pub cumulative_input_tokens: u64,
    pub cumulative_output_tokens: u64,
    pub current_story_attempts: u32,
    pub stuck_status: StuckStatus,
    pub files_modified: usize,
}

/// Every event the core can emit toward a renderer. This is the complete
/// set — see spec §4.10; there is no dynamic registration of new kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TuiEvent {
    System { text: String, severity: Severity },
    AssistantText { text: String },
    Error { text: String },
    ToolCall { name: String, summary: String },
    ThinkingStart,
    ThinkingStop,
    Result {
        cost_usd: f64,
        input_tokens: u64,
        output_tokens: u64,
        duration_ms: u64,
    },
    DashboardUpdate { frame: DashboardFrame },
    StoryStart { id: String, title: String },
    StoryComplete { id: String, title: String },
    StorySkipped { id: String, title: String },
}

/// The sink the core writes into. Implementations decide how (or whether)
/// to render; the core holds a `&dyn UiEmitter` and never awaits a
/// response.
pub trait UiEmitter: Send {
    fn emit(&mut self, event: TuiEvent);

    fn system(&mut self, text: &str) {
        self.emit(TuiEvent::System {
            text: text.to_string(),
            severity: Severity::Info,
        });
    }

    fn error(&mut self, text: &str) {
        self.emit(TuiEvent::Error { text: text.to_string() });
    }

    fn assistant_text(&mut self, text: &str) {
        self.emit(TuiEvent::AssistantText { text: text.to_string() });
    }

    fn tool_call(&mut self, name: &str, summary: &str) {
        self.emit(TuiEvent::ToolCall {
            name: name.to_string(),
            summary: summary.to_string(),
        });
    }

    fn thinking_start(&mut self) {
        self.emit(TuiEvent::ThinkingStart);
    }

    fn thinking_stop(&mut self) {
        self.emit(TuiEvent::ThinkingStop);
    }

    fn result(&mut self, cost_usd: f64, input_tokens: u64, output_tokens: u64, duration_ms: u64) {
        self.emit(TuiEvent::Result {
            cost_usd,
            input_tokens,
            output_tokens,
            duration_ms,
        });
    }

    fn dashboard_update(&mut self, frame: DashboardFrame) {
        self.emit(TuiEvent::DashboardUpdate { frame });
    }

    fn story_start(&mut self, id: &str, title: &str) {
        self.emit(TuiEvent::StoryStart {
            id: id.to_string(),
            title: title.to_string(),
        });
    }

    fn story_complete(&mut self, id: &str, title: &str) {
        self.emit(TuiEvent::StoryComplete {
            id: id.to_string(),
            title: title.to_string(),
        });
    }

    fn story_skipped(&mut self, id: &str, title: &str) {
        self.emit(TuiEvent::StorySkipped {
            id: id.to_string(),
            title: title.to_string(),
        });
    }
}

/// Default emitter for headless runs: forwards every event to the `log`
/// facade. A real TUI renderer (out of scope here) would implement
/// [`UiEmitter`] itself instead.
#[derive(Default)]
pub struct LoggingEmitter;

impl UiEmitter for LoggingEmitter {
    fn emit(&mut self, event: TuiEvent) {
        match event {
            TuiEvent::System { text, severity } => match severity {
                Severity::Error => log::error!("{}", text),
                Severity::Warn => log::warn!("{}", text),
                Severity::Info => log::info!("{}", text),
            },
            TuiEvent::Error { text } => log::error!("{}", text),
            TuiEvent::AssistantText { text } => log::debug!("assistant: {}", text),
            TuiEvent::ToolCall { name, summary } => log::info!("tool {}: {}", name, summary),
            TuiEvent::ThinkingStart => log::debug!("thinking..."),
            TuiEvent::ThinkingStop => log::debug!("done thinking"),
            TuiEvent::Result {
                cost_usd,
                input_tokens,
                output_tokens,
                duration_ms,
            } => log::info!(
                "result: ${:.4}, {} in / {} out tokens, {}ms",
                cost_usd,
                input_tokens,
                output_tokens,
                duration_ms
            ),
            TuiEvent::DashboardUpdate { frame } => log::debug!("dashboard: {:?}", frame),
            TuiEvent::StoryStart { id, title } => log::info!("story start: {} — {}", id, title),
            TuiEvent::StoryComplete { id, title } => {
                log::info!("story complete: {} — {}", id, title)
            }
            TuiEvent::StorySkipped { id, title } => {
                log::info!("story skipped: {} — {}", id, title)
            }
        }
    }
}

/// Test-only emitter that records every event for assertions.
#[cfg(any(test, feature = "test-util"))]
#[derive(Default)]
pub struct RecordingEmitter {
    pub events: Vec<TuiEvent>,
}

#[cfg(any(test, feature = "test-util"))]
impl UiEmitter for RecordingEmitter {
    fn emit(&mut self, event: TuiEvent) {
        self.events.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_emitter_preserves_order() {
        let mut emitter = RecordingEmitter::default();
        emitter.system("hello");
        emitter.thinking_start();
        emitter.thinking_stop();
        assert_eq!(emitter.events.len(), 3);
        assert!(matches!(emitter.events[0], TuiEvent::System { .. }));
        assert!(matches!(emitter.events[1], TuiEvent::ThinkingStart));
        assert!(matches!(emitter.events[2], TuiEvent::ThinkingStop));
    }
}
