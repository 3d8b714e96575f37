//! Reading `progress.txt` (spec §3, §4.3).
//!
//! `progress.txt` is a free-form Markdown log the *agent* appends to; the
//! core only ever reads it, extracting a `## Codebase Patterns` section and
//! the last few date-prefixed entries for the next prompt.

use regex::Regex;
use std::sync::OnceLock;

fn dated_heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^##\s*\[?(\d{4}-\d{2}-\d{2})\]?.*$").unwrap())
}

/// Extract the `## Codebase Patterns` section verbatim, from its heading up
/// to the next `## ` heading, a horizontal rule (`---`), or end of file.
/// Returns an empty string if the section is absent.
pub fn extract_codebase_patterns(progress: &str) -> String {
    let Some(start) = progress.find("## Codebase Patterns") else {
        return String::new();
    };
    let rest = &progress[start..];

    // Look for the next stop marker strictly after the section's own
    // heading line.
    let after_heading = rest.find('\n').map(|i| i + 1).unwrap_or(rest.len());
    let tail = &rest[after_heading..];

    let mut end = tail.len();
    if let Some(next_heading) = Regex::new(r"(?m)^##\s").unwrap().find(tail) {
        end = end.min(next_heading.start());
    }
    if let Some(hr) = Regex::new(r"(?m)^\s*---+\s*$").unwrap().find(tail) {
        end = end.min(hr.start());
    }

    format!("{}{}", &rest[..after_heading], &tail[..end])
        .trim_end()
        .to_string()
}

/// Return the last `n` date-prefixed entries (`## YYYY-MM-DD ...` or
/// `## [YYYY-MM-DD] ...` headings), each including its heading through to
/// just before the next dated heading or end of file.
pub fn last_dated_entries(progress: &str, n: usize) -> Vec<String> {
    let heading_starts: Vec<usize> = dated_heading_re()
        .find_iter(progress)
        .map(|m| m.start())
        .collect();

    if heading_starts.is_empty() {
        return Vec::new();
    }

    let mut entries = Vec::new();
    for (i, &start) in heading_starts.iter().enumerate() {
        let end = heading_starts.get(i + 1).copied().unwrap_or(progress.len());
        entries.push(progress[start..end].trim_end().to_string());
    }

    let skip = entries.len().saturating_sub(n);
    entries.split_off(skip)
}
