//! PRD Parser (C1).
//!
//! Converts a Markdown PRD into an ordered list of [`Story`] plus the named
//! top-level sections of [`ParsedPrd`]. Parsing never fails on shape: every
//! missing or malformed piece degrades to an empty string or is silently
//! skipped, per spec §4.1.
//!
//! Heading boundaries are located with `pulldown-cmark`'s offset iterator so
//! that story and section bodies can be sliced *verbatim* out of the source
//! — re-rendering Markdown we already parsed would lose the raw block the
//! agent is meant to see unmodified.

use pulldown_cmark::{Event, HeadingLevel, Options, Parser, Tag, TagEnd};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// One user story parsed out of the `## User Stories` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Story {
    /// `US-NNN`, either taken from the heading or assigned sequentially.
    pub id: String,
    pub title: String,
    pub description: String,
    /// Bullet lines as they appeared, leading `- ` (and any checkbox) intact.
    pub acceptance_criteria: Vec<String>,
    /// The verbatim Markdown block for this story, heading included.
    pub raw: String,
}

/// A PRD parsed into its named sections plus an ordered story list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedPrd {
    pub title: String,
    pub introduction: String,
    pub goals: String,
    pub non_goals: String,
    pub technical_considerations: String,
    pub functional_requirements: String,
    pub design_considerations: String,
    pub success_metrics: String,
    pub open_questions: String,
    pub stories: Vec<Story>,
}

struct Heading {
    level: HeadingLevel,
    start: usize,
    text: String,
}

/// Walk the document once and record every heading's level, text, and the
/// byte offset where it starts (so callers can slice raw text between
/// headings instead of re-rendering parsed Markdown).
fn headings(source: &str) -> Vec<Heading> {
    let parser = Parser::new_ext(source, Options::empty()).into_offset_iter();
    let mut out = Vec::new();
    let mut current: Option<(HeadingLevel, usize, String)> = None;

    for (event, range) in parser {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                current = Some((level, range.start, String::new()));
            }
            Event::Text(text) | Event::Code(text) => {
                if let Some((_, _, buf)) = current.as_mut() {
                    buf.push_str(&text);
                }
            }
            Event::End(TagEnd::Heading(_)) => {
                if let Some((level, start, text)) = current.take() {
                    out.push(Heading { level, start, text });
                }
            }
            _ => {}
        }
    }

    out
}

/// Normalize a heading for matching against the fixed section table:
/// lowercase, hyphens become spaces, non-letters are stripped, whitespace
/// is collapsed.
fn normalize_heading(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch == '-' {
            out.push(' ');
        } else if ch.is_alphabetic() || ch.is_whitespace() {
            out.push(ch.to_ascii_lowercase());
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn phase_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^Phase\s+(\d+|[A-Za-z]+)\s*:").unwrap())
}

fn story_heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(US-\d+)\s*:\s*(.*)$").unwrap())
}

fn header_marker_re() -> &'static Regex {
    // Matches a "**Word:**"-style sub-header line, used to bound the
    // description and to detect the blank-line+"**" stop for criteria.
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*\*\*[^*]+:\*\*").unwrap())
}

/// Strip a leading check-mark glyph (e.g. a literal "✓"/"✔"/"☑"/"✅") and
/// surrounding whitespace before testing for the `Phase N:` pattern.
fn strip_leading_checkmark(s: &str) -> &str {
    s.trim_start_matches(['✓', '✔', '☑', '✅', '□', '☐'])
        .trim_start()
}

/// Parse `markdown` into a [`ParsedPrd`]. Never panics or returns an error;
/// absent sections and malformed stories simply degrade to empty fields.
pub fn parse(markdown: &str) -> ParsedPrd {
    let heads = headings(markdown);
    let len = markdown.len();

    let title = heads
        .iter()
        .find(|h| h.level == HeadingLevel::H1)
        .map(|h| h.text.trim().to_string())
        .unwrap_or_default();

    let mut prd = ParsedPrd {
        title,
        ..Default::default()
    };

    // Top-level (H1/H2) boundaries, used to bound each H2 section's body.
    let top_level: Vec<usize> = heads
        .iter()
        .enumerate()
        .filter(|(_, h)| matches!(h.level, HeadingLevel::H1 | HeadingLevel::H2))
        .map(|(i, _)| i)
        .collect();

    for (pos, &idx) in top_level.iter().enumerate() {
        let h = &heads[idx];
        if h.level != HeadingLevel::H2 {
            continue;
        }
        let body_start = line_end(markdown, h.start);
        let body_end = top_level
            .get(pos + 1)
            .map(|&next_idx| heads[next_idx].start)
            .unwrap_or(len);
        let body = markdown[body_start..body_end].trim().to_string();

        match normalize_heading(&h.text).as_str() {
            "introduction" => prd.introduction = body,
            "goals" => prd.goals = body,
            "non goals" => prd.non_goals = body,
            "technical considerations" => prd.technical_considerations = body,
            "functional requirements" => prd.functional_requirements = body,
            "design considerations" => prd.design_considerations = body,
            "success metrics" => prd.success_metrics = body,
            "open questions" => prd.open_questions = body,
            "user stories" => {
                prd.stories = parse_stories(markdown, &heads, body_start, body_end);
            }
            _ => {} // unknown section: ignored without error
        }
    }

    prd
}

/// Byte offset of the end of the line containing `offset` (i.e. just past
/// the next `\n`, or end of string if there is none).
fn line_end(source: &str, offset: usize) -> usize {
    match source[offset..].find('\n') {
        Some(rel) => offset + rel + 1,
        None => source.len(),
    }
}

fn parse_stories(source: &str, heads: &[Heading], region_start: usize, region_end: usize) -> Vec<Story> {
    let sub_heads: Vec<&Heading> = heads
        .iter()
        .filter(|h| {
            h.start >= region_start
                && h.start < region_end
                && matches!(h.level, HeadingLevel::H3 | HeadingLevel::H4 | HeadingLevel::H5)
        })
        .collect();

    // Pre-scan every non-phase-marker heading's explicit `US-NNN` id (if
    // any) up front, so the sequential fallback counter below can skip ids
    // claimed anywhere in the document, not just ones already seen in
    // iteration order — an explicit id appearing *after* an id-less heading
    // must still not collide with it.
    let mut used_ids: std::collections::HashSet<String> = std::collections::HashSet::new();
    for h in &sub_heads {
        let stripped = strip_leading_checkmark(h.text.trim());
        if phase_marker_re().is_match(stripped) {
            continue;
        }
        if let Some(caps) = story_heading_re().captures(h.text.trim()) {
            used_ids.insert(caps.get(1).unwrap().as_str().to_string());
        }
    }

    let mut stories = Vec::new();
    let mut next_seq = 1u32;

    for (i, h) in sub_heads.iter().enumerate() {
        let block_start = h.start;
        let block_end = sub_heads
            .get(i + 1)
            .map(|next| next.start)
            .unwrap_or(region_end);
        let raw = source[block_start..block_end].trim_end().to_string();

        let heading_text = h.text.trim();
        let stripped = strip_leading_checkmark(heading_text);
        if phase_marker_re().is_match(stripped) {
            continue; // group header, not a story
        }

        let (id, title) = if let Some(caps) = story_heading_re().captures(heading_text) {
            (
                caps.get(1).unwrap().as_str().to_string(),
                caps.get(2).unwrap().as_str().trim().to_string(),
            )
        } else {
            // Advance past any id already claimed anywhere in the document
            // (explicit or previously-assigned sequential) so an id-less
            // heading never collapses onto another story in the `stories`
            // IndexMap (spec §8 "keys(initFromPrd(P).stories) =
            // ids(parse(P).stories)").
            let mut id = format!("US-{:03}", next_seq);
            while used_ids.contains(&id) {
                next_seq += 1;
                id = format!("US-{:03}", next_seq);
            }
            next_seq += 1;
            used_ids.insert(id.clone());
            (id, heading_text.trim_end_matches(':').trim().to_string())
        };

        let (description, acceptance_criteria) = parse_story_body(&raw);

        stories.push(Story {
            id,
            title,
            description,
            acceptance_criteria,
            raw,
        });
    }

    stories
}

/// Extract the `**Description:**` text and `**Acceptance Criteria:**`
/// bullets out of one story's raw Markdown block.
fn parse_story_body(raw: &str) -> (String, Vec<String>) {
    let description = extract_labeled_block(raw, "Description");
    let acceptance = extract_acceptance_criteria(raw);
    (description, acceptance)
}

fn extract_labeled_block(raw: &str, label: &str) -> String {
    let marker = format!("**{}:**", label);
    let Some(marker_pos) = raw.find(&marker) else {
        return String::new();
    };
    let after = &raw[marker_pos + marker.len()..];

    // Stop at the next blank line or the next "**Word:**" header, whichever
    // comes first.
    let mut end = after.len();
    if let Some(blank_rel) = after.find("\n\n") {
        end = end.min(blank_rel);
    }
    for line_start in line_starts(after) {
        if line_start == 0 {
            continue;
        }
        if header_marker_re().is_match(&after[line_start..]) {
            end = end.min(line_start);
            break;
        }
    }

    after[..end].trim().to_string()
}

fn extract_acceptance_criteria(raw: &str) -> Vec<String> {
    let marker = "**Acceptance Criteria:**";
    let Some(marker_pos) = raw.find(marker) else {
        return Vec::new();
    };
    let after = &raw[marker_pos + marker.len()..];

    let lines: Vec<&str> = after.lines().collect();
    let mut collected: Vec<&str> = Vec::new();

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        if line.trim().is_empty() {
            // Blank line: stop only if the *next* non-consumed line opens a
            // new "**Word:**" header; otherwise it's just a separator
            // within the list and gets dropped later anyway.
            if let Some(next) = lines.get(i + 1) {
                if header_marker_re().is_match(next) {
                    break;
                }
            }
            i += 1;
            continue;
        }
        collected.push(line);
        i += 1;
    }

    collected
        .into_iter()
        .map(|l| l.to_string())
        .filter(|l| !l.trim().is_empty())
        .collect()
}

/// Byte offsets (into `s`) where each line starts, including 0.
fn line_starts(s: &str) -> impl Iterator<Item = usize> + '_ {
    std::iter::once(0).chain(s.match_indices('\n').map(|(i, _)| i + 1))
}
