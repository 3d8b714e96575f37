//! Small text helpers shared across the components that truncate
//! agent-supplied strings for display (spec §4.4–§4.6: 80/200/300/500-char
//! truncation points for tool summaries, error results, and key decisions).

/// Truncate `s` to at most `max` `char`s, appending `...` if anything was
/// cut. Cuts on a `char` boundary rather than a byte index, so a multi-byte
/// character straddling the cutoff can never produce a panic — agent output
/// is untrusted text and truncation must degrade gracefully (spec §7).
pub fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((byte_idx, _)) => format!("{}...", &s[..byte_idx]),
        None => s.to_string(),
    }
}
