//! Text-cleaning helpers for display-grade history
//!
//! Cleaning is best-effort and must never change semantic content: it
//! strips common spoken fillers, collapses immediately repeated tokens and
//! capitalizes sentence-initial words.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

static FILLER_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(um+|uh+|ah+|er+|you know)\b[,]?\s*|\blike,\s+").expect("filler pattern")
});

static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").expect("space pattern"));

/// Strip spoken fillers and tidy the remaining text
pub fn clean_transcript(raw: &str) -> String {
    let without_fillers = FILLER_PATTERN.replace_all(raw, "");
    let collapsed = collapse_repeated_tokens(&without_fillers);
    let spaced = MULTI_SPACE.replace_all(&collapsed, " ");
    capitalize_sentences(spaced.trim())
}

/// Collapse immediately repeated tokens ("the the" -> "the")
fn collapse_repeated_tokens(text: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for token in text.split_whitespace() {
        if let Some(last) = out.last() {
            if last.eq_ignore_ascii_case(token.trim_end_matches([',', '.'])) {
                continue;
            }
        }
        out.push(token);
    }
    out.join(" ")
}

/// Capitalize the first letter of each sentence
fn capitalize_sentences(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut at_sentence_start = true;
    for c in text.chars() {
        if at_sentence_start && c.is_alphabetic() {
            out.extend(c.to_uppercase());
            at_sentence_start = false;
        } else {
            if matches!(c, '.' | '!' | '?' | '。' | '！' | '？') {
                at_sentence_start = true;
            }
            out.push(c);
        }
    }
    out
}

/// Stable key identifying a segment across interim revisions.
///
/// Interim revisions of one recognizer turn share `start_ms` while the end
/// keeps growing, so the start anchors the turn's logical identity. Falls
/// back to receive time plus a text hash when timing is absent.
pub fn segment_key(start_ms: i64, end_ms: i64, timestamp: i64, text: &str) -> String {
    if start_ms >= 0 && end_ms > start_ms {
        format!("turn-{}", start_ms)
    } else {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        format!("{}-{:x}", timestamp, hasher.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_fillers() {
        let cleaned = clean_transcript("um so this is, uh, the result you know");
        assert!(!cleaned.to_lowercase().contains("um"));
        assert!(!cleaned.to_lowercase().contains("uh"));
        assert!(!cleaned.to_lowercase().contains("you know"));
        assert!(cleaned.contains("the result"));
    }

    #[test]
    fn test_collapses_repeated_tokens() {
        let cleaned = clean_transcript("the the quick brown fox");
        assert_eq!(cleaned, "The quick brown fox");
    }

    #[test]
    fn test_capitalizes_sentence_starts() {
        let cleaned = clean_transcript("first point. second point.");
        assert_eq!(cleaned, "First point. Second point.");
    }

    #[test]
    fn test_preserves_content_words() {
        let cleaned = clean_transcript("entropy is a measure of disorder");
        assert_eq!(cleaned, "Entropy is a measure of disorder");
    }

    #[test]
    fn test_segment_key_anchors_on_turn_start() {
        assert_eq!(segment_key(100, 600, 1234, "hello"), "turn-100");
        // A growing end keeps the same identity
        assert_eq!(segment_key(100, 900, 1300, "hello there"), "turn-100");
    }

    #[test]
    fn test_segment_key_falls_back_to_hash() {
        let a = segment_key(0, 0, 1234, "hello");
        let b = segment_key(0, 0, 1234, "world");
        assert_ne!(a, b);
        assert!(a.starts_with("1234-"));
    }
}
