//! Sentence combiner
//!
//! Aggregates final recognizer segments into sentence-sized units for the
//! bilingual history and high-quality re-translation.

use crate::domain::models::{generate_id, CombinedSentence, TranscriptSegment};
use once_cell::sync::Lazy;
use regex::Regex;

static SENTENCE_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[.!?。．！？]["')\]」』]*\s*$"#).expect("sentence-end pattern"));

/// Tuning for sentence aggregation
#[derive(Debug, Clone)]
pub struct CombinerConfig {
    /// Segments required before timeout/size rules may fire
    pub min_segments: usize,
    /// Hard cap on buffered segments
    pub max_segments: usize,
    /// Emit when no further final segment arrives within this window
    pub timeout_ms: i64,
}

impl Default for CombinerConfig {
    fn default() -> Self {
        Self {
            min_segments: 2,
            max_segments: 10,
            timeout_ms: 2_000,
        }
    }
}

/// Buffers final segments until a sentence boundary is reached
pub struct SentenceCombiner {
    config: CombinerConfig,
    buffer: Vec<TranscriptSegment>,
    last_segment_at: i64,
}

impl SentenceCombiner {
    pub fn new(config: CombinerConfig) -> Self {
        Self {
            config,
            buffer: Vec::new(),
            last_segment_at: 0,
        }
    }

    /// Feed one final segment. Emits when the accumulated text ends a
    /// sentence or the buffer hits its cap.
    pub fn add_segment(
        &mut self,
        segment: &TranscriptSegment,
        now_ms: i64,
    ) -> Option<CombinedSentence> {
        debug_assert!(segment.is_final);
        self.buffer.push(segment.clone());
        self.last_segment_at = now_ms;

        if SENTENCE_END.is_match(&self.combined_text()) {
            return self.emit();
        }
        if self.buffer.len() >= self.config.max_segments {
            return self.emit();
        }
        None
    }

    /// Emit on inactivity once enough segments are buffered
    pub fn poll(&mut self, now_ms: i64) -> Option<CombinedSentence> {
        if self.buffer.len() >= self.config.min_segments
            && now_ms - self.last_segment_at >= self.config.timeout_ms
        {
            return self.emit();
        }
        None
    }

    /// Emit whatever is buffered, for session stop
    pub fn force_flush(&mut self) -> Option<CombinedSentence> {
        if self.buffer.is_empty() {
            None
        } else {
            self.emit()
        }
    }

    pub fn pending_count(&self) -> usize {
        self.buffer.len()
    }

    fn combined_text(&self) -> String {
        self.buffer
            .iter()
            .map(|s| s.text.trim())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn emit(&mut self) -> Option<CombinedSentence> {
        let original_text = self.combined_text();
        let segments = std::mem::take(&mut self.buffer);
        let first = segments.first()?;
        let last = segments.last()?;
        Some(CombinedSentence {
            combined_id: generate_id("combined"),
            segment_ids: segments.iter().map(|s| s.id.clone()).collect(),
            original_text,
            start_ms: first.start_ms,
            end_ms: last.end_ms,
            segment_count: segments.len(),
        })
    }
}
