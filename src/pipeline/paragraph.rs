//! Paragraph builder
//!
//! Groups final segments into 20-60 s paragraphs for display-grade history.
//! A paragraph closes on its maximum duration, on a silence gap past the
//! minimum duration, or on a natural sentence break past the minimum
//! duration. Remaining content is force-flushed on session stop.

use crate::domain::models::{
    generate_id, Paragraph, ParagraphSegment, ParagraphStatus, TranscriptSegment,
};
use crate::utils::text::clean_transcript;
use once_cell::sync::Lazy;
use regex::Regex;

static BREAK_PUNCTUATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?。！？]\s*$").expect("break pattern"));

/// Tuning for paragraph aggregation
#[derive(Debug, Clone)]
pub struct ParagraphConfig {
    pub min_duration_ms: i64,
    pub max_duration_ms: i64,
    /// Silence gap that closes a paragraph once past the minimum duration
    pub silence_threshold_ms: i64,
    /// Text length required before a sentence break may close early
    pub min_chars_for_break: usize,
}

impl Default for ParagraphConfig {
    fn default() -> Self {
        Self {
            min_duration_ms: 20_000,
            max_duration_ms: 60_000,
            silence_threshold_ms: 2_000,
            min_chars_for_break: 200,
        }
    }
}

struct OpenParagraph {
    segments: Vec<ParagraphSegment>,
    start_time: i64,
    end_time: i64,
    last_segment_at: i64,
}

/// Windows final segments into paragraphs
pub struct ParagraphBuilder {
    config: ParagraphConfig,
    current: Option<OpenParagraph>,
}

impl ParagraphBuilder {
    pub fn new(config: ParagraphConfig) -> Self {
        Self {
            config,
            current: None,
        }
    }

    /// Feed one final segment. Returns a completed paragraph when the new
    /// segment closes the window (the segment then opens the next one) or
    /// when accumulation hits a close condition.
    pub fn add_segment(
        &mut self,
        segment: &TranscriptSegment,
        now_ms: i64,
    ) -> Option<Paragraph> {
        let mut closed = None;

        if let Some(current) = self.current.as_ref() {
            let gap = now_ms - current.last_segment_at;
            let elapsed = current.end_time - current.start_time;
            if gap >= self.config.silence_threshold_ms && elapsed >= self.config.min_duration_ms {
                closed = self.close();
            }
        }

        let entry = ParagraphSegment {
            id: segment.id.clone(),
            text: segment.text.clone(),
            start_ms: segment.start_ms,
            end_ms: segment.end_ms,
        };

        match self.current.as_mut() {
            Some(current) => {
                current.segments.push(entry);
                current.end_time = segment.timestamp;
                current.last_segment_at = now_ms;
            }
            None => {
                self.current = Some(OpenParagraph {
                    segments: vec![entry],
                    start_time: segment.timestamp,
                    end_time: segment.timestamp,
                    last_segment_at: now_ms,
                });
            }
        }

        if closed.is_some() {
            return closed;
        }

        let current = self.current.as_ref().expect("paragraph opened above");
        let elapsed = current.end_time - current.start_time;
        if elapsed >= self.config.max_duration_ms {
            return self.close();
        }
        if elapsed >= self.config.min_duration_ms {
            let raw = self.raw_text();
            if raw.len() >= self.config.min_chars_for_break && BREAK_PUNCTUATION.is_match(&raw) {
                return self.close();
            }
        }
        None
    }

    /// Close on silence without a new segment arriving, or on the
    /// wall-clock duration cap
    pub fn poll(&mut self, now_ms: i64) -> Option<Paragraph> {
        let current = self.current.as_ref()?;
        if now_ms - current.start_time >= self.config.max_duration_ms {
            return self.close();
        }
        let gap = now_ms - current.last_segment_at;
        let elapsed = current.end_time - current.start_time;
        if gap >= self.config.silence_threshold_ms && elapsed >= self.config.min_duration_ms {
            return self.close();
        }
        None
    }

    /// Close whatever is open, for session stop
    pub fn force_flush(&mut self) -> Option<Paragraph> {
        self.close()
    }

    pub fn has_open_paragraph(&self) -> bool {
        self.current.is_some()
    }

    fn raw_text(&self) -> String {
        self.current
            .as_ref()
            .map(|c| {
                c.segments
                    .iter()
                    .map(|s| s.text.trim())
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_default()
    }

    fn close(&mut self) -> Option<Paragraph> {
        let raw_text = self.raw_text();
        let current = self.current.take()?;
        let cleaned = clean_transcript(&raw_text);
        let cleaned_text = if cleaned.is_empty() || cleaned == raw_text {
            None
        } else {
            Some(cleaned)
        };
        Some(Paragraph {
            paragraph_id: generate_id("paragraph"),
            segments: current.segments,
            raw_text,
            cleaned_text,
            translation: None,
            status: ParagraphStatus::Completed,
            start_time: current.start_time,
            end_time: current.end_time,
        })
    }
}
