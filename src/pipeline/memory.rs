//! In-memory session history
//!
//! Accumulates final segments, translations, sentences, paragraphs and
//! summaries for one session and serves the sentence-grouped history
//! snapshot behind `getHistory`.

use crate::domain::language::count_source_units;
use crate::domain::models::{
    CombinedSentence, Paragraph, Summary, TranscriptSegment, Translation,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One sentence-grouped history row
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    pub source_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_text: Option<String>,
    pub timestamp: i64,
    pub segment_count: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryMetadata {
    pub total_segments: usize,
    pub total_sentences: usize,
    pub total_words: usize,
    pub duration_ms: i64,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySnapshot {
    pub entries: Vec<HistoryEntry>,
    pub metadata: HistoryMetadata,
}

/// Mutable per-session accumulation, owned by the orchestrator
#[derive(Default)]
pub struct SessionMemory {
    source_language: String,
    segments: Vec<TranscriptSegment>,
    translations: Vec<Translation>,
    summaries: Vec<Summary>,
    sentences: Vec<CombinedSentence>,
    paragraphs: Vec<Paragraph>,
    sentence_translations: HashMap<String, String>,
    total_words: usize,
    start_time: Option<i64>,
    end_time: Option<i64>,
}

impl SessionMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset and stamp the session start
    pub fn begin(&mut self, source_language: &str, start_time: i64) {
        *self = Self::default();
        self.source_language = source_language.to_string();
        self.start_time = Some(start_time);
    }

    pub fn end(&mut self, end_time: i64) {
        self.end_time = Some(end_time);
    }

    /// Record one final segment
    pub fn add_segment(&mut self, segment: TranscriptSegment) {
        debug_assert!(segment.is_final);
        self.total_words += count_source_units(&segment.text, &self.source_language);
        self.end_time = Some(segment.timestamp);
        self.segments.push(segment);
    }

    pub fn add_translation(&mut self, translation: Translation) {
        self.translations.push(translation);
    }

    pub fn add_sentence(&mut self, sentence: CombinedSentence) {
        self.sentences.push(sentence);
    }

    pub fn add_paragraph(&mut self, paragraph: Paragraph) {
        self.paragraphs.push(paragraph);
    }

    /// Attach a history-grade translation to its sentence
    pub fn attach_sentence_translation(&mut self, combined_id: &str, translated: &str) {
        self.sentence_translations
            .insert(combined_id.to_string(), translated.to_string());
    }

    /// Attach a history-grade translation to its paragraph
    pub fn attach_paragraph_translation(&mut self, paragraph_id: &str, translated: &str) {
        if let Some(paragraph) = self
            .paragraphs
            .iter_mut()
            .find(|p| p.paragraph_id == paragraph_id)
        {
            paragraph.translation = Some(translated.to_string());
        }
    }

    /// Record a produced summary; duplicate ids are ignored
    pub fn add_summary(&mut self, summary: Summary) {
        if self.summaries.iter().any(|s| s.id == summary.id) {
            return;
        }
        self.summaries.push(summary);
    }

    pub fn sentence(&self, combined_id: &str) -> Option<&CombinedSentence> {
        self.sentences.iter().find(|s| s.combined_id == combined_id)
    }

    pub fn summaries(&self) -> &[Summary] {
        &self.summaries
    }

    pub fn segments(&self) -> &[TranscriptSegment] {
        &self.segments
    }

    /// Full source transcript, in segment order
    pub fn transcript_text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.trim())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn total_words(&self) -> usize {
        self.total_words
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Sentence-grouped history with pagination and a metadata block
    pub fn get_full_history(&self, limit: usize, offset: usize) -> HistorySnapshot {
        let entries: Vec<HistoryEntry> = self
            .sentences
            .iter()
            .skip(offset)
            .take(limit)
            .map(|sentence| HistoryEntry {
                id: sentence.combined_id.clone(),
                source_text: sentence.original_text.clone(),
                target_text: self.sentence_translations.get(&sentence.combined_id).cloned(),
                timestamp: sentence.start_ms,
                segment_count: sentence.segment_count,
            })
            .collect();

        let duration_ms = match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => (end - start).max(0),
            _ => 0,
        };

        HistorySnapshot {
            entries,
            metadata: HistoryMetadata {
                total_segments: self.segments.len(),
                total_sentences: self.sentences.len(),
                total_words: self.total_words,
                duration_ms,
                start_time: self.start_time,
                end_time: self.end_time,
            },
        }
    }

    /// Wipe everything, including session timing
    pub fn clear(&mut self) {
        let source_language = std::mem::take(&mut self.source_language);
        *self = Self::default();
        self.source_language = source_language;
    }
}
