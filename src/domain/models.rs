/// Domain models for the UniVoice pipeline
///
/// These models represent core pipeline entities and are platform-agnostic.
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a session-unique id with the given prefix
pub fn generate_id(prefix: &str) -> String {
    let n = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}_{}_{}", prefix, chrono::Utc::now().timestamp_millis(), n)
}

/// One recognizer-produced transcript unit; may be interim or final
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub id: String,
    pub text: String,
    /// Confidence score (0.0 to 1.0)
    pub confidence: f32,
    pub is_final: bool,
    /// Start offset in milliseconds from stream start
    pub start_ms: i64,
    /// End offset in milliseconds from stream start
    pub end_ms: i64,
    pub language: Option<String>,
    /// Wall-clock receive time (Unix millis)
    pub timestamp: i64,
}

impl TranscriptSegment {
    pub fn new(text: String, confidence: f32, is_final: bool, start_ms: i64, end_ms: i64) -> Self {
        Self {
            id: generate_id("segment"),
            text,
            confidence,
            is_final,
            start_ms,
            end_ms,
            language: None,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language = language;
        self
    }
}

/// Settled UI-facing view of a segment after debouncing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoalescedSegment {
    pub segment_key: String,
    pub text: String,
    pub translation: Option<String>,
    pub is_final: bool,
    /// Milliseconds the update spent held before emission
    pub hold_duration_ms: i64,
    /// Wall-clock time at which the segment settled (Unix millis)
    pub settled_at: i64,
}

/// Sentence-scoped aggregation of contiguous final segments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombinedSentence {
    pub combined_id: String,
    pub segment_ids: Vec<String>,
    pub original_text: String,
    pub start_ms: i64,
    pub end_ms: i64,
    pub segment_count: usize,
}

/// Lifecycle of a paragraph aggregation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParagraphStatus {
    Collecting,
    Processing,
    Completed,
}

/// Compact descriptor of a segment inside a paragraph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParagraphSegment {
    pub id: String,
    pub text: String,
    pub start_ms: i64,
    pub end_ms: i64,
}

/// 20-60 s aggregation of segments for readable history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paragraph {
    pub paragraph_id: String,
    pub segments: Vec<ParagraphSegment>,
    pub raw_text: String,
    pub cleaned_text: Option<String>,
    pub translation: Option<String>,
    pub status: ParagraphStatus,
    /// Wall-clock start (Unix millis)
    pub start_time: i64,
    /// Wall-clock end (Unix millis)
    pub end_time: i64,
}

/// Quality tier of a translation artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranslationTier {
    Realtime,
    History,
}

/// A single translated artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Translation {
    pub id: String,
    pub original: String,
    pub translated: String,
    pub source_language: String,
    pub target_language: String,
    pub confidence: f32,
    pub is_final: bool,
    pub timestamp: i64,
    pub tier: TranslationTier,
}

impl Translation {
    pub fn new(
        original: String,
        translated: String,
        source_language: String,
        target_language: String,
        tier: TranslationTier,
    ) -> Self {
        Self {
            id: generate_id("translation"),
            original,
            translated,
            source_language,
            target_language,
            confidence: 1.0,
            is_final: true,
            timestamp: chrono::Utc::now().timestamp_millis(),
            tier,
        }
    }
}

/// A progressive or final summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub id: String,
    pub source_text: String,
    pub target_text: String,
    /// Cumulative source word count at generation time
    pub word_count: u32,
    /// Configured base threshold that fired, if progressive
    pub threshold: Option<u32>,
    pub start_time: i64,
    pub end_time: i64,
    pub is_final: bool,
}

/// One extracted vocabulary term
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VocabularyItem {
    pub term: String,
    pub definition: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// Priority class for queued translation work
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranslationPriority {
    Low,
    Normal,
    High,
}

/// One unit of work for the translation queue
#[derive(Debug, Clone)]
pub struct TranslationRequest {
    pub segment_id: String,
    pub original_text: String,
    pub source_language: String,
    pub target_language: String,
    pub timestamp: i64,
    pub priority: TranslationPriority,
    pub attempts: u32,
    pub correlation_id: String,
}

impl TranslationRequest {
    pub fn new(
        segment_id: String,
        original_text: String,
        source_language: String,
        target_language: String,
        priority: TranslationPriority,
        correlation_id: String,
    ) -> Self {
        Self {
            segment_id,
            original_text,
            source_language,
            target_language,
            timestamp: chrono::Utc::now().timestamp_millis(),
            priority,
            attempts: 0,
            correlation_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id_is_unique() {
        let a = generate_id("segment");
        let b = generate_id("segment");
        assert_ne!(a, b);
        assert!(a.starts_with("segment_"));
    }

    #[test]
    fn test_priority_ordering() {
        assert!(TranslationPriority::High > TranslationPriority::Normal);
        assert!(TranslationPriority::Normal > TranslationPriority::Low);
    }

    #[test]
    fn test_segment_constructor() {
        let segment = TranscriptSegment::new("hello".to_string(), 0.9, true, 0, 500);
        assert!(segment.is_final);
        assert_eq!(segment.end_ms, 500);
        assert!(segment.language.is_none());
    }
}
