//! Event contract between the pipeline core and its observers
//!
//! A single discriminated event family (`PipelineEvent`) flows outward and a
//! discriminated command family (`IpcCommand`) flows inward. Both are
//! validated at the process boundary: unknown discriminants or malformed
//! payloads are rejected before they reach the pipeline.

use crate::domain::models::VocabularyItem;
use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};

/// Stable error codes carried in `error` events
pub mod codes {
    pub const DEEPGRAM_CONNECTION_FAILED: &str = "DEEPGRAM_CONNECTION_FAILED";
    pub const TRANSLATION_FAILED: &str = "TRANSLATION_FAILED";
    pub const TRANSLATION_QUEUE_ERROR: &str = "TRANSLATION_QUEUE_ERROR";
    pub const PROGRESSIVE_SUMMARY_GENERATION_FAILED: &str =
        "PROGRESSIVE_SUMMARY_GENERATION_FAILED";
    pub const VOCABULARY_GENERATION_FAILED: &str = "VOCABULARY_GENERATION_FAILED";
    pub const FINAL_REPORT_GENERATION_FAILED: &str = "FINAL_REPORT_GENERATION_FAILED";
    pub const PARSE_ERROR: &str = "PARSE_ERROR";
    pub const INVALID_EVENT: &str = "INVALID_EVENT";
    pub const INVALID_COMMAND: &str = "INVALID_COMMAND";
    pub const PIPELINE_ERROR: &str = "PIPELINE_ERROR";
}

/// Observable pipeline states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Idle,
    Starting,
    Listening,
    Processing,
    Stopping,
    Error,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Starting => "starting",
            PipelineState::Listening => "listening",
            PipelineState::Processing => "processing",
            PipelineState::Stopping => "stopping",
            PipelineState::Error => "error",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsrData {
    pub text: String,
    pub confidence: f32,
    pub is_final: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub segment_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationData {
    pub original_text: String,
    pub translated_text: String,
    pub source_language: String,
    pub target_language: String,
    pub confidence: f32,
    pub is_final: bool,
    pub segment_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_high_quality: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_paragraph: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentStatus {
    Processing,
    Completed,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentData {
    pub segment_id: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translation: Option<String>,
    pub status: SegmentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinedSentenceData {
    pub combined_id: String,
    pub segment_ids: Vec<String>,
    pub original_text: String,
    pub start_ms: i64,
    pub end_ms: i64,
    pub segment_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParagraphCompleteData {
    pub paragraph_id: String,
    pub raw_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleaned_text: Option<String>,
    pub start_time: i64,
    pub end_time: i64,
    pub segment_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryData {
    pub source_text: String,
    pub target_text: String,
    pub source_language: String,
    pub target_language: String,
    pub word_count: u32,
    pub start_time: i64,
    pub end_time: i64,
    pub is_final: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressiveSummaryData {
    pub source_text: String,
    pub target_text: String,
    pub source_language: String,
    pub target_language: String,
    pub word_count: u32,
    /// Configured base threshold that fired
    pub threshold: u32,
    pub start_time: i64,
    pub end_time: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VocabularyData {
    pub items: Vec<VocabularyItem>,
    pub total_terms: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalReportData {
    pub report: String,
    pub total_word_count: u32,
    pub summary_count: usize,
    pub vocabulary_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorData {
    pub code: String,
    pub message: String,
    pub recoverable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusData {
    pub state: PipelineState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Type-specific payload of a pipeline event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum EventData {
    Asr(AsrData),
    Translation(TranslationData),
    Segment(SegmentData),
    CombinedSentence(CombinedSentenceData),
    ParagraphComplete(ParagraphCompleteData),
    Summary(SummaryData),
    ProgressiveSummary(ProgressiveSummaryData),
    Vocabulary(VocabularyData),
    FinalReport(FinalReportData),
    Error(ErrorData),
    Status(StatusData),
}

impl EventData {
    /// The wire discriminant for this payload
    pub fn type_name(&self) -> &'static str {
        match self {
            EventData::Asr(_) => "asr",
            EventData::Translation(_) => "translation",
            EventData::Segment(_) => "segment",
            EventData::CombinedSentence(_) => "combinedSentence",
            EventData::ParagraphComplete(_) => "paragraphComplete",
            EventData::Summary(_) => "summary",
            EventData::ProgressiveSummary(_) => "progressiveSummary",
            EventData::Vocabulary(_) => "vocabulary",
            EventData::FinalReport(_) => "finalReport",
            EventData::Error(_) => "error",
            EventData::Status(_) => "status",
        }
    }
}

/// One outward-facing pipeline event
///
/// Wire shape: `{type, data, timestamp, correlationId}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    #[serde(flatten)]
    pub data: EventData,
    pub timestamp: i64,
    #[serde(rename = "correlationId")]
    pub correlation_id: String,
}

impl PipelineEvent {
    pub fn new(correlation_id: impl Into<String>, data: EventData) -> Self {
        Self {
            data,
            timestamp: chrono::Utc::now().timestamp_millis(),
            correlation_id: correlation_id.into(),
        }
    }

    pub fn error(
        correlation_id: impl Into<String>,
        code: &str,
        message: impl Into<String>,
        recoverable: bool,
    ) -> Self {
        Self::new(
            correlation_id,
            EventData::Error(ErrorData {
                code: code.to_string(),
                message: message.into(),
                recoverable,
                details: None,
            }),
        )
    }

    pub fn status(
        correlation_id: impl Into<String>,
        state: PipelineState,
        details: Option<serde_json::Value>,
    ) -> Self {
        Self::new(correlation_id, EventData::Status(StatusData { state, details }))
    }

    /// Semantic checks beyond what serde enforces structurally
    pub fn validate(&self) -> Result<()> {
        if self.correlation_id.is_empty() {
            return Err(invalid_event("correlationId must be non-empty"));
        }
        if self.timestamp <= 0 {
            return Err(invalid_event("timestamp must be positive"));
        }
        match &self.data {
            EventData::Asr(data) => {
                validate_confidence(data.confidence)?;
                if data.segment_id.is_empty() {
                    return Err(invalid_event("asr.segmentId must be non-empty"));
                }
            }
            EventData::Translation(data) => {
                validate_confidence(data.confidence)?;
                if data.segment_id.is_empty() {
                    return Err(invalid_event("translation.segmentId must be non-empty"));
                }
            }
            EventData::CombinedSentence(data) => {
                if data.segment_count != data.segment_ids.len() {
                    return Err(invalid_event(
                        "combinedSentence.segmentCount must match segmentIds length",
                    ));
                }
            }
            EventData::Vocabulary(data) => {
                if data.total_terms != data.items.len() {
                    return Err(invalid_event(
                        "vocabulary.totalTerms must match items length",
                    ));
                }
            }
            EventData::Error(data) => {
                if data.code.is_empty() {
                    return Err(invalid_event("error.code must be non-empty"));
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Parse and validate an event at a process boundary
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        let event: PipelineEvent = serde_json::from_value(value)
            .map_err(|e| invalid_event(&format!("malformed event: {}", e)))?;
        event.validate()?;
        Ok(event)
    }
}

fn invalid_event(message: &str) -> AppError {
    AppError::InvalidInput(format!("{}: {}", codes::INVALID_EVENT, message))
}

fn validate_confidence(value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(invalid_event("confidence must be within [0, 1]"));
    }
    Ok(())
}

fn default_history_limit() -> usize {
    100
}

/// Inbound command family (UI -> core)
///
/// Wire shape: `{command, params}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", content = "params", rename_all = "camelCase")]
pub enum IpcCommand {
    #[serde(rename_all = "camelCase")]
    StartListening {
        source_language: String,
        target_language: String,
        correlation_id: String,
    },
    #[serde(rename_all = "camelCase")]
    StopListening { correlation_id: String },
    #[serde(rename_all = "camelCase")]
    GetHistory {
        #[serde(default = "default_history_limit")]
        limit: usize,
        #[serde(default)]
        offset: usize,
    },
    ClearHistory {},
    #[serde(rename_all = "camelCase")]
    GenerateVocabulary { correlation_id: String },
    #[serde(rename_all = "camelCase")]
    GenerateFinalReport { correlation_id: String },
    #[serde(rename_all = "camelCase")]
    TranslateParagraph {
        paragraph_id: String,
        source_text: String,
        source_language: String,
        target_language: String,
        correlation_id: String,
    },
}

impl IpcCommand {
    /// Semantic checks beyond what serde enforces structurally
    pub fn validate(&self) -> Result<()> {
        match self {
            IpcCommand::StartListening {
                source_language,
                target_language,
                correlation_id,
            } => {
                require_non_empty("sourceLanguage", source_language)?;
                require_non_empty("targetLanguage", target_language)?;
                require_non_empty("correlationId", correlation_id)?;
            }
            IpcCommand::StopListening { correlation_id }
            | IpcCommand::GenerateVocabulary { correlation_id }
            | IpcCommand::GenerateFinalReport { correlation_id } => {
                require_non_empty("correlationId", correlation_id)?;
            }
            IpcCommand::TranslateParagraph {
                paragraph_id,
                source_text,
                source_language,
                target_language,
                correlation_id,
            } => {
                require_non_empty("paragraphId", paragraph_id)?;
                require_non_empty("sourceText", source_text)?;
                require_non_empty("sourceLanguage", source_language)?;
                require_non_empty("targetLanguage", target_language)?;
                require_non_empty("correlationId", correlation_id)?;
            }
            IpcCommand::GetHistory { .. } | IpcCommand::ClearHistory {} => {}
        }
        Ok(())
    }

    /// Parse and validate a command at a process boundary
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        let command: IpcCommand = serde_json::from_value(value).map_err(|e| {
            AppError::InvalidInput(format!("{}: malformed command: {}", codes::INVALID_COMMAND, e))
        })?;
        command.validate()?;
        Ok(command)
    }
}

fn require_non_empty(name: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(AppError::InvalidInput(format!(
            "{}: {} must be non-empty",
            codes::INVALID_COMMAND,
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_round_trip() {
        let event = PipelineEvent::new(
            "corr-1",
            EventData::Asr(AsrData {
                text: "hello".to_string(),
                confidence: 0.92,
                is_final: false,
                language: Some("en".to_string()),
                segment_id: "segment_1".to_string(),
            }),
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "asr");
        assert_eq!(value["data"]["isFinal"], false);
        assert_eq!(value["correlationId"], "corr-1");

        let parsed = PipelineEvent::from_json(value).unwrap();
        assert_eq!(parsed.correlation_id, "corr-1");
        assert_eq!(parsed.data.type_name(), "asr");
    }

    #[test]
    fn test_unknown_event_type_rejected() {
        let value = json!({
            "type": "mystery",
            "data": {},
            "timestamp": 1,
            "correlationId": "corr-1"
        });
        assert!(PipelineEvent::from_json(value).is_err());
    }

    #[test]
    fn test_out_of_range_confidence_rejected() {
        let value = json!({
            "type": "asr",
            "data": {
                "text": "hello",
                "confidence": 1.5,
                "isFinal": true,
                "segmentId": "segment_1"
            },
            "timestamp": 1,
            "correlationId": "corr-1"
        });
        assert!(PipelineEvent::from_json(value).is_err());
    }

    #[test]
    fn test_camel_case_discriminants() {
        let event = PipelineEvent::new(
            "corr-1",
            EventData::CombinedSentence(CombinedSentenceData {
                combined_id: "combined_1".to_string(),
                segment_ids: vec!["a".to_string(), "b".to_string()],
                original_text: "Life asks questions.".to_string(),
                start_ms: 0,
                end_ms: 2000,
                segment_count: 2,
            }),
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "combinedSentence");
        assert_eq!(value["data"]["combinedId"], "combined_1");
        assert_eq!(value["data"]["segmentCount"], 2);
    }

    #[test]
    fn test_command_parse_with_defaults() {
        let command = IpcCommand::from_json(json!({
            "command": "getHistory",
            "params": {}
        }))
        .unwrap();
        match command {
            IpcCommand::GetHistory { limit, offset } => {
                assert_eq!(limit, 100);
                assert_eq!(offset, 0);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_command_rejects_empty_correlation() {
        let result = IpcCommand::from_json(json!({
            "command": "startListening",
            "params": {
                "sourceLanguage": "en",
                "targetLanguage": "ja",
                "correlationId": ""
            }
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_command_rejected() {
        assert!(IpcCommand::from_json(json!({
            "command": "selfDestruct",
            "params": {}
        }))
        .is_err());
    }

    #[test]
    fn test_status_event_details() {
        let event = PipelineEvent::status(
            "corr-1",
            PipelineState::Listening,
            Some(json!({"previousState": "starting", "uptimeMs": 12})),
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "status");
        assert_eq!(value["data"]["state"], "listening");
        assert_eq!(value["data"]["details"]["previousState"], "starting");
    }
}
