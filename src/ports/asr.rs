/// Streaming ASR port trait
///
/// Defines the interface for streaming speech recognition services.
/// Implementations: Deepgram
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One recognizer result, interim or final
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptResult {
    pub text: String,

    /// Confidence score (0.0 to 1.0)
    pub confidence: f32,

    /// True when the recognizer will not revise this text again
    pub is_final: bool,

    /// Start offset in milliseconds from stream start
    pub start_ms: i64,

    /// End offset in milliseconds from stream start
    pub end_ms: i64,

    /// Detected or configured language, if reported
    pub language: Option<String>,
}

/// Counters describing one streaming connection's lifetime
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub bytes_sent: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub reconnect_count: u32,
    /// Unix millis of the most recent successful connect
    pub last_connected_at: Option<i64>,
}

/// Sink for events produced by a streaming recognizer session
#[async_trait]
pub trait AsrEventSink: Send + Sync {
    /// Called for every result that carries non-empty text
    async fn on_transcript(&self, result: TranscriptResult);

    /// Called when the transport (re)connects
    async fn on_connected(&self);

    /// Called when the transport closes for good
    async fn on_disconnected(&self, close_code: Option<u16>, reason: String);

    /// Called on transport or parse errors
    async fn on_error(&self, code: &str, message: String, recoverable: bool);

    /// Provider metadata messages, passed through unchanged
    async fn on_metadata(&self, metadata: serde_json::Value);

    /// Utterance-end signals, passed through unchanged
    async fn on_utterance_end(&self, last_word_end_ms: i64);
}

/// Port trait for streaming recognizer services
#[async_trait]
pub trait StreamingAsrPort: Send + Sync {
    /// Open a streaming session; returns once the transport is ready
    async fn connect(
        &self,
        source_language: &str,
        sink: Arc<dyn AsrEventSink>,
    ) -> Result<Box<dyn AsrStream>>;

    /// Get the provider name
    fn provider_name(&self) -> &str;

    /// Check if the service is configured (has API key)
    fn is_configured(&self) -> bool;
}

/// Handle for an active streaming recognizer session
#[async_trait]
pub trait AsrStream: Send + Sync {
    /// Send a raw PCM frame; silently dropped when not connected
    async fn send_audio(&mut self, frame: &[u8]) -> Result<()>;

    /// Send graceful finalize/close control messages and release resources
    async fn disconnect(&mut self) -> Result<()>;

    /// Check if the transport is currently connected
    fn is_connected(&self) -> bool;

    /// Snapshot of connection counters
    fn connection_metrics(&self) -> ConnectionMetrics;
}
