/// LLM service port trait
///
/// Defines the interface for Large Language Model services.
/// Implementations: OpenAI
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// One chat completion request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Model name (e.g. "gpt-5-nano")
    pub model: String,

    /// Fully rendered prompt text
    pub prompt: String,

    /// Maximum tokens in the response
    pub max_tokens: u32,

    /// Temperature for generation (0.0 to 1.0)
    pub temperature: Option<f32>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            max_tokens,
            temperature: Some(0.3),
        }
    }
}

/// Streaming completion deltas. The channel closing marks completion;
/// an `Err` item carries a mid-stream failure.
pub type ChatDeltaStream = mpsc::Receiver<Result<String>>;

/// Port trait for LLM services
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LlmServicePort: Send + Sync {
    /// Run one completion to the end and return the full text
    async fn complete(&self, request: &ChatRequest) -> Result<String>;

    /// Run one completion in streaming mode, yielding text deltas
    async fn stream_chat(&self, request: &ChatRequest) -> Result<ChatDeltaStream>;

    /// Get the provider name
    fn provider_name(&self) -> &str;

    /// Check if the service is configured (has API key)
    fn is_configured(&self) -> bool;
}
