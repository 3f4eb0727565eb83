//! OpenAI LLM service adapter
//!
//! Implements the LlmServicePort for OpenAI's chat completions API in both
//! blocking and SSE-streaming modes.

use crate::error::{AppError, Result};
use crate::ports::llm::{ChatDeltaStream, ChatRequest, LlmServicePort};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// OpenAI service implementation
pub struct OpenAiService {
    client: Client,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

/// One parsed SSE line from the streaming endpoint
#[derive(Debug, PartialEq)]
enum StreamLine {
    Delta(String),
    Done,
    Skip,
}

fn parse_stream_line(line: &str) -> StreamLine {
    let line = line.trim();
    if line.is_empty() || !line.starts_with("data:") {
        return StreamLine::Skip;
    }
    let payload = line["data:".len()..].trim();
    if payload == "[DONE]" {
        return StreamLine::Done;
    }
    match serde_json::from_str::<ChatCompletionChunk>(payload) {
        Ok(chunk) => {
            let content = chunk
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.delta.content)
                .unwrap_or_default();
            if content.is_empty() {
                StreamLine::Skip
            } else {
                StreamLine::Delta(content)
            }
        }
        Err(e) => {
            log::warn!("Failed to parse stream chunk: {}", e);
            StreamLine::Skip
        }
    }
}

impl OpenAiService {
    /// Create a new OpenAI service with the given API key
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, OPENAI_API_BASE.to_string())
    }

    /// Create a service against a custom endpoint (tests, proxies)
    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            api_key,
            base_url,
        }
    }

    fn build_body(&self, request: &ChatRequest, stream: bool) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: request.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: request.prompt.clone(),
            }],
            temperature: request.temperature,
            max_tokens: Some(request.max_tokens),
            stream: stream.then_some(true),
        }
    }

    async fn post_completion(&self, body: &ChatCompletionRequest) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::Llm(format!("Chat completion request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Llm(format!(
                "Chat completion failed ({}): {}",
                status, error_text
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl LlmServicePort for OpenAiService {
    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        log::debug!("Calling OpenAI chat completion with model: {}", request.model);

        let body = self.build_body(request, false);
        let response = self.post_completion(&body).await?;

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| AppError::Llm(format!("Failed to parse completion response: {}", e)))?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();

        if content.is_empty() {
            return Err(AppError::Llm("No completion choices returned".to_string()));
        }

        log::debug!("OpenAI completion successful, {} characters", content.len());
        Ok(content)
    }

    async fn stream_chat(&self, request: &ChatRequest) -> Result<ChatDeltaStream> {
        log::debug!(
            "Calling OpenAI streaming completion with model: {}",
            request.model
        );

        let body = self.build_body(request, true);
        let response = self.post_completion(&body).await?;

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk) = stream.next().await {
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx
                            .send(Err(AppError::Llm(format!("Stream read failed: {}", e))))
                            .await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(pos) = buffer.find('\n') {
                    let line: String = buffer.drain(..=pos).collect();
                    match parse_stream_line(&line) {
                        StreamLine::Delta(content) => {
                            if tx.send(Ok(content)).await.is_err() {
                                // Receiver dropped, generation cancelled
                                return;
                            }
                        }
                        StreamLine::Done => return,
                        StreamLine::Skip => {}
                    }
                }
            }
        });

        Ok(rx)
    }

    fn provider_name(&self) -> &str {
        "openai"
    }

    fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_creation() {
        let service = OpenAiService::new("test_api_key".to_string());
        assert_eq!(service.provider_name(), "openai");
        assert!(service.is_configured());
    }

    #[test]
    fn test_service_not_configured() {
        let service = OpenAiService::new("".to_string());
        assert!(!service.is_configured());
    }

    #[test]
    fn test_build_body_streaming_flag() {
        let service = OpenAiService::new("k".to_string());
        let request = ChatRequest::new("gpt-5-nano", "translate this", 1500);
        let blocking = service.build_body(&request, false);
        assert!(blocking.stream.is_none());
        let streaming = service.build_body(&request, true);
        assert_eq!(streaming.stream, Some(true));
        assert_eq!(streaming.max_tokens, Some(1500));
    }

    #[test]
    fn test_parse_stream_line_delta() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#;
        assert_eq!(parse_stream_line(line), StreamLine::Delta("Hel".to_string()));
    }

    #[test]
    fn test_parse_stream_line_done() {
        assert_eq!(parse_stream_line("data: [DONE]"), StreamLine::Done);
    }

    #[test]
    fn test_parse_stream_line_skips_noise() {
        assert_eq!(parse_stream_line(""), StreamLine::Skip);
        assert_eq!(parse_stream_line(": keep-alive comment"), StreamLine::Skip);
        let empty_delta = r#"data: {"choices":[{"delta":{}}]}"#;
        assert_eq!(parse_stream_line(empty_delta), StreamLine::Skip);
    }
}
