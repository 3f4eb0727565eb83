//! Mock implementations for testing

use crate::error::{AppError, Result};
use crate::ports::asr::{
    AsrEventSink, AsrStream, ConnectionMetrics, StreamingAsrPort, TranscriptResult,
};
use crate::ports::llm::{ChatDeltaStream, ChatRequest, LlmServicePort};
use crate::ports::store::{SentenceEntry, SessionDescriptor, SessionStorePort, SummaryEntry};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// LLM mock that replays scripted responses and records requests
#[derive(Default)]
pub struct ScriptedLlm {
    responses: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<ChatRequest>>,
    fail_next: AtomicBool,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next response text
    pub fn push_response(&self, text: impl Into<String>) {
        self.responses.lock().unwrap().push_back(text.into());
    }

    /// Make the next call fail with an LLM error
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// All requests observed so far
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_response(&self) -> String {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| "mock output".to_string())
    }

    fn check_failure(&self) -> Result<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(AppError::Llm("scripted failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LlmServicePort for ScriptedLlm {
    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        self.check_failure()?;
        Ok(self.next_response())
    }

    async fn stream_chat(&self, request: &ChatRequest) -> Result<ChatDeltaStream> {
        self.requests.lock().unwrap().push(request.clone());
        self.check_failure()?;
        let text = self.next_response();
        let (tx, rx) = mpsc::channel(1024);
        for (i, word) in text.split_whitespace().enumerate() {
            let delta = if i == 0 {
                word.to_string()
            } else {
                format!(" {}", word)
            };
            let _ = tx.try_send(Ok(delta));
        }
        Ok(rx)
    }

    fn provider_name(&self) -> &str {
        "scripted"
    }

    fn is_configured(&self) -> bool {
        true
    }
}

/// ASR mock whose tests drive the sink directly
#[derive(Clone, Default)]
pub struct MockAsr {
    sink: Arc<Mutex<Option<Arc<dyn AsrEventSink>>>>,
    frames: Arc<Mutex<Vec<Vec<u8>>>>,
    fail_connect: Arc<AtomicBool>,
}

impl MockAsr {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next connect attempt fail
    pub fn fail_connect(&self) {
        self.fail_connect.store(true, Ordering::SeqCst);
    }

    /// Push a recognizer result through the attached sink
    pub async fn emit_transcript(&self, result: TranscriptResult) {
        let sink = self.sink.lock().unwrap().clone();
        if let Some(sink) = sink {
            sink.on_transcript(result).await;
        }
    }

    /// Push an utterance-end signal through the attached sink
    pub async fn emit_utterance_end(&self, last_word_end_ms: i64) {
        let sink = self.sink.lock().unwrap().clone();
        if let Some(sink) = sink {
            sink.on_utterance_end(last_word_end_ms).await;
        }
    }

    /// Audio frames received so far
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.frames.lock().unwrap().clone()
    }
}

#[async_trait]
impl StreamingAsrPort for MockAsr {
    async fn connect(
        &self,
        _source_language: &str,
        sink: Arc<dyn AsrEventSink>,
    ) -> Result<Box<dyn AsrStream>> {
        if self.fail_connect.swap(false, Ordering::SeqCst) {
            return Err(AppError::Transcription("mock connect failure".to_string()));
        }
        *self.sink.lock().unwrap() = Some(Arc::clone(&sink));
        sink.on_connected().await;
        Ok(Box::new(MockAsrStream {
            frames: Arc::clone(&self.frames),
            connected: true,
        }))
    }

    fn provider_name(&self) -> &str {
        "mock"
    }

    fn is_configured(&self) -> bool {
        true
    }
}

struct MockAsrStream {
    frames: Arc<Mutex<Vec<Vec<u8>>>>,
    connected: bool,
}

#[async_trait]
impl AsrStream for MockAsrStream {
    async fn send_audio(&mut self, frame: &[u8]) -> Result<()> {
        if self.connected {
            self.frames.lock().unwrap().push(frame.to_vec());
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn connection_metrics(&self) -> ConnectionMetrics {
        ConnectionMetrics {
            messages_sent: self.frames.lock().unwrap().len() as u64,
            ..ConnectionMetrics::default()
        }
    }
}

/// Vec-backed session store for tests
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    descriptors: Arc<Mutex<Vec<SessionDescriptor>>>,
    sentences: Arc<Mutex<Vec<SentenceEntry>>>,
    summaries: Arc<Mutex<Vec<SummaryEntry>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn descriptors(&self) -> Vec<SessionDescriptor> {
        self.descriptors.lock().unwrap().clone()
    }

    pub fn sentences(&self) -> Vec<SentenceEntry> {
        self.sentences.lock().unwrap().clone()
    }

    pub fn summaries(&self) -> Vec<SummaryEntry> {
        self.summaries.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionStorePort for MemorySessionStore {
    async fn begin_session(&self, descriptor: &SessionDescriptor) -> Result<()> {
        self.descriptors.lock().unwrap().push(descriptor.clone());
        Ok(())
    }

    async fn append_sentence(&self, _session_id: &str, entry: &SentenceEntry) -> Result<()> {
        self.sentences.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn append_summary(&self, _session_id: &str, entry: &SummaryEntry) -> Result<()> {
        self.summaries.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn end_session(&self, descriptor: &SessionDescriptor) -> Result<()> {
        self.descriptors.lock().unwrap().push(descriptor.clone());
        Ok(())
    }
}
