//! Deepgram streaming transcription adapter
//!
//! Maintains one long-lived streaming recognizer connection per session over
//! Deepgram's WebSocket API, with keep-alive, idle silence injection and
//! bounded reconnection.
//! Reference: https://developers.deepgram.com/docs/live-streaming-audio

use crate::config::{AudioConfig, RecognizerConfig};
use crate::domain::events::codes;
use crate::error::{AppError, Result};
use crate::ports::asr::{
    AsrEventSink, AsrStream, ConnectionMetrics, StreamingAsrPort, TranscriptResult,
};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

const DEEPGRAM_STREAMING_URL: &str = "wss://api.deepgram.com/v1/listen";

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);
/// Inject silence when no audio has been sent for this long
const SILENCE_AFTER: Duration = Duration::from_secs(9);
/// Duration of the injected zero-PCM frame
const SILENCE_FRAME_MS: u64 = 200;

const MAX_RECONNECT_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 1_000;
const MAX_BACKOFF_MS: u64 = 30_000;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Connection lifecycle of one streaming session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

/// Diagnostic classification of WebSocket close codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCodeClass {
    Normal,
    GoingAway,
    Protocol,
    Policy,
    Payload,
    ServerError,
    ServiceRestart,
    TryAgainLater,
    /// Deepgram-specific 4xxx codes
    Provider,
    Unknown,
}

pub fn classify_close_code(code: u16) -> CloseCodeClass {
    match code {
        1000 => CloseCodeClass::Normal,
        1001 => CloseCodeClass::GoingAway,
        1002 | 1003 | 1007 => CloseCodeClass::Protocol,
        1008 => CloseCodeClass::Policy,
        1009 => CloseCodeClass::Payload,
        1011 => CloseCodeClass::ServerError,
        1012 => CloseCodeClass::ServiceRestart,
        1013 => CloseCodeClass::TryAgainLater,
        4000..=4999 => CloseCodeClass::Provider,
        _ => CloseCodeClass::Unknown,
    }
}

/// Whether a close warrants a reconnect attempt.
///
/// Clean closes end the session; protocol, policy and provider codes mean
/// the server rejected the stream deliberately and a retry would repeat
/// the rejection. A missing code is a dirty drop and always retryable.
pub fn close_code_is_recoverable(code: Option<u16>) -> bool {
    match code {
        None => true,
        Some(code) => matches!(
            classify_close_code(code),
            CloseCodeClass::Payload
                | CloseCodeClass::ServerError
                | CloseCodeClass::ServiceRestart
                | CloseCodeClass::TryAgainLater
                | CloseCodeClass::Unknown
        ),
    }
}

/// Deepgram adapter implementing the streaming ASR port
pub struct DeepgramAdapter {
    config: RecognizerConfig,
    audio: AudioConfig,
}

impl DeepgramAdapter {
    pub fn new(config: RecognizerConfig, audio: AudioConfig) -> Self {
        Self { config, audio }
    }
}

#[async_trait]
impl StreamingAsrPort for DeepgramAdapter {
    async fn connect(
        &self,
        source_language: &str,
        sink: Arc<dyn AsrEventSink>,
    ) -> Result<Box<dyn AsrStream>> {
        let url = build_stream_url(&self.config, &self.audio, source_language);
        log::info!("Connecting to Deepgram WebSocket: {}", url);

        let shared = Arc::new(StreamShared {
            url,
            api_key: self.config.api_key.clone(),
            sink,
            sender: tokio::sync::Mutex::new(None),
            state: Mutex::new(ConnectionState::Connecting),
            metrics: Mutex::new(ConnectionMetrics::default()),
            last_audio_at: Mutex::new(Instant::now()),
            closing: AtomicBool::new(false),
            silence_frame_len: silence_frame_len(self.audio.sample_rate),
        });

        let ws_stream = open_socket(&shared.url, &shared.api_key).await?;
        let (write, read) = ws_stream.split();
        *shared.sender.lock().await = Some(write);
        shared.set_state(ConnectionState::Connected);
        shared.mark_connected();
        shared.sink.on_connected().await;
        log::info!("Connected to Deepgram WebSocket");

        let reader_task = tokio::spawn(reader_loop(Arc::clone(&shared), read));
        let keepalive_task = tokio::spawn(keepalive_loop(Arc::clone(&shared)));

        Ok(Box::new(DeepgramStream {
            shared,
            reader_task: Some(reader_task),
            keepalive_task: Some(keepalive_task),
        }))
    }

    fn provider_name(&self) -> &str {
        "deepgram"
    }

    fn is_configured(&self) -> bool {
        !self.config.api_key.is_empty()
    }
}

/// Active Deepgram streaming session
pub struct DeepgramStream {
    shared: Arc<StreamShared>,
    reader_task: Option<tokio::task::JoinHandle<()>>,
    keepalive_task: Option<tokio::task::JoinHandle<()>>,
}

struct StreamShared {
    url: String,
    api_key: String,
    sink: Arc<dyn AsrEventSink>,
    sender: tokio::sync::Mutex<Option<WsSink>>,
    state: Mutex<ConnectionState>,
    metrics: Mutex<ConnectionMetrics>,
    last_audio_at: Mutex<Instant>,
    closing: AtomicBool,
    silence_frame_len: usize,
}

impl StreamShared {
    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap() = state;
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    fn mark_connected(&self) {
        let mut metrics = self.metrics.lock().unwrap();
        metrics.last_connected_at = Some(chrono::Utc::now().timestamp_millis());
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AsrStream for DeepgramStream {
    async fn send_audio(&mut self, frame: &[u8]) -> Result<()> {
        let mut sender = self.shared.sender.lock().await;
        match sender.as_mut() {
            Some(ws) => match ws.send(Message::Binary(frame.to_vec())).await {
                Ok(()) => {
                    let mut metrics = self.shared.metrics.lock().unwrap();
                    metrics.bytes_sent += frame.len() as u64;
                    metrics.messages_sent += 1;
                    drop(metrics);
                    *self.shared.last_audio_at.lock().unwrap() = Instant::now();
                }
                Err(e) => {
                    // Reconnection is the reader task's job; audio during
                    // the gap is dropped by contract.
                    log::debug!("Dropping audio frame, send failed: {}", e);
                }
            },
            None => {
                log::trace!("Dropping audio frame: not connected");
            }
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        log::info!("Closing Deepgram streaming session");
        self.shared.closing.store(true, Ordering::SeqCst);

        if let Some(task) = self.keepalive_task.take() {
            task.abort();
        }

        {
            let mut sender = self.shared.sender.lock().await;
            if let Some(mut ws) = sender.take() {
                let _ = ws
                    .send(Message::Text(r#"{"type":"CloseStream"}"#.to_string()))
                    .await;
                let _ = ws.send(Message::Close(None)).await;
                let _ = ws.close().await;
            }
        }

        if let Some(task) = self.reader_task.take() {
            let _ = task.await;
        }

        self.shared.set_state(ConnectionState::Closed);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.shared.state() == ConnectionState::Connected
    }

    fn connection_metrics(&self) -> ConnectionMetrics {
        self.shared.metrics.lock().unwrap().clone()
    }
}

impl Drop for DeepgramStream {
    fn drop(&mut self) {
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        if let Some(task) = self.keepalive_task.take() {
            task.abort();
        }
    }
}

async fn open_socket(url: &str, api_key: &str) -> Result<WsStream> {
    let request = tokio_tungstenite::tungstenite::http::Request::builder()
        .uri(url)
        .header("Authorization", format!("Token {}", api_key))
        .body(())
        .map_err(|e| AppError::Transcription(format!("Failed to build request: {}", e)))?;

    let (ws_stream, _) = connect_async(request)
        .await
        .map_err(|e| AppError::Transcription(format!("WebSocket connection failed: {}", e)))?;

    Ok(ws_stream)
}

async fn reader_loop(shared: Arc<StreamShared>, mut read: WsSource) {
    loop {
        let mut close_code: Option<u16> = None;
        let mut close_reason = String::new();
        let mut saw_close = false;

        while let Some(message) = read.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    shared.metrics.lock().unwrap().messages_received += 1;
                    dispatch_message(&shared, &text).await;
                }
                Ok(Message::Close(frame)) => {
                    close_code = frame.as_ref().map(|f| u16::from(f.code));
                    close_reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                    saw_close = true;
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    if !shared.is_closing() {
                        log::error!("WebSocket error: {}", e);
                        shared
                            .sink
                            .on_error(codes::DEEPGRAM_CONNECTION_FAILED, e.to_string(), true)
                            .await;
                    }
                    break;
                }
            }
        }

        if shared.is_closing() {
            shared.set_state(ConnectionState::Closed);
            return;
        }

        if saw_close {
            let class = close_code.map(classify_close_code);
            log::warn!(
                "Deepgram WebSocket closed: code={:?} class={:?} reason={:?}",
                close_code,
                class,
                close_reason
            );
        }

        if saw_close && !close_code_is_recoverable(close_code) {
            shared.set_state(ConnectionState::Closed);
            shared.sink.on_disconnected(close_code, close_reason).await;
            return;
        }

        match try_reconnect(&shared).await {
            Some(new_read) => {
                read = new_read;
            }
            None => {
                shared.set_state(ConnectionState::Closed);
                if !shared.is_closing() {
                    shared
                        .sink
                        .on_disconnected(close_code, "reconnect attempts exhausted".to_string())
                        .await;
                }
                return;
            }
        }
    }
}

/// Bounded reconnection with exponential backoff (1 s doubling, 30 s cap)
async fn try_reconnect(shared: &Arc<StreamShared>) -> Option<WsSource> {
    shared.set_state(ConnectionState::Reconnecting);
    shared.sender.lock().await.take();

    let mut backoff_ms = INITIAL_BACKOFF_MS;
    for attempt in 1..=MAX_RECONNECT_ATTEMPTS {
        if shared.is_closing() {
            return None;
        }
        log::warn!(
            "Reconnecting to Deepgram (attempt {}/{}) in {} ms",
            attempt,
            MAX_RECONNECT_ATTEMPTS,
            backoff_ms
        );
        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
        backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);

        if shared.is_closing() {
            return None;
        }

        match open_socket(&shared.url, &shared.api_key).await {
            Ok(ws_stream) => {
                let (write, read) = ws_stream.split();
                *shared.sender.lock().await = Some(write);
                {
                    let mut metrics = shared.metrics.lock().unwrap();
                    metrics.reconnect_count += 1;
                    metrics.last_connected_at = Some(chrono::Utc::now().timestamp_millis());
                }
                shared.set_state(ConnectionState::Connected);
                shared.sink.on_connected().await;
                log::info!("Reconnected to Deepgram");
                return Some(read);
            }
            Err(e) => {
                let recoverable = attempt < MAX_RECONNECT_ATTEMPTS;
                log::error!("Reconnect attempt {} failed: {}", attempt, e);
                shared
                    .sink
                    .on_error(codes::DEEPGRAM_CONNECTION_FAILED, e.to_string(), recoverable)
                    .await;
            }
        }
    }
    None
}

async fn keepalive_loop(shared: Arc<StreamShared>) {
    let mut interval = tokio::time::interval(KEEPALIVE_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        if shared.is_closing() {
            return;
        }
        if shared.state() != ConnectionState::Connected {
            continue;
        }

        {
            let mut sender = shared.sender.lock().await;
            if let Some(ws) = sender.as_mut() {
                if let Err(e) = ws
                    .send(Message::Text(r#"{"type":"KeepAlive"}"#.to_string()))
                    .await
                {
                    log::debug!("Keep-alive send failed: {}", e);
                    continue;
                }
            }
        }

        let idle = shared.last_audio_at.lock().unwrap().elapsed();
        if idle >= SILENCE_AFTER {
            log::debug!("No audio for {:?}, injecting silence frame", idle);
            let frame = vec![0u8; shared.silence_frame_len];
            let mut sender = shared.sender.lock().await;
            if let Some(ws) = sender.as_mut() {
                if ws.send(Message::Binary(frame)).await.is_ok() {
                    *shared.last_audio_at.lock().unwrap() = Instant::now();
                }
            }
        }
    }
}

async fn dispatch_message(shared: &Arc<StreamShared>, text: &str) {
    match parse_message(text) {
        Ok(DeepgramMessage::Transcript(result)) => {
            shared.sink.on_transcript(result).await;
        }
        Ok(DeepgramMessage::Metadata(value)) => {
            shared.sink.on_metadata(value).await;
        }
        Ok(DeepgramMessage::UtteranceEnd { last_word_end_ms }) => {
            shared.sink.on_utterance_end(last_word_end_ms).await;
        }
        Ok(DeepgramMessage::Ignored) => {}
        Err(e) => {
            log::warn!("Failed to parse Deepgram message: {}", e);
            shared
                .sink
                .on_error(codes::PARSE_ERROR, e.to_string(), true)
                .await;
        }
    }
}

/// One parsed upstream message
#[derive(Debug)]
enum DeepgramMessage {
    Transcript(TranscriptResult),
    Metadata(serde_json::Value),
    UtteranceEnd { last_word_end_ms: i64 },
    /// Results with empty transcript, speech events, and other chatter
    Ignored,
}

fn parse_message(text: &str) -> Result<DeepgramMessage> {
    let response: DeepgramStreamingResponse = serde_json::from_str(text)?;

    match response.message_type.as_deref() {
        Some("Results") | None => {
            if let Some(channel) = response.channel {
                if let Some(alternative) = channel.alternatives.into_iter().next() {
                    if !alternative.transcript.is_empty() {
                        let start = response.start.unwrap_or(0.0);
                        let duration = response.duration.unwrap_or(0.0);
                        return Ok(DeepgramMessage::Transcript(TranscriptResult {
                            text: alternative.transcript,
                            confidence: alternative.confidence.clamp(0.0, 1.0),
                            is_final: response.is_final.unwrap_or(false),
                            start_ms: (start * 1000.0) as i64,
                            end_ms: ((start + duration) * 1000.0) as i64,
                            language: alternative.languages.and_then(|l| l.into_iter().next()),
                        }));
                    }
                }
            }
            Ok(DeepgramMessage::Ignored)
        }
        Some("Metadata") => Ok(DeepgramMessage::Metadata(serde_json::from_str(text)?)),
        Some("UtteranceEnd") => Ok(DeepgramMessage::UtteranceEnd {
            last_word_end_ms: (response.last_word_end.unwrap_or(0.0) * 1000.0) as i64,
        }),
        Some(_) => Ok(DeepgramMessage::Ignored),
    }
}

/// Resolve the language query parameter for the configured model.
///
/// Third-generation models only accept "en" or the generic "multi" code;
/// older models take the language directly.
fn language_param<'a>(model: &str, source_language: &'a str) -> &'a str {
    if model.starts_with("nova-3") && source_language != "en" {
        "multi"
    } else {
        source_language
    }
}

fn build_stream_url(config: &RecognizerConfig, audio: &AudioConfig, source_language: &str) -> String {
    let mut url = format!(
        "{}?model={}&language={}",
        DEEPGRAM_STREAMING_URL,
        config.model,
        language_param(&config.model, source_language)
    );

    if config.interim {
        url.push_str("&interim_results=true");
    }
    url.push_str(&format!("&endpointing={}", config.endpointing_ms));
    url.push_str(&format!("&utterance_end_ms={}", config.utterance_end_ms));

    if config.smart_format {
        if config.no_delay {
            log::warn!("smart_format=true precludes no_delay; ignoring no_delay");
        }
        url.push_str("&smart_format=true");
    } else if config.no_delay {
        url.push_str("&no_delay=true");
    }

    url.push_str("&punctuate=true");
    url.push_str(&format!(
        "&encoding=linear16&sample_rate={}&channels=1",
        audio.sample_rate
    ));
    url
}

/// Bytes of zero-PCM covering SILENCE_FRAME_MS at the given rate (s16le mono)
fn silence_frame_len(sample_rate: u32) -> usize {
    (sample_rate as u64 * 2 * SILENCE_FRAME_MS / 1000) as usize
}

// ===== Deepgram Streaming API Response Types =====

#[derive(Debug, Deserialize)]
struct DeepgramStreamingResponse {
    #[serde(rename = "type")]
    message_type: Option<String>,
    channel: Option<Channel>,
    is_final: Option<bool>,
    start: Option<f64>,
    duration: Option<f64>,
    last_word_end: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Channel {
    alternatives: Vec<Alternative>,
}

#[derive(Debug, Deserialize)]
struct Alternative {
    transcript: String,
    confidence: f32,
    languages: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> (RecognizerConfig, AudioConfig) {
        let mut config = RecognizerConfig::default();
        config.api_key = "test_key".to_string();
        (config, AudioConfig::default())
    }

    #[test]
    fn test_adapter_configuration() {
        let (config, audio) = test_config();
        let adapter = DeepgramAdapter::new(config, audio);
        assert_eq!(adapter.provider_name(), "deepgram");
        assert!(adapter.is_configured());
    }

    #[test]
    fn test_url_uses_multi_for_non_english_on_nova3() {
        let (config, audio) = test_config();
        let url = build_stream_url(&config, &audio, "ja");
        assert!(url.contains("model=nova-3"));
        assert!(url.contains("language=multi"));
    }

    #[test]
    fn test_url_keeps_language_for_english_and_older_models() {
        let (mut config, audio) = test_config();
        assert!(build_stream_url(&config, &audio, "en").contains("language=en"));
        config.model = "nova-2".to_string();
        assert!(build_stream_url(&config, &audio, "ja").contains("language=ja"));
    }

    #[test]
    fn test_url_carries_timing_parameters() {
        let (config, audio) = test_config();
        let url = build_stream_url(&config, &audio, "en");
        assert!(url.contains("interim_results=true"));
        assert!(url.contains("endpointing=800"));
        assert!(url.contains("utterance_end_ms=1000"));
        assert!(url.contains("sample_rate=16000"));
    }

    #[test]
    fn test_smart_format_precludes_no_delay() {
        let (mut config, audio) = test_config();
        config.smart_format = true;
        config.no_delay = true;
        let url = build_stream_url(&config, &audio, "en");
        assert!(url.contains("smart_format=true"));
        assert!(!url.contains("no_delay=true"));
    }

    #[test]
    fn test_close_code_classification() {
        assert_eq!(classify_close_code(1000), CloseCodeClass::Normal);
        assert_eq!(classify_close_code(1001), CloseCodeClass::GoingAway);
        assert_eq!(classify_close_code(1008), CloseCodeClass::Policy);
        assert_eq!(classify_close_code(1009), CloseCodeClass::Payload);
        assert_eq!(classify_close_code(4002), CloseCodeClass::Provider);
        assert_eq!(classify_close_code(2999), CloseCodeClass::Unknown);
    }

    #[test]
    fn test_close_code_recoverability() {
        // Dirty drop with no close frame: retry
        assert!(close_code_is_recoverable(None));
        // Server-side trouble: retry
        assert!(close_code_is_recoverable(Some(1011)));
        assert!(close_code_is_recoverable(Some(1013)));
        // Clean closes and deliberate rejections: do not retry
        assert!(!close_code_is_recoverable(Some(1000)));
        assert!(!close_code_is_recoverable(Some(1001)));
        assert!(!close_code_is_recoverable(Some(1008)));
        assert!(!close_code_is_recoverable(Some(4001)));
    }

    #[test]
    fn test_silence_frame_covers_200ms() {
        // 16 kHz mono s16le: 32 bytes per millisecond
        assert_eq!(silence_frame_len(16000), 6400);
    }

    #[test]
    fn test_parse_transcript_result() {
        let json = r#"{
            "type": "Results",
            "is_final": true,
            "start": 1.5,
            "duration": 0.75,
            "channel": {
                "alternatives": [
                    {"transcript": "Life asks questions.", "confidence": 0.97}
                ]
            }
        }"#;
        match parse_message(json).unwrap() {
            DeepgramMessage::Transcript(result) => {
                assert_eq!(result.text, "Life asks questions.");
                assert!(result.is_final);
                assert_eq!(result.start_ms, 1500);
                assert_eq!(result.end_ms, 2250);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_skips_empty_transcript() {
        let json = r#"{
            "type": "Results",
            "is_final": false,
            "channel": {"alternatives": [{"transcript": "", "confidence": 0.0}]}
        }"#;
        assert!(matches!(
            parse_message(json).unwrap(),
            DeepgramMessage::Ignored
        ));
    }

    #[test]
    fn test_parse_utterance_end() {
        let json = r#"{"type": "UtteranceEnd", "last_word_end": 3.2}"#;
        match parse_message(json).unwrap() {
            DeepgramMessage::UtteranceEnd { last_word_end_ms } => {
                assert_eq!(last_word_end_ms, 3200);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_error_is_reported() {
        assert!(parse_message("not json").is_err());
    }
}
