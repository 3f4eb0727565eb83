//! Pipeline orchestrator
//!
//! Owns the session lifecycle and all mutable session state. Runs as a
//! single task fed by a mailbox: commands (with reply channels), recognizer
//! callbacks, queue completions and timer ticks all arrive as messages, so
//! no other component ever touches session state directly.

use crate::config::AppConfig;
use crate::domain::events::{
    codes, AsrData, CombinedSentenceData, EventData, FinalReportData, IpcCommand,
    ParagraphCompleteData, PipelineEvent, PipelineState, SegmentData, SegmentStatus,
    VocabularyData,
};
use crate::domain::language::display_name;
use crate::domain::models::{
    CoalescedSegment, CombinedSentence, Paragraph, Summary, TranscriptSegment,
    TranslationPriority, TranslationRequest, TranslationTier, VocabularyItem,
};
use crate::domain::prompts::{render, PromptTemplates};
use crate::error::{AppError, Result};
use crate::pipeline::coalescer::{SegmentManager, SegmentUpdate};
use crate::pipeline::combiner::{CombinerConfig, SentenceCombiner};
use crate::pipeline::memory::{HistorySnapshot, SessionMemory};
use crate::pipeline::paragraph::{ParagraphBuilder, ParagraphConfig};
use crate::pipeline::queue::TranslationQueue;
use crate::pipeline::summary::{spawn_summary_engine, SummaryEngineHandle};
use crate::pipeline::translator::{CompletedTranslation, Translator};
use crate::ports::asr::{AsrEventSink, AsrStream, StreamingAsrPort, TranscriptResult};
use crate::ports::llm::{ChatRequest, LlmServicePort};
use crate::ports::store::{SentenceEntry, SessionDescriptor, SessionStorePort, SummaryEntry};
use crate::utils::text::segment_key;
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

const TICK_INTERVAL: Duration = Duration::from_millis(50);
/// Grace period for in-flight translations on stop
const STOP_GRACE: Duration = Duration::from_secs(5);

/// External collaborators handed to the pipeline at startup
pub struct PipelineDeps {
    pub asr: Arc<dyn StreamingAsrPort>,
    pub llm: Arc<dyn LlmServicePort>,
    pub store: Option<Arc<dyn SessionStorePort>>,
}

/// Successful result of a command
#[derive(Debug)]
pub enum CommandOutcome {
    Ack,
    History(HistorySnapshot),
}

enum PipelineMessage {
    Command {
        command: IpcCommand,
        reply: oneshot::Sender<Result<CommandOutcome>>,
    },
    AudioFrame(Vec<u8>),
    Transcript(TranscriptResult),
    AsrConnected,
    AsrDisconnected {
        close_code: Option<u16>,
        reason: String,
    },
    AsrError {
        code: String,
        message: String,
        recoverable: bool,
    },
    Metadata(serde_json::Value),
    UtteranceEnd {
        last_word_end_ms: i64,
    },
    TranslationCompleted(CompletedTranslation),
    SummaryProduced(Summary),
    Tick,
}

/// Cloneable handle to the pipeline task
#[derive(Clone)]
pub struct PipelineController {
    tx: mpsc::UnboundedSender<PipelineMessage>,
}

impl PipelineController {
    /// Validate and execute one command, awaiting its outcome
    pub async fn execute(&self, command: IpcCommand) -> Result<CommandOutcome> {
        command.validate()?;
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(PipelineMessage::Command { command, reply })
            .map_err(|_| AppError::InvalidState("pipeline task stopped".to_string()))?;
        rx.await
            .map_err(|_| AppError::InvalidState("pipeline task stopped".to_string()))?
    }

    /// Forward one raw PCM frame to the recognizer
    pub fn send_audio(&self, frame: Vec<u8>) -> Result<()> {
        self.tx
            .send(PipelineMessage::AudioFrame(frame))
            .map_err(|_| AppError::InvalidState("pipeline task stopped".to_string()))
    }
}

/// Forwards recognizer callbacks into the pipeline mailbox
struct SinkForward {
    tx: mpsc::UnboundedSender<PipelineMessage>,
}

#[async_trait]
impl AsrEventSink for SinkForward {
    async fn on_transcript(&self, result: TranscriptResult) {
        let _ = self.tx.send(PipelineMessage::Transcript(result));
    }

    async fn on_connected(&self) {
        let _ = self.tx.send(PipelineMessage::AsrConnected);
    }

    async fn on_disconnected(&self, close_code: Option<u16>, reason: String) {
        let _ = self
            .tx
            .send(PipelineMessage::AsrDisconnected { close_code, reason });
    }

    async fn on_error(&self, code: &str, message: String, recoverable: bool) {
        let _ = self.tx.send(PipelineMessage::AsrError {
            code: code.to_string(),
            message,
            recoverable,
        });
    }

    async fn on_metadata(&self, metadata: serde_json::Value) {
        let _ = self.tx.send(PipelineMessage::Metadata(metadata));
    }

    async fn on_utterance_end(&self, last_word_end_ms: i64) {
        let _ = self
            .tx
            .send(PipelineMessage::UtteranceEnd { last_word_end_ms });
    }
}

/// Start the pipeline task and its helpers
pub fn spawn_pipeline(
    config: AppConfig,
    deps: PipelineDeps,
    events: mpsc::UnboundedSender<PipelineEvent>,
) -> PipelineController {
    let (msg_tx, mut msg_rx) = mpsc::unbounded_channel::<PipelineMessage>();
    let (completed_tx, mut completed_rx) = mpsc::unbounded_channel::<CompletedTranslation>();
    let (produced_tx, mut produced_rx) = mpsc::unbounded_channel::<Summary>();

    let translator = Arc::new(Translator::new(
        Arc::clone(&deps.llm),
        config.llm.clone(),
        events.clone(),
        completed_tx,
    ));
    let queue = TranslationQueue::new(config.queue.clone(), translator);
    {
        let events = events.clone();
        queue.set_error_handler(Box::new(move |request, reason| {
            // History-tier failure is an enrichment loss, not a UI error
            if request.segment_id.starts_with("history_")
                || request.segment_id.starts_with("paragraph_")
            {
                return;
            }
            let _ = events.send(PipelineEvent::error(
                request.correlation_id.clone(),
                codes::TRANSLATION_FAILED,
                format!("{}: {}", request.segment_id, reason),
                false,
            ));
        }));
    }

    let summary = spawn_summary_engine(
        config.summary.clone(),
        config.llm.clone(),
        Arc::clone(&deps.llm),
        events.clone(),
        produced_tx,
    );

    {
        let tx = msg_tx.clone();
        tokio::spawn(async move {
            while let Some(completed) = completed_rx.recv().await {
                if tx
                    .send(PipelineMessage::TranslationCompleted(completed))
                    .is_err()
                {
                    break;
                }
            }
        });
    }
    {
        let tx = msg_tx.clone();
        tokio::spawn(async move {
            while let Some(summary) = produced_rx.recv().await {
                if tx.send(PipelineMessage::SummaryProduced(summary)).is_err() {
                    break;
                }
            }
        });
    }
    {
        let tx = msg_tx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if tx.send(PipelineMessage::Tick).is_err() {
                    break;
                }
            }
        });
    }

    let core_tx = msg_tx.clone();
    tokio::spawn(async move {
        let mut core = PipelineCore::new(config, deps, events, queue, summary, core_tx);
        while let Some(message) = msg_rx.recv().await {
            core.handle_message(message).await;
        }
    });

    PipelineController { tx: msg_tx }
}

struct PipelineCore {
    config: AppConfig,
    asr: Arc<dyn StreamingAsrPort>,
    llm: Arc<dyn LlmServicePort>,
    store: Option<Arc<dyn SessionStorePort>>,
    events: mpsc::UnboundedSender<PipelineEvent>,
    queue: TranslationQueue,
    summary: SummaryEngineHandle,
    msg_tx: mpsc::UnboundedSender<PipelineMessage>,

    state: PipelineState,
    correlation_id: String,
    source_language: String,
    target_language: String,
    session_started_at: i64,
    asr_stream: Option<Box<dyn AsrStream>>,

    memory: SessionMemory,
    segment_manager: SegmentManager,
    combiner: SentenceCombiner,
    paragraphs: ParagraphBuilder,
    key_to_segment: HashMap<String, String>,
    vocabulary_count: usize,
    last_cleanup_at: i64,
}

impl PipelineCore {
    fn new(
        config: AppConfig,
        deps: PipelineDeps,
        events: mpsc::UnboundedSender<PipelineEvent>,
        queue: TranslationQueue,
        summary: SummaryEngineHandle,
        msg_tx: mpsc::UnboundedSender<PipelineMessage>,
    ) -> Self {
        let segment_manager = SegmentManager::new(config.coalescer.clone());
        Self {
            config,
            asr: deps.asr,
            llm: deps.llm,
            store: deps.store,
            events,
            queue,
            summary,
            msg_tx,
            state: PipelineState::Idle,
            correlation_id: String::new(),
            source_language: String::new(),
            target_language: String::new(),
            session_started_at: 0,
            asr_stream: None,
            memory: SessionMemory::new(),
            segment_manager,
            combiner: SentenceCombiner::new(CombinerConfig::default()),
            paragraphs: ParagraphBuilder::new(ParagraphConfig::default()),
            key_to_segment: HashMap::new(),
            vocabulary_count: 0,
            last_cleanup_at: 0,
        }
    }

    async fn handle_message(&mut self, message: PipelineMessage) {
        match message {
            PipelineMessage::Command { command, reply } => {
                let result = self.handle_command(command).await;
                let _ = reply.send(result);
            }
            PipelineMessage::AudioFrame(frame) => {
                if let Some(stream) = self.asr_stream.as_mut() {
                    if let Err(e) = stream.send_audio(&frame).await {
                        log::debug!("Audio frame dropped: {}", e);
                    }
                }
            }
            PipelineMessage::Transcript(result) => self.handle_transcript(result),
            PipelineMessage::AsrConnected => {
                log::info!("Recognizer connected");
            }
            PipelineMessage::AsrDisconnected { close_code, reason } => {
                self.handle_asr_disconnect(close_code, reason);
            }
            PipelineMessage::AsrError {
                code,
                message,
                recoverable,
            } => {
                self.emit_error(&code, &message, recoverable);
                if !recoverable
                    && matches!(self.state, PipelineState::Starting | PipelineState::Listening)
                {
                    self.emit_status(PipelineState::Error);
                }
            }
            PipelineMessage::Metadata(metadata) => {
                log::debug!("Recognizer metadata: {}", metadata);
            }
            PipelineMessage::UtteranceEnd { last_word_end_ms } => {
                log::trace!("Utterance end at {} ms", last_word_end_ms);
            }
            PipelineMessage::TranslationCompleted(completed) => {
                self.handle_translation_completed(completed).await;
            }
            PipelineMessage::SummaryProduced(summary) => {
                self.handle_summary_produced(summary).await;
            }
            PipelineMessage::Tick => self.handle_tick(),
        }
    }

    async fn handle_command(&mut self, command: IpcCommand) -> Result<CommandOutcome> {
        match command {
            IpcCommand::StartListening {
                source_language,
                target_language,
                correlation_id,
            } => {
                self.start_listening(source_language, target_language, correlation_id)
                    .await
            }
            IpcCommand::StopListening { correlation_id } => self.stop_listening(correlation_id).await,
            IpcCommand::GetHistory { limit, offset } => Ok(CommandOutcome::History(
                self.memory.get_full_history(limit, offset),
            )),
            IpcCommand::ClearHistory {} => {
                self.memory.clear();
                Ok(CommandOutcome::Ack)
            }
            IpcCommand::GenerateVocabulary { correlation_id } => {
                self.generate_vocabulary(correlation_id).await
            }
            IpcCommand::GenerateFinalReport { correlation_id } => {
                self.generate_final_report(correlation_id).await
            }
            IpcCommand::TranslateParagraph {
                paragraph_id,
                source_text,
                source_language,
                target_language,
                correlation_id,
            } => {
                if self.state == PipelineState::Idle {
                    self.queue.reopen();
                }
                let request = TranslationRequest::new(
                    format!("user_{}", paragraph_id),
                    source_text,
                    source_language,
                    target_language,
                    TranslationPriority::High,
                    correlation_id,
                );
                self.queue.enqueue(request).map_err(|e| {
                    self.emit_error(codes::TRANSLATION_QUEUE_ERROR, &e.to_string(), true);
                    e
                })?;
                Ok(CommandOutcome::Ack)
            }
        }
    }

    async fn start_listening(
        &mut self,
        source_language: String,
        target_language: String,
        correlation_id: String,
    ) -> Result<CommandOutcome> {
        if self.state != PipelineState::Idle {
            return Err(AppError::InvalidState(format!(
                "cannot start listening while {}",
                self.state
            )));
        }

        self.correlation_id = correlation_id;
        self.source_language = source_language;
        self.target_language = target_language;
        self.session_started_at = now_ms();
        self.emit_status(PipelineState::Starting);

        self.memory.begin(&self.source_language, self.session_started_at);
        self.segment_manager = SegmentManager::new(self.config.coalescer.clone());
        self.combiner = SentenceCombiner::new(CombinerConfig::default());
        self.paragraphs = ParagraphBuilder::new(ParagraphConfig::default());
        self.key_to_segment.clear();
        self.queue.reopen();
        self.summary
            .begin(&self.correlation_id, &self.source_language, &self.target_language);

        let sink: Arc<dyn AsrEventSink> = Arc::new(SinkForward {
            tx: self.msg_tx.clone(),
        });
        match self.asr.connect(&self.source_language, sink).await {
            Ok(stream) => {
                self.asr_stream = Some(stream);
                self.emit_status(PipelineState::Listening);
                if let Some(store) = &self.store {
                    let descriptor = self.descriptor(None);
                    if let Err(e) = store.begin_session(&descriptor).await {
                        log::warn!("Session store begin failed: {}", e);
                    }
                }
                log::info!(
                    "Listening: {} -> {} ({})",
                    self.source_language,
                    self.target_language,
                    self.correlation_id
                );
                Ok(CommandOutcome::Ack)
            }
            Err(e) => {
                self.emit_status(PipelineState::Error);
                self.emit_error(codes::DEEPGRAM_CONNECTION_FAILED, &e.to_string(), false);
                Err(e)
            }
        }
    }

    async fn stop_listening(&mut self, correlation_id: String) -> Result<CommandOutcome> {
        if self.state == PipelineState::Idle {
            return Err(AppError::InvalidState("not listening".to_string()));
        }
        if correlation_id != self.correlation_id {
            return Err(AppError::InvalidInput(format!(
                "unknown correlation id {}",
                correlation_id
            )));
        }

        self.emit_status(PipelineState::Stopping);
        let now = now_ms();

        let flushed = self.segment_manager.force_flush(now);
        for emission in &flushed {
            self.emit_segment(emission);
        }
        if let Some(sentence) = self.combiner.force_flush() {
            self.handle_sentence(sentence);
        }
        if let Some(paragraph) = self.paragraphs.force_flush() {
            self.handle_paragraph(paragraph);
        }

        self.queue.close();
        self.queue.drain(STOP_GRACE).await;

        if let Some(summary) = self.summary.finalize().await {
            self.memory.add_summary(summary);
        }

        if let Some(mut stream) = self.asr_stream.take() {
            if let Err(e) = stream.disconnect().await {
                log::warn!("Recognizer disconnect failed: {}", e);
            }
        }

        self.memory.end(now_ms());
        if let Some(store) = &self.store {
            let descriptor = self.descriptor(Some(now_ms()));
            if let Err(e) = store.end_session(&descriptor).await {
                log::warn!("Session store end failed: {}", e);
            }
        }

        self.emit_status(PipelineState::Idle);
        log::info!("Session {} stopped", self.correlation_id);
        Ok(CommandOutcome::Ack)
    }

    fn handle_transcript(&mut self, result: TranscriptResult) {
        if self.state != PipelineState::Listening {
            log::trace!("Dropping transcript while {}", self.state);
            return;
        }

        let segment = TranscriptSegment::new(
            result.text,
            result.confidence,
            result.is_final,
            result.start_ms,
            result.end_ms,
        )
        .with_language(result.language.or_else(|| Some(self.source_language.clone())));

        self.emit(EventData::Asr(AsrData {
            text: segment.text.clone(),
            confidence: segment.confidence,
            is_final: segment.is_final,
            language: segment.language.clone(),
            segment_id: segment.id.clone(),
        }));

        let key = segment_key(
            segment.start_ms,
            segment.end_ms,
            segment.timestamp,
            &segment.text,
        );
        self.key_to_segment.insert(key.clone(), segment.id.clone());
        let now = now_ms();

        if self.config.use_coalescer {
            let update = SegmentUpdate {
                text: segment.text.clone(),
                translation: None,
                confidence: segment.confidence,
                is_final: segment.is_final,
            };
            if let Some(emission) = self.segment_manager.update(&key, update, now) {
                self.emit_segment(&emission);
            }
        } else if segment.is_final {
            self.emit(EventData::Segment(SegmentData {
                segment_id: segment.id.clone(),
                text: segment.text.clone(),
                translation: None,
                status: SegmentStatus::Completed,
                metadata: None,
            }));
        }

        if segment.is_final {
            let request = TranslationRequest::new(
                segment.id.clone(),
                segment.text.clone(),
                self.source_language.clone(),
                self.target_language.clone(),
                TranslationPriority::Normal,
                self.correlation_id.clone(),
            );
            if let Err(e) = self.queue.enqueue(request) {
                log::warn!("Realtime translation enqueue failed: {}", e);
                self.emit_error(codes::TRANSLATION_QUEUE_ERROR, &e.to_string(), true);
            }

            if let Some(sentence) = self.combiner.add_segment(&segment, now) {
                self.handle_sentence(sentence);
            }
            if let Some(paragraph) = self.paragraphs.add_segment(&segment, now) {
                self.handle_paragraph(paragraph);
            }
            self.memory.add_segment(segment);
        }
    }

    fn handle_sentence(&mut self, sentence: CombinedSentence) {
        self.emit(EventData::CombinedSentence(CombinedSentenceData {
            combined_id: sentence.combined_id.clone(),
            segment_ids: sentence.segment_ids.clone(),
            original_text: sentence.original_text.clone(),
            start_ms: sentence.start_ms,
            end_ms: sentence.end_ms,
            segment_count: sentence.segment_count,
        }));

        let request = TranslationRequest::new(
            format!("history_{}", sentence.combined_id),
            sentence.original_text.clone(),
            self.source_language.clone(),
            self.target_language.clone(),
            TranslationPriority::Low,
            self.correlation_id.clone(),
        );
        if let Err(e) = self.queue.enqueue(request) {
            // Losing a history re-translation is acceptable back-pressure
            log::warn!("History translation enqueue failed: {}", e);
        }

        self.memory.add_sentence(sentence);
    }

    fn handle_paragraph(&mut self, paragraph: Paragraph) {
        self.emit(EventData::ParagraphComplete(ParagraphCompleteData {
            paragraph_id: paragraph.paragraph_id.clone(),
            raw_text: paragraph.raw_text.clone(),
            cleaned_text: paragraph.cleaned_text.clone(),
            start_time: paragraph.start_time,
            end_time: paragraph.end_time,
            segment_ids: paragraph.segments.iter().map(|s| s.id.clone()).collect(),
        }));

        let text = paragraph
            .cleaned_text
            .clone()
            .unwrap_or_else(|| paragraph.raw_text.clone());
        let request = TranslationRequest::new(
            format!("paragraph_{}", paragraph.paragraph_id),
            text,
            self.source_language.clone(),
            self.target_language.clone(),
            TranslationPriority::Low,
            self.correlation_id.clone(),
        );
        if let Err(e) = self.queue.enqueue(request) {
            log::warn!("Paragraph translation enqueue failed: {}", e);
        }

        self.memory.add_paragraph(paragraph);
    }

    async fn handle_translation_completed(&mut self, completed: CompletedTranslation) {
        match completed.translation.tier {
            TranslationTier::Realtime => {
                self.summary.add_translation(completed.translation.clone());
                self.memory.add_translation(completed.translation);
            }
            TranslationTier::History => {
                let Some(target_id) = completed.target_id else {
                    return;
                };
                if completed.is_paragraph {
                    self.memory
                        .attach_paragraph_translation(&target_id, &completed.translation.translated);
                } else {
                    self.memory
                        .attach_sentence_translation(&target_id, &completed.translation.translated);
                    if let Some(store) = &self.store {
                        let entry = SentenceEntry {
                            id: target_id.clone(),
                            source_text: completed.translation.original.clone(),
                            target_text: completed.translation.translated.clone(),
                            timestamp: completed.translation.timestamp,
                        };
                        if let Err(e) = store.append_sentence(&self.correlation_id, &entry).await {
                            log::warn!("Sentence persistence failed: {}", e);
                        }
                    }
                }
                self.memory.add_translation(completed.translation);
            }
        }
    }

    async fn handle_summary_produced(&mut self, summary: Summary) {
        if let Some(store) = &self.store {
            let entry = SummaryEntry {
                id: summary.id.clone(),
                source_text: summary.source_text.clone(),
                target_text: summary.target_text.clone(),
                word_count: summary.word_count,
                threshold: summary.threshold,
                is_final: summary.is_final,
                created_at: now_ms(),
            };
            if let Err(e) = store.append_summary(&self.correlation_id, &entry).await {
                log::warn!("Summary persistence failed: {}", e);
            }
        }
        self.memory.add_summary(summary);
    }

    fn handle_tick(&mut self) {
        if self.state != PipelineState::Listening {
            return;
        }
        let now = now_ms();

        let emissions = self.segment_manager.poll(now);
        for emission in &emissions {
            self.emit_segment(emission);
        }

        if now - self.last_cleanup_at >= self.config.coalescer.cleanup_interval_ms as i64 {
            self.segment_manager.evict_inactive(now);
            self.last_cleanup_at = now;
        }

        if let Some(sentence) = self.combiner.poll(now) {
            self.handle_sentence(sentence);
        }
        if let Some(paragraph) = self.paragraphs.poll(now) {
            self.handle_paragraph(paragraph);
        }
    }

    fn handle_asr_disconnect(&mut self, close_code: Option<u16>, reason: String) {
        match self.state {
            PipelineState::Starting | PipelineState::Listening => {
                log::error!(
                    "Recognizer connection lost (code {:?}): {}",
                    close_code,
                    reason
                );
                self.asr_stream = None;
                self.emit_status(PipelineState::Error);
                self.emit_error(
                    codes::DEEPGRAM_CONNECTION_FAILED,
                    &format!("recognizer disconnected: {}", reason),
                    false,
                );
            }
            _ => {
                log::debug!("Recognizer closed while {}: {}", self.state, reason);
            }
        }
    }

    async fn generate_vocabulary(&mut self, correlation_id: String) -> Result<CommandOutcome> {
        if self.memory.is_empty() {
            return Err(AppError::InvalidState(
                "no transcript history to extract vocabulary from".to_string(),
            ));
        }
        let prompt = render(
            PromptTemplates::vocabulary(),
            &[
                ("source_language", display_name(&self.source_language)),
                ("target_language", display_name(&self.target_language)),
                ("text", &self.memory.transcript_text()),
            ],
        );
        let chat = ChatRequest::new(
            self.config.llm.models.vocabulary.clone(),
            prompt,
            self.config.llm.max_tokens.vocabulary,
        );
        let parsed = match self.llm.complete(&chat).await {
            Ok(text) => parse_vocabulary(&text),
            Err(e) => Err(e),
        };
        match parsed {
            Ok(items) => {
                self.vocabulary_count = items.len();
                let data = VocabularyData {
                    total_terms: items.len(),
                    items,
                };
                let _ = self.events.send(PipelineEvent::new(
                    correlation_id,
                    EventData::Vocabulary(data),
                ));
                Ok(CommandOutcome::Ack)
            }
            Err(e) => {
                let _ = self.events.send(PipelineEvent::error(
                    correlation_id,
                    codes::VOCABULARY_GENERATION_FAILED,
                    e.to_string(),
                    true,
                ));
                Err(e)
            }
        }
    }

    async fn generate_final_report(&mut self, correlation_id: String) -> Result<CommandOutcome> {
        if self.memory.is_empty() {
            return Err(AppError::InvalidState(
                "no transcript history to report on".to_string(),
            ));
        }
        let summaries_text = self
            .memory
            .summaries()
            .iter()
            .map(|s| format!("- {}", s.source_text))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = render(
            PromptTemplates::final_report(),
            &[
                ("source_language", display_name(&self.source_language)),
                ("target_language", display_name(&self.target_language)),
                ("text", &self.memory.transcript_text()),
                ("summaries", &summaries_text),
            ],
        );
        let chat = ChatRequest::new(
            self.config.llm.models.report.clone(),
            prompt,
            self.config.llm.max_tokens.report,
        );
        match self.llm.complete(&chat).await {
            Ok(report) => {
                let data = FinalReportData {
                    report,
                    total_word_count: self.memory.total_words() as u32,
                    summary_count: self.memory.summaries().len(),
                    vocabulary_count: self.vocabulary_count,
                };
                let _ = self.events.send(PipelineEvent::new(
                    correlation_id,
                    EventData::FinalReport(data),
                ));
                Ok(CommandOutcome::Ack)
            }
            Err(e) => {
                let _ = self.events.send(PipelineEvent::error(
                    correlation_id,
                    codes::FINAL_REPORT_GENERATION_FAILED,
                    e.to_string(),
                    true,
                ));
                Err(e)
            }
        }
    }

    fn emit_segment(&self, emission: &CoalescedSegment) {
        let segment_id = self
            .key_to_segment
            .get(&emission.segment_key)
            .cloned()
            .unwrap_or_else(|| emission.segment_key.clone());
        let status = if emission.is_final {
            SegmentStatus::Completed
        } else {
            SegmentStatus::Processing
        };
        self.emit(EventData::Segment(SegmentData {
            segment_id,
            text: emission.text.clone(),
            translation: emission.translation.clone(),
            status,
            metadata: Some(json!({ "holdDurationMs": emission.hold_duration_ms })),
        }));
    }

    fn emit(&self, data: EventData) {
        let _ = self
            .events
            .send(PipelineEvent::new(self.correlation_id.clone(), data));
    }

    fn emit_error(&self, code: &str, message: &str, recoverable: bool) {
        let _ = self.events.send(PipelineEvent::error(
            self.correlation_id.clone(),
            code,
            message,
            recoverable,
        ));
    }

    fn emit_status(&mut self, next: PipelineState) {
        let previous = self.state;
        self.state = next;
        let uptime = if self.session_started_at > 0 {
            now_ms() - self.session_started_at
        } else {
            0
        };
        let details = json!({
            "previousState": previous.to_string(),
            "uptimeMs": uptime,
        });
        let _ = self.events.send(PipelineEvent::status(
            self.correlation_id.clone(),
            next,
            Some(details),
        ));
    }

    fn descriptor(&self, ended_at: Option<i64>) -> SessionDescriptor {
        SessionDescriptor {
            session_id: self.correlation_id.clone(),
            source_language: self.source_language.clone(),
            target_language: self.target_language.clone(),
            started_at: self.session_started_at,
            ended_at,
            word_count: self.memory.total_words() as u32,
        }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Parse the vocabulary model's JSON output, tolerating code fences
fn parse_vocabulary(text: &str) -> Result<Vec<VocabularyItem>> {
    let mut trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("```json") {
        trimmed = rest;
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        trimmed = rest;
    }
    if let Some(rest) = trimmed.strip_suffix("```") {
        trimmed = rest;
    }
    let items: Vec<VocabularyItem> = serde_json::from_str(trimmed.trim())?;
    if items.is_empty() {
        return Err(AppError::Llm("no vocabulary items returned".to_string()));
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::StatusData;
    use crate::ports::mocks::{MemorySessionStore, MockAsr, ScriptedLlm};

    struct Harness {
        controller: PipelineController,
        asr: MockAsr,
        llm: Arc<ScriptedLlm>,
        store: MemorySessionStore,
        events_rx: mpsc::UnboundedReceiver<PipelineEvent>,
    }

    fn harness_with(use_coalescer: bool) -> Harness {
        let asr = MockAsr::new();
        let llm = Arc::new(ScriptedLlm::new());
        let store = MemorySessionStore::new();
        let config = AppConfig {
            use_coalescer,
            ..AppConfig::default()
        };
        let deps = PipelineDeps {
            asr: Arc::new(asr.clone()),
            llm: llm.clone(),
            store: Some(Arc::new(store.clone())),
        };
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let controller = spawn_pipeline(config, deps, events_tx);
        Harness {
            controller,
            asr,
            llm,
            store,
            events_rx,
        }
    }

    fn harness() -> Harness {
        harness_with(true)
    }

    async fn start(h: &Harness) {
        h.controller
            .execute(IpcCommand::StartListening {
                source_language: "en".to_string(),
                target_language: "ja".to_string(),
                correlation_id: "corr-1".to_string(),
            })
            .await
            .unwrap();
    }

    async fn stop(h: &Harness) {
        h.controller
            .execute(IpcCommand::StopListening {
                correlation_id: "corr-1".to_string(),
            })
            .await
            .unwrap();
    }

    fn result(text: &str, is_final: bool, start_ms: i64, end_ms: i64) -> TranscriptResult {
        TranscriptResult {
            text: text.to_string(),
            confidence: 0.95,
            is_final,
            start_ms,
            end_ms,
            language: None,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<PipelineEvent>) -> Vec<PipelineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn status_path(events: &[PipelineEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match &e.data {
                EventData::Status(StatusData { state, .. }) => Some(state.to_string()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_basic_realtime_path() {
        let mut h = harness();
        start(&h).await;

        h.asr.emit_transcript(result("Life asks", false, 0, 400)).await;
        h.asr
            .emit_transcript(result("Life asks questions", false, 0, 800))
            .await;
        h.asr
            .emit_transcript(result("Life asks questions.", true, 0, 1000))
            .await;
        settle().await;
        stop(&h).await;
        // Let queued completion notifications reach session state
        settle().await;

        let events = drain(&mut h.events_rx);

        // Every event belongs to the session
        for event in &events {
            assert_eq!(event.correlation_id, "corr-1");
        }

        let asr_count = events
            .iter()
            .filter(|e| matches!(e.data, EventData::Asr(_)))
            .count();
        assert_eq!(asr_count, 3);

        let completed_segments: Vec<_> = events
            .iter()
            .filter_map(|e| match &e.data {
                EventData::Segment(data) if data.status == SegmentStatus::Completed => Some(data),
                _ => None,
            })
            .collect();
        assert_eq!(completed_segments.len(), 1);
        assert_eq!(completed_segments[0].text, "Life asks questions.");

        let realtime_finals: Vec<_> = events
            .iter()
            .filter_map(|e| match &e.data {
                EventData::Translation(data)
                    if data.is_final && data.is_high_quality.is_none() =>
                {
                    Some(data)
                }
                _ => None,
            })
            .collect();
        assert_eq!(realtime_finals.len(), 1);
        assert!(!realtime_finals[0].translated_text.is_empty());

        let sentences: Vec<_> = events
            .iter()
            .filter_map(|e| match &e.data {
                EventData::CombinedSentence(data) => Some(data),
                _ => None,
            })
            .collect();
        assert_eq!(sentences.len(), 1);
        assert_eq!(sentences[0].original_text, "Life asks questions.");

        // The sentence got a high-quality re-translation before idle
        let high_quality = events.iter().any(|e| {
            matches!(&e.data, EventData::Translation(data) if data.is_high_quality == Some(true))
        });
        assert!(high_quality);

        assert_eq!(
            status_path(&events),
            vec!["starting", "listening", "stopping", "idle"]
        );

        // Session store saw the descriptor twice and the sentence once
        assert_eq!(h.store.descriptors().len(), 2);
        assert_eq!(h.store.sentences().len(), 1);
    }

    #[tokio::test]
    async fn test_direct_path_emits_single_completed_segment() {
        let mut h = harness_with(false);
        start(&h).await;

        h.asr.emit_transcript(result("partial", false, 0, 300)).await;
        h.asr.emit_transcript(result("partial done.", true, 0, 700)).await;
        settle().await;
        stop(&h).await;

        let events = drain(&mut h.events_rx);
        let segment_events: Vec<_> = events
            .iter()
            .filter(|e| matches!(e.data, EventData::Segment(_)))
            .collect();
        assert_eq!(segment_events.len(), 1);
    }

    #[tokio::test]
    async fn test_start_twice_is_a_state_error() {
        let h = harness();
        start(&h).await;
        let second = h
            .controller
            .execute(IpcCommand::StartListening {
                source_language: "en".to_string(),
                target_language: "ja".to_string(),
                correlation_id: "corr-2".to_string(),
            })
            .await;
        assert!(matches!(second, Err(AppError::InvalidState(_))));
        stop(&h).await;
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_a_state_error() {
        let h = harness();
        let result = h
            .controller
            .execute(IpcCommand::StopListening {
                correlation_id: "corr-1".to_string(),
            })
            .await;
        assert!(matches!(result, Err(AppError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_stop_with_unknown_correlation_rejected() {
        let h = harness();
        start(&h).await;
        let result = h
            .controller
            .execute(IpcCommand::StopListening {
                correlation_id: "corr-other".to_string(),
            })
            .await;
        assert!(matches!(result, Err(AppError::InvalidInput(_))));
        stop(&h).await;
    }

    #[tokio::test]
    async fn test_connect_failure_reports_fatal_error() {
        let mut h = harness();
        h.asr.fail_connect();
        let result = h
            .controller
            .execute(IpcCommand::StartListening {
                source_language: "en".to_string(),
                target_language: "ja".to_string(),
                correlation_id: "corr-1".to_string(),
            })
            .await;
        assert!(result.is_err());

        let events = drain(&mut h.events_rx);
        assert_eq!(status_path(&events), vec!["starting", "error"]);
        let fatal = events.iter().any(|e| {
            matches!(&e.data, EventData::Error(data)
                if data.code == codes::DEEPGRAM_CONNECTION_FAILED && !data.recoverable)
        });
        assert!(fatal);
    }

    #[tokio::test]
    async fn test_clear_then_get_history_is_empty() {
        let mut h = harness();
        start(&h).await;
        h.asr
            .emit_transcript(result("Some words here.", true, 0, 900))
            .await;
        settle().await;
        stop(&h).await;

        h.controller
            .execute(IpcCommand::ClearHistory {})
            .await
            .unwrap();
        let outcome = h
            .controller
            .execute(IpcCommand::GetHistory {
                limit: 100,
                offset: 0,
            })
            .await
            .unwrap();
        match outcome {
            CommandOutcome::History(snapshot) => {
                assert!(snapshot.entries.is_empty());
                assert_eq!(snapshot.metadata.total_segments, 0);
                assert_eq!(snapshot.metadata.total_words, 0);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        drain(&mut h.events_rx);
    }

    #[tokio::test]
    async fn test_vocabulary_and_report_generation() {
        let mut h = harness();
        start(&h).await;
        h.asr
            .emit_transcript(result("Entropy measures disorder.", true, 0, 1200))
            .await;
        settle().await;
        stop(&h).await;
        drain(&mut h.events_rx);

        h.llm.push_response(
            r#"[{"term": "entropy", "definition": "乱雑さの尺度", "context": "Entropy measures disorder."}]"#,
        );
        h.controller
            .execute(IpcCommand::GenerateVocabulary {
                correlation_id: "corr-1".to_string(),
            })
            .await
            .unwrap();

        h.llm.push_response("# Lecture Report\nEntropy was discussed.");
        h.controller
            .execute(IpcCommand::GenerateFinalReport {
                correlation_id: "corr-1".to_string(),
            })
            .await
            .unwrap();

        let events = drain(&mut h.events_rx);
        let vocabulary = events
            .iter()
            .find_map(|e| match &e.data {
                EventData::Vocabulary(data) => Some(data),
                _ => None,
            })
            .expect("vocabulary event");
        assert_eq!(vocabulary.total_terms, 1);
        assert_eq!(vocabulary.items[0].term, "entropy");

        let report = events
            .iter()
            .find_map(|e| match &e.data {
                EventData::FinalReport(data) => Some(data),
                _ => None,
            })
            .expect("final report event");
        assert!(report.report.contains("Lecture Report"));
        assert_eq!(report.vocabulary_count, 1);
        assert_eq!(report.total_word_count, 3);
    }

    #[tokio::test]
    async fn test_vocabulary_without_history_is_rejected() {
        let h = harness();
        let result = h
            .controller
            .execute(IpcCommand::GenerateVocabulary {
                correlation_id: "corr-1".to_string(),
            })
            .await;
        assert!(matches!(result, Err(AppError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_translate_paragraph_emits_high_quality_event() {
        let mut h = harness();
        h.llm.push_response("依頼された段落の翻訳。");
        h.controller
            .execute(IpcCommand::TranslateParagraph {
                paragraph_id: "paragraph_9".to_string(),
                source_text: "The requested paragraph.".to_string(),
                source_language: "en".to_string(),
                target_language: "ja".to_string(),
                correlation_id: "corr-1".to_string(),
            })
            .await
            .unwrap();
        settle().await;

        let events = drain(&mut h.events_rx);
        let translation = events
            .iter()
            .find_map(|e| match &e.data {
                EventData::Translation(data) => Some(data),
                _ => None,
            })
            .expect("translation event");
        assert_eq!(translation.is_high_quality, Some(true));
        assert_eq!(translation.is_paragraph, Some(true));
        assert_eq!(translation.target_id.as_deref(), Some("paragraph_9"));
        assert_eq!(translation.translated_text, "依頼された段落の翻訳。");
    }

    #[test]
    fn test_parse_vocabulary_tolerates_fences() {
        let fenced = "```json\n[{\"term\": \"a\", \"definition\": \"b\"}]\n```";
        let items = parse_vocabulary(fenced).unwrap();
        assert_eq!(items.len(), 1);
        assert!(parse_vocabulary("[]").is_err());
        assert!(parse_vocabulary("not json").is_err());
    }
}
