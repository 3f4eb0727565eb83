//! Two-tier translator
//!
//! Handles queued translation requests by invoking the LLM port. Realtime
//! requests stream partial deltas as accumulated-text events; history-grade
//! requests (segment ids prefixed `history_` or `paragraph_`) run against
//! the higher-quality model and emit a single final event carrying the
//! original target id. User-requested paragraph translations use the
//! `user_` prefix.

use crate::config::LlmConfig;
use crate::domain::events::{EventData, PipelineEvent, TranslationData};
use crate::domain::language::display_name;
use crate::domain::models::{Translation, TranslationRequest, TranslationTier};
use crate::domain::prompts::{render, PromptTemplates};
use crate::error::{AppError, Result};
use crate::pipeline::queue::TranslationHandler;
use crate::ports::llm::{ChatRequest, LlmServicePort};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

const PARTIAL_CONFIDENCE: f32 = 0.8;
const FINAL_CONFIDENCE: f32 = 1.0;

/// A finished translation with its routing metadata
#[derive(Debug, Clone)]
pub struct CompletedTranslation {
    pub translation: Translation,
    /// CombinedSentence or Paragraph id for history-tier output
    pub target_id: Option<String>,
    pub is_paragraph: bool,
}

/// Streams translations through the LLM port and emits translation events
pub struct Translator {
    llm: Arc<dyn LlmServicePort>,
    config: LlmConfig,
    events: mpsc::UnboundedSender<PipelineEvent>,
    completed: mpsc::UnboundedSender<CompletedTranslation>,
}

impl Translator {
    pub fn new(
        llm: Arc<dyn LlmServicePort>,
        config: LlmConfig,
        events: mpsc::UnboundedSender<PipelineEvent>,
        completed: mpsc::UnboundedSender<CompletedTranslation>,
    ) -> Self {
        Self {
            llm,
            config,
            events,
            completed,
        }
    }

    /// Fast-tier streaming translation for one segment
    async fn translate_realtime(&self, request: &TranslationRequest) -> Result<()> {
        let prompt = render(
            PromptTemplates::translate(),
            &[
                ("source_language", display_name(&request.source_language)),
                ("target_language", display_name(&request.target_language)),
                ("text", &request.original_text),
            ],
        );
        let chat = ChatRequest::new(
            self.config.models.translate.clone(),
            prompt,
            self.config.max_tokens.translate,
        );

        let mut deltas = self.llm.stream_chat(&chat).await?;
        let mut accumulated = String::new();
        while let Some(delta) = deltas.recv().await {
            let delta = delta?;
            accumulated.push_str(&delta);
            self.emit_translation(request, &accumulated, false, None, false);
        }

        if accumulated.trim().is_empty() {
            return Err(AppError::Llm(format!(
                "Empty translation for {}",
                request.segment_id
            )));
        }

        self.emit_translation(request, &accumulated, true, None, false);

        let translation = Translation {
            confidence: FINAL_CONFIDENCE,
            ..Translation::new(
                request.original_text.clone(),
                accumulated,
                request.source_language.clone(),
                request.target_language.clone(),
                TranslationTier::Realtime,
            )
        };
        let _ = self.completed.send(CompletedTranslation {
            translation,
            target_id: None,
            is_paragraph: false,
        });
        Ok(())
    }

    /// Quality-tier translation for a sentence or paragraph.
    ///
    /// Failures here are swallowed beyond a warning: history output is an
    /// enrichment, not a liveness requirement.
    async fn translate_history(
        &self,
        request: &TranslationRequest,
        target_id: &str,
        is_paragraph: bool,
    ) -> Result<()> {
        match self.run_quality(request).await {
            Ok(translated) => {
                self.emit_quality(request, &translated, target_id, is_paragraph);
                let translation = Translation::new(
                    request.original_text.clone(),
                    translated,
                    request.source_language.clone(),
                    request.target_language.clone(),
                    TranslationTier::History,
                );
                let _ = self.completed.send(CompletedTranslation {
                    translation,
                    target_id: Some(target_id.to_string()),
                    is_paragraph,
                });
            }
            Err(e) => {
                log::warn!("History translation for {} failed: {}", target_id, e);
            }
        }
        Ok(())
    }

    /// User-requested paragraph translation; failures propagate so the
    /// queue's retry and error paths apply.
    async fn translate_user(&self, request: &TranslationRequest, target_id: &str) -> Result<()> {
        let translated = self.run_quality(request).await?;
        self.emit_quality(request, &translated, target_id, true);
        let translation = Translation::new(
            request.original_text.clone(),
            translated,
            request.source_language.clone(),
            request.target_language.clone(),
            TranslationTier::History,
        );
        let _ = self.completed.send(CompletedTranslation {
            translation,
            target_id: Some(target_id.to_string()),
            is_paragraph: true,
        });
        Ok(())
    }

    async fn run_quality(&self, request: &TranslationRequest) -> Result<String> {
        let prompt = render(
            PromptTemplates::translate_quality(),
            &[
                ("source_language", display_name(&request.source_language)),
                ("target_language", display_name(&request.target_language)),
                ("text", &request.original_text),
            ],
        );
        let chat = ChatRequest::new(
            self.config.models.user_translate.clone(),
            prompt,
            self.config.max_tokens.translate,
        );
        let translated = self.llm.complete(&chat).await?;
        if translated.trim().is_empty() {
            return Err(AppError::Llm("empty quality translation".to_string()));
        }
        Ok(translated)
    }

    fn emit_translation(
        &self,
        request: &TranslationRequest,
        translated: &str,
        is_final: bool,
        target_id: Option<&str>,
        is_paragraph: bool,
    ) {
        let data = TranslationData {
            original_text: request.original_text.clone(),
            translated_text: translated.to_string(),
            source_language: request.source_language.clone(),
            target_language: request.target_language.clone(),
            confidence: if is_final {
                FINAL_CONFIDENCE
            } else {
                PARTIAL_CONFIDENCE
            },
            is_final,
            segment_id: request.segment_id.clone(),
            is_high_quality: target_id.is_some().then_some(true),
            target_id: target_id.map(str::to_string),
            is_paragraph: is_paragraph.then_some(true),
        };
        let _ = self.events.send(PipelineEvent::new(
            request.correlation_id.clone(),
            EventData::Translation(data),
        ));
    }

    fn emit_quality(
        &self,
        request: &TranslationRequest,
        translated: &str,
        target_id: &str,
        is_paragraph: bool,
    ) {
        self.emit_translation(request, translated, true, Some(target_id), is_paragraph);
    }
}

#[async_trait]
impl TranslationHandler for Translator {
    async fn handle(&self, request: &TranslationRequest) -> Result<()> {
        if let Some(target_id) = request.segment_id.strip_prefix("history_") {
            self.translate_history(request, target_id, false).await
        } else if let Some(target_id) = request.segment_id.strip_prefix("paragraph_") {
            self.translate_history(request, target_id, true).await
        } else if let Some(target_id) = request.segment_id.strip_prefix("user_") {
            self.translate_user(request, target_id).await
        } else {
            self.translate_realtime(request).await
        }
    }
}
