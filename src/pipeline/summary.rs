//! Progressive summary engine
//!
//! Tracks the cumulative source word count and fires bilingual summaries at
//! configured thresholds, plus one final summary at session end. Runs as
//! its own task with a mailbox so summary generation never races pipeline
//! state; jobs are processed strictly sequentially with pacing between
//! jobs fired by the same update.

use crate::config::{LlmConfig, SummaryConfig};
use crate::domain::events::{codes, EventData, PipelineEvent, ProgressiveSummaryData, SummaryData};
use crate::domain::language::{count_source_units, display_name, is_character_based};
use crate::domain::models::{generate_id, Summary, Translation};
use crate::domain::prompts::{render, PromptTemplates};
use crate::error::{AppError, Result};
use crate::ports::llm::{ChatRequest, LlmServicePort};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

const JOB_PACING: Duration = Duration::from_secs(1);

/// Mailbox messages for the engine task
enum SummaryMessage {
    Begin {
        correlation_id: String,
        source_language: String,
        target_language: String,
    },
    AddTranslation(Translation),
    Finalize {
        reply: oneshot::Sender<Option<Summary>>,
    },
}

/// Handle for the summary engine task
#[derive(Clone)]
pub struct SummaryEngineHandle {
    tx: mpsc::UnboundedSender<SummaryMessage>,
}

impl SummaryEngineHandle {
    /// Reset state for a new session
    pub fn begin(&self, correlation_id: &str, source_language: &str, target_language: &str) {
        let _ = self.tx.send(SummaryMessage::Begin {
            correlation_id: correlation_id.to_string(),
            source_language: source_language.to_string(),
            target_language: target_language.to_string(),
        });
    }

    /// Feed one final realtime translation
    pub fn add_translation(&self, translation: Translation) {
        let _ = self.tx.send(SummaryMessage::AddTranslation(translation));
    }

    /// Produce the end-of-session summary over any remaining text
    pub async fn finalize(&self) -> Option<Summary> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(SummaryMessage::Finalize { reply }).is_err() {
            return None;
        }
        rx.await.ok().flatten()
    }
}

/// Start the engine task
pub fn spawn_summary_engine(
    config: SummaryConfig,
    llm_config: LlmConfig,
    llm: Arc<dyn LlmServicePort>,
    events: mpsc::UnboundedSender<PipelineEvent>,
    produced: mpsc::UnboundedSender<Summary>,
) -> SummaryEngineHandle {
    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut engine = SummaryEngine {
            config,
            llm_config,
            llm,
            events,
            produced,
            state: SessionState::default(),
        };
        while let Some(message) = rx.recv().await {
            match message {
                SummaryMessage::Begin {
                    correlation_id,
                    source_language,
                    target_language,
                } => {
                    engine.state = SessionState {
                        correlation_id,
                        source_language,
                        target_language,
                        ..SessionState::default()
                    };
                }
                SummaryMessage::AddTranslation(translation) => {
                    engine.handle_add(translation).await;
                }
                SummaryMessage::Finalize { reply } => {
                    let result = engine.handle_finalize().await;
                    let _ = reply.send(result);
                }
            }
        }
    });
    SummaryEngineHandle { tx }
}

#[derive(Default)]
struct SessionState {
    correlation_id: String,
    source_language: String,
    target_language: String,
    total_word_count: u32,
    /// Effective (multiplied) thresholds already fired
    reached: HashSet<u32>,
    /// Previous cumulative summary in the source language
    last_summary: Option<String>,
    /// Source text accumulated since the last processed job
    pending_source: Vec<String>,
    all_source: Vec<String>,
    range_start: Option<i64>,
    range_end: i64,
}

struct SummaryJob {
    base_threshold: u32,
    word_count: u32,
}

struct SummaryEngine {
    config: SummaryConfig,
    llm_config: LlmConfig,
    llm: Arc<dyn LlmServicePort>,
    events: mpsc::UnboundedSender<PipelineEvent>,
    produced: mpsc::UnboundedSender<Summary>,
    state: SessionState,
}

impl SummaryEngine {
    async fn handle_add(&mut self, translation: Translation) {
        let units = count_source_units(&translation.original, &self.state.source_language) as u32;
        self.state.total_word_count += units;
        self.state.all_source.push(translation.original.clone());
        self.state.pending_source.push(translation.original);
        if self.state.range_start.is_none() {
            self.state.range_start = Some(translation.timestamp);
        }
        self.state.range_end = translation.timestamp;

        let multiplier = if is_character_based(&self.state.source_language) {
            self.config.character_language_multiplier
        } else {
            1
        };

        let mut jobs = Vec::new();
        for &base in &self.config.thresholds {
            let effective = base * multiplier;
            if self.state.total_word_count >= effective && !self.state.reached.contains(&effective)
            {
                self.state.reached.insert(effective);
                jobs.push(SummaryJob {
                    base_threshold: base,
                    word_count: self.state.total_word_count,
                });
            }
        }

        for (i, job) in jobs.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(JOB_PACING).await;
            }
            self.run_job(job).await;
        }
    }

    async fn run_job(&mut self, job: &SummaryJob) {
        log::info!(
            "Generating progressive summary at threshold {} ({} words)",
            job.base_threshold,
            job.word_count
        );
        match self.generate(job.word_count, false).await {
            Ok(summary) => {
                let data = ProgressiveSummaryData {
                    source_text: summary.source_text.clone(),
                    target_text: summary.target_text.clone(),
                    source_language: self.state.source_language.clone(),
                    target_language: self.state.target_language.clone(),
                    word_count: job.word_count,
                    threshold: job.base_threshold,
                    start_time: summary.start_time,
                    end_time: summary.end_time,
                };
                let _ = self.events.send(PipelineEvent::new(
                    self.state.correlation_id.clone(),
                    EventData::ProgressiveSummary(data),
                ));
                self.state.last_summary = Some(summary.source_text.clone());
                self.state.pending_source.clear();
                let _ = self.produced.send(Summary {
                    threshold: Some(job.base_threshold),
                    ..summary
                });
            }
            Err(e) => {
                // The threshold stays marked fired: re-running the same
                // input would double-bill without new information.
                log::error!(
                    "Progressive summary at threshold {} failed: {}",
                    job.base_threshold,
                    e
                );
                let _ = self.events.send(PipelineEvent::error(
                    self.state.correlation_id.clone(),
                    codes::PROGRESSIVE_SUMMARY_GENERATION_FAILED,
                    e.to_string(),
                    true,
                ));
            }
        }
    }

    async fn handle_finalize(&mut self) -> Option<Summary> {
        if self.state.pending_source.is_empty() {
            return None;
        }
        match self.generate(self.state.total_word_count, true).await {
            Ok(summary) => {
                let data = SummaryData {
                    source_text: summary.source_text.clone(),
                    target_text: summary.target_text.clone(),
                    source_language: self.state.source_language.clone(),
                    target_language: self.state.target_language.clone(),
                    word_count: summary.word_count,
                    start_time: summary.start_time,
                    end_time: summary.end_time,
                    is_final: true,
                };
                let _ = self.events.send(PipelineEvent::new(
                    self.state.correlation_id.clone(),
                    EventData::Summary(data),
                ));
                self.state.last_summary = Some(summary.source_text.clone());
                self.state.pending_source.clear();
                let _ = self.produced.send(summary.clone());
                Some(summary)
            }
            Err(e) => {
                log::error!("Final summary failed: {}", e);
                let _ = self.events.send(PipelineEvent::error(
                    self.state.correlation_id.clone(),
                    codes::PROGRESSIVE_SUMMARY_GENERATION_FAILED,
                    e.to_string(),
                    true,
                ));
                None
            }
        }
    }

    /// Generate one cumulative summary and its target-language rendering
    async fn generate(&self, word_count: u32, is_final: bool) -> Result<Summary> {
        let source_name = display_name(&self.state.source_language);
        let target_name = display_name(&self.state.target_language);

        let prompt = match &self.state.last_summary {
            None => render(
                PromptTemplates::summary_first(),
                &[
                    ("source_language", source_name),
                    ("text", &self.state.all_source.join(" ")),
                ],
            ),
            Some(previous) => render(
                PromptTemplates::summary_cumulative(),
                &[
                    ("source_language", source_name),
                    ("previous", previous),
                    ("text", &self.state.pending_source.join(" ")),
                ],
            ),
        };

        let source_text = self
            .llm
            .complete(&ChatRequest::new(
                self.llm_config.models.summary.clone(),
                prompt,
                self.llm_config.max_tokens.summary,
            ))
            .await?;
        if source_text.trim().is_empty() {
            return Err(AppError::Llm("empty summary".to_string()));
        }

        let target_text = if self.state.source_language == self.state.target_language {
            source_text.clone()
        } else {
            let prompt = render(
                PromptTemplates::summary_translate(),
                &[
                    ("source_language", source_name),
                    ("target_language", target_name),
                    ("text", &source_text),
                ],
            );
            self.llm
                .complete(&ChatRequest::new(
                    self.llm_config.models.summary_translate.clone(),
                    prompt,
                    self.llm_config.max_tokens.summary,
                ))
                .await?
        };

        Ok(Summary {
            id: generate_id("summary"),
            source_text,
            target_text,
            word_count,
            threshold: None,
            start_time: self.state.range_start.unwrap_or(0),
            end_time: self.state.range_end,
            is_final,
        })
    }
}
