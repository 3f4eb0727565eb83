//! Configuration surface for the pipeline core
//!
//! Every block mirrors a constructor parameter group and can be populated
//! from the environment. Defaults match the documented tuning for live
//! lecture capture at 16 kHz mono PCM.

use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::env;

/// Audio frame parameters expected from the capture collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Frame duration in milliseconds
    pub frame_ms: u32,
    /// Frame size in bytes (s16le mono)
    pub frame_size: usize,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            frame_ms: 20,
            frame_size: 640,
            sample_rate: 16000,
        }
    }
}

/// Streaming recognizer connection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognizerConfig {
    pub api_key: String,
    pub model: String,
    /// Request interim (non-final) results
    pub interim: bool,
    /// Endpointing window in milliseconds
    pub endpointing_ms: u32,
    /// Utterance-end signal window in milliseconds
    pub utterance_end_ms: u32,
    pub smart_format: bool,
    pub no_delay: bool,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "nova-3".to_string(),
            interim: true,
            endpointing_ms: 800,
            utterance_end_ms: 1000,
            smart_format: false,
            no_delay: false,
        }
    }
}

/// Model routing for the LLM-backed stages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmModels {
    pub translate: String,
    pub summary: String,
    pub summary_translate: String,
    pub user_translate: String,
    pub vocabulary: String,
    pub report: String,
}

impl Default for LlmModels {
    fn default() -> Self {
        Self {
            translate: "gpt-5-nano".to_string(),
            summary: "gpt-5-mini".to_string(),
            summary_translate: "gpt-5-nano".to_string(),
            user_translate: "gpt-5-mini".to_string(),
            vocabulary: "gpt-5-mini".to_string(),
            report: "gpt-5-mini".to_string(),
        }
    }
}

/// Per-stage completion token budgets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmMaxTokens {
    pub translate: u32,
    pub summary: u32,
    pub vocabulary: u32,
    pub report: u32,
}

impl Default for LlmMaxTokens {
    fn default() -> Self {
        Self {
            translate: 1500,
            summary: 1500,
            vocabulary: 1500,
            report: 8192,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_key: String,
    pub models: LlmModels,
    pub max_tokens: LlmMaxTokens,
}

/// Stream coalescer tuning (C2)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoalescerConfig {
    pub debounce_ms: u64,
    pub force_commit_ms: u64,
    pub cleanup_interval_ms: u64,
    pub max_inactive_ms: u64,
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 160,
            force_commit_ms: 1100,
            cleanup_interval_ms: 30_000,
            max_inactive_ms: 60_000,
        }
    }
}

/// Translation queue tuning (C5)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub max_concurrency: usize,
    pub max_queue_size: usize,
    pub request_timeout_ms: u64,
    pub max_retries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 3,
            max_queue_size: 100,
            request_timeout_ms: 30_000,
            max_retries: 1,
        }
    }
}

/// Progressive summary tuning (C7)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryConfig {
    /// Cumulative source-word thresholds at which summaries fire
    pub thresholds: Vec<u32>,
    /// Multiplier applied to thresholds for character-counted languages
    pub character_language_multiplier: u32,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            thresholds: vec![400, 800, 1600, 2400],
            character_language_multiplier: 4,
        }
    }
}

/// Top-level configuration for the pipeline core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub recognizer: RecognizerConfig,
    pub llm: LlmConfig,
    pub coalescer: CoalescerConfig,
    pub queue: QueueConfig,
    pub summary: SummaryConfig,
    /// Route segment emission through the stream coalescer.
    /// When false, segment events are emitted directly on final
    /// recognizer results. Never both.
    pub use_coalescer: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            recognizer: RecognizerConfig::default(),
            llm: LlmConfig::default(),
            coalescer: CoalescerConfig::default(),
            queue: QueueConfig::default(),
            summary: SummaryConfig::default(),
            use_coalescer: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from the environment.
    ///
    /// API keys are required (`DEEPGRAM_API_KEY`, `OPENAI_API_KEY`); every
    /// other variable falls back to its documented default.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        config.recognizer.api_key = env::var("DEEPGRAM_API_KEY")
            .map_err(|_| AppError::Config("DEEPGRAM_API_KEY is not set".to_string()))?;
        config.llm.api_key = env::var("OPENAI_API_KEY")
            .map_err(|_| AppError::Config("OPENAI_API_KEY is not set".to_string()))?;

        if let Ok(model) = env::var("UNIVOICE_ASR_MODEL") {
            config.recognizer.model = model;
        }
        if let Ok(value) = env::var("UNIVOICE_SMART_FORMAT") {
            config.recognizer.smart_format = value == "1" || value.eq_ignore_ascii_case("true");
        }
        if let Ok(value) = env::var("UNIVOICE_NO_DELAY") {
            config.recognizer.no_delay = value == "1" || value.eq_ignore_ascii_case("true");
        }
        if let Ok(value) = env::var("UNIVOICE_USE_COALESCER") {
            config.use_coalescer = value == "1" || value.eq_ignore_ascii_case("true");
        }
        if let Ok(value) = env::var("UNIVOICE_SUMMARY_THRESHOLDS") {
            config.summary.thresholds = parse_threshold_list(&value)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints and log misconfiguration warnings.
    pub fn validate(&self) -> Result<()> {
        if self.recognizer.smart_format && self.recognizer.no_delay {
            log::warn!("smart_format=true precludes no_delay; ignoring no_delay");
        }
        if self.queue.max_concurrency == 0 {
            return Err(AppError::Config(
                "queue.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.coalescer.force_commit_ms < self.coalescer.debounce_ms {
            return Err(AppError::Config(
                "coalescer.force_commit_ms must be >= debounce_ms".to_string(),
            ));
        }
        let mut sorted = self.summary.thresholds.clone();
        sorted.sort_unstable();
        if sorted != self.summary.thresholds {
            return Err(AppError::Config(
                "summary.thresholds must be in ascending order".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_threshold_list(value: &str) -> Result<Vec<u32>> {
    value
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<u32>()
                .map_err(|_| AppError::Config(format!("invalid summary threshold: {}", part)))
        })
        .collect()
}
