//! UniVoice core
//!
//! Real-time lecture pipeline: a streaming recognizer feeds a coalescing
//! and aggregation layer, a priority translation queue drives two quality
//! tiers of LLM translation, and a progressive summary engine produces
//! bilingual summaries at growing word-count thresholds. Everything is
//! surfaced as a validated, correlation-tagged event stream.

pub mod adapters;
pub mod config;
pub mod domain;
pub mod error;
pub mod pipeline;
pub mod ports;
pub mod utils;

pub use config::AppConfig;
pub use error::{AppError, Result};
pub use pipeline::{spawn_pipeline, CommandOutcome, PipelineController, PipelineDeps};
