//! LLM service adapters
//!
//! This module provides adapters for LLM providers:
//! - OpenAI: chat completions, blocking and streaming

pub mod openai;

pub use openai::OpenAiService;
