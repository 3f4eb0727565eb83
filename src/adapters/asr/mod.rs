//! ASR (Automatic Speech Recognition) service adapters
//!
//! This module provides adapters for streaming ASR providers:
//! - Deepgram: live WebSocket streaming

pub mod deepgram;

pub use deepgram::DeepgramAdapter;
