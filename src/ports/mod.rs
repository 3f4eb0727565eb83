/// Port trait definitions (interfaces)
///
/// These traits define the contracts for adapters to implement.
/// Following the ports-and-adapters (hexagonal) architecture pattern.
pub mod asr;
pub mod llm;
pub mod store;

#[cfg(test)]
pub mod mocks;

pub use asr::{AsrEventSink, AsrStream, ConnectionMetrics, StreamingAsrPort, TranscriptResult};
pub use llm::{ChatDeltaStream, ChatRequest, LlmServicePort};
pub use store::{SentenceEntry, SessionDescriptor, SessionStorePort, SummaryEntry};
