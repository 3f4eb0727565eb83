/// Session persistence port
///
/// The core defines the shape of the entries pushed to storage; the
/// on-disk layout is the collaborator's concern. Persistence is
/// best-effort: failures are logged by callers and never fatal.
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Session metadata descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDescriptor {
    pub session_id: String,
    pub source_language: String,
    pub target_language: String,
    /// Unix millis
    pub started_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<i64>,
    /// Cumulative source word count at the descriptor's write time
    pub word_count: u32,
}

/// One bilingual sentence entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentenceEntry {
    pub id: String,
    pub source_text: String,
    pub target_text: String,
    pub timestamp: i64,
}

/// One summary entry, progressive or final
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryEntry {
    pub id: String,
    pub source_text: String,
    pub target_text: String,
    pub word_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<u32>,
    pub is_final: bool,
    pub created_at: i64,
}

/// Port trait for the external session memory service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionStorePort: Send + Sync {
    /// Open a session folder and write its metadata descriptor
    async fn begin_session(&self, descriptor: &SessionDescriptor) -> Result<()>;

    /// Append one bilingual sentence entry to the session
    async fn append_sentence(&self, session_id: &str, entry: &SentenceEntry) -> Result<()>;

    /// Append one summary entry to the session
    async fn append_summary(&self, session_id: &str, entry: &SummaryEntry) -> Result<()>;

    /// Rewrite the metadata descriptor with final counts and end time
    async fn end_session(&self, descriptor: &SessionDescriptor) -> Result<()>;
}
