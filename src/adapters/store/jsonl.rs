//! JSONL session store adapter
//!
//! Reference implementation of the session memory collaborator: one folder
//! per session holding a metadata descriptor plus append-only JSONL files
//! for bilingual sentences and summaries.

use crate::error::Result;
use crate::ports::store::{SentenceEntry, SessionDescriptor, SessionStorePort, SummaryEntry};
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

const DESCRIPTOR_FILE: &str = "session.json";
const SENTENCES_FILE: &str = "sentences.jsonl";
const SUMMARIES_FILE: &str = "summaries.jsonl";

/// Folder-per-session persistence
pub struct JsonlSessionStore {
    base_dir: PathBuf,
}

impl JsonlSessionStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.base_dir.join(session_id)
    }

    async fn write_descriptor(&self, descriptor: &SessionDescriptor) -> Result<()> {
        let dir = self.session_dir(&descriptor.session_id);
        tokio::fs::create_dir_all(&dir).await?;
        let json = serde_json::to_vec_pretty(descriptor)?;
        tokio::fs::write(dir.join(DESCRIPTOR_FILE), json).await?;
        Ok(())
    }

    async fn append_line<T: Serialize + Sync>(&self, path: &Path, entry: &T) -> Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStorePort for JsonlSessionStore {
    async fn begin_session(&self, descriptor: &SessionDescriptor) -> Result<()> {
        log::info!("Opening session folder for {}", descriptor.session_id);
        self.write_descriptor(descriptor).await
    }

    async fn append_sentence(&self, session_id: &str, entry: &SentenceEntry) -> Result<()> {
        let path = self.session_dir(session_id).join(SENTENCES_FILE);
        self.append_line(&path, entry).await
    }

    async fn append_summary(&self, session_id: &str, entry: &SummaryEntry) -> Result<()> {
        let path = self.session_dir(session_id).join(SUMMARIES_FILE);
        self.append_line(&path, entry).await
    }

    async fn end_session(&self, descriptor: &SessionDescriptor) -> Result<()> {
        log::info!("Finalizing session folder for {}", descriptor.session_id);
        self.write_descriptor(descriptor).await
    }
}
