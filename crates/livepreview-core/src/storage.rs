//! Session history using sled
//!
//! Finished preview sessions are saved as transcripts (session identity,
//! final phase, every log entry) so they can be listed and replayed later.
//! A second tree indexes transcripts newest-first.

use serde::{Deserialize, Serialize};
use sled::{Db, Tree};
use std::path::Path;
use std::sync::Arc;

use crate::error::{PreviewError, Result};
use crate::log_sink::LogEntry;
use crate::session::Phase;

const TRANSCRIPTS_TREE: &str = "transcripts";
const INDEX_TREE: &str = "transcript_index";

/// Everything recorded about one finished session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionTranscript {
    pub id: String,
    pub sandbox_id: Option<String>,
    pub url: Option<String>,
    pub final_phase: Phase,
    /// Microseconds since UNIX_EPOCH
    pub started_at: u64,
    pub ended_at: u64,
    pub entries: Vec<LogEntry>,
}

impl SessionTranscript {
    pub fn info(&self) -> TranscriptInfo {
        TranscriptInfo {
            id: self.id.clone(),
            sandbox_id: self.sandbox_id.clone(),
            url: self.url.clone(),
            final_phase: self.final_phase,
            started_at: self.started_at,
            ended_at: self.ended_at,
            entry_count: self.entries.len(),
            error_count: self.entries.iter().filter(|e| e.is_error()).count(),
        }
    }

    pub fn duration_ms(&self) -> u64 {
        self.ended_at.saturating_sub(self.started_at) / 1000
    }
}

/// Listing row kept in the index tree
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TranscriptInfo {
    pub id: String,
    pub sandbox_id: Option<String>,
    pub url: Option<String>,
    pub final_phase: Phase,
    pub started_at: u64,
    pub ended_at: u64,
    pub entry_count: usize,
    #[serde(default)]
    pub error_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryStats {
    pub transcript_count: usize,
    pub size_bytes: u64,
}

/// Transcript store on an embedded sled database
#[derive(Clone)]
pub struct SessionHistory {
    db: Arc<Db>,
}

impl SessionHistory {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = sled::open(path).map_err(|e| {
            PreviewError::Storage(format!("Failed to open history at {}: {e}", path.display()))
        })?;
        Ok(Self { db: Arc::new(db) })
    }

    fn tree(&self, name: &str) -> Result<Tree> {
        self.db
            .open_tree(name)
            .map_err(|e| PreviewError::Storage(format!("Failed to open {name} tree: {e}")))
    }

    /// Newest-first ordering comes from inverting the start time
    fn index_key(started_at: u64, id: &str) -> String {
        format!("{:016x}:{}", u64::MAX - started_at, id)
    }

    pub async fn save(&self, transcript: &SessionTranscript) -> Result<()> {
        let bytes = serde_json::to_vec(transcript)?;
        self.tree(TRANSCRIPTS_TREE)?
            .insert(transcript.id.as_bytes(), bytes)?;

        let info = serde_json::to_vec(&transcript.info())?;
        self.tree(INDEX_TREE)?.insert(
            Self::index_key(transcript.started_at, &transcript.id).as_bytes(),
            info,
        )?;

        self.db
            .flush_async()
            .await
            .map_err(|e| PreviewError::Storage(format!("Failed to flush history: {e}")))?;

        tracing::info!("Saved session transcript {}", transcript.id);
        Ok(())
    }

    pub async fn load(&self, id: &str) -> Result<SessionTranscript> {
        let bytes = self
            .tree(TRANSCRIPTS_TREE)?
            .get(id.as_bytes())?
            .ok_or_else(|| PreviewError::Storage(format!("Transcript not found: {id}")))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// All transcripts, newest first
    pub async fn list(&self) -> Result<Vec<TranscriptInfo>> {
        let mut infos = Vec::new();
        for item in self.tree(INDEX_TREE)?.iter() {
            let (_key, value) = item?;
            infos.push(serde_json::from_slice(&value)?);
        }
        Ok(infos)
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let transcript = self.load(id).await?;
        self.tree(TRANSCRIPTS_TREE)?.remove(id.as_bytes())?;
        self.tree(INDEX_TREE)?
            .remove(Self::index_key(transcript.started_at, id).as_bytes())?;

        self.db
            .flush_async()
            .await
            .map_err(|e| PreviewError::Storage(format!("Failed to flush history: {e}")))?;

        tracing::info!("Deleted session transcript {}", id);
        Ok(())
    }

    pub fn stats(&self) -> Result<HistoryStats> {
        Ok(HistoryStats {
            transcript_count: self.tree(TRANSCRIPTS_TREE)?.len(),
            size_bytes: self.db.size_on_disk()?,
        })
    }
}
