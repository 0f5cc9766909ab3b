//! Chunk handoff queue
//!
//! Finalized chunks are published as records in one ordered list under a
//! single shared storage key. A record with the same chunk id replaces the
//! previous one. The producer never removes records; the consumer clears
//! them once consumed.

use super::keys;
use super::store::{into_list, SharedStore, StoreError};
use crate::writer::WriterSetOptions;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HandoffError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("No chunk with id {0}")]
    NotFound(String),

    #[error("Failed to encode chunk record: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type HandoffResult<T> = Result<T, HandoffError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStatus {
    #[default]
    Complete,
    /// Finishing failed; the record carries no files
    Failed,
}

/// Metadata of one finalized chunk
///
/// File refs are names relative to the chunks directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRecord {
    #[serde(default)]
    pub chunk_id: Option<String>,

    #[serde(default)]
    pub video_file_ref: Option<String>,

    #[serde(default)]
    pub mic_audio_file_ref: Option<String>,

    #[serde(default)]
    pub app_audio_file_ref: Option<String>,

    pub mic_was_enabled: bool,
    pub had_separate_audio: bool,
    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub status: ChunkStatus,

    /// Duration of the main container
    #[serde(default)]
    pub duration_secs: f64,

    #[serde(default)]
    pub mic_audio_duration_secs: Option<f64>,

    #[serde(default)]
    pub app_audio_duration_secs: Option<f64>,
}

impl ChunkRecord {
    /// Record for a chunk that could not be saved
    pub fn failed(chunk_id: Option<String>, options: &WriterSetOptions) -> Self {
        Self {
            chunk_id,
            video_file_ref: None,
            mic_audio_file_ref: None,
            app_audio_file_ref: None,
            mic_was_enabled: options.mic_enabled,
            had_separate_audio: options.separate_audio,
            created_at: Utc::now(),
            status: ChunkStatus::Failed,
            duration_secs: 0.0,
            mic_audio_duration_secs: None,
            app_audio_duration_secs: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == ChunkStatus::Complete
    }

    /// Absolute path of a file ref
    pub fn resolve(chunks_dir: &Path, file_ref: &str) -> PathBuf {
        chunks_dir.join(file_ref)
    }

    pub fn video_path(&self, chunks_dir: &Path) -> Option<PathBuf> {
        self.video_file_ref.as_deref().map(|r| Self::resolve(chunks_dir, r))
    }

    pub fn mic_audio_path(&self, chunks_dir: &Path) -> Option<PathBuf> {
        self.mic_audio_file_ref.as_deref().map(|r| Self::resolve(chunks_dir, r))
    }

    pub fn app_audio_path(&self, chunks_dir: &Path) -> Option<PathBuf> {
        self.app_audio_file_ref.as_deref().map(|r| Self::resolve(chunks_dir, r))
    }
}

#[derive(Clone)]
pub struct ChunkHandoffQueue {
    store: Arc<dyn SharedStore>,
}

impl ChunkHandoffQueue {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    /// Replace any record with the same chunk id, then append
    ///
    /// Runs as a single update of the queue key.
    pub fn upsert(&self, record: &ChunkRecord) -> HandoffResult<()> {
        let mut value = Some(serde_json::to_value(record)?);
        let chunk_id = record.chunk_id.clone();
        self.store.update(keys::PENDING_CHUNKS, &mut |current| {
            let mut list = into_list(current);
            if let Some(id) = &chunk_id {
                list.retain(|entry| entry_id(entry) != Some(id.as_str()));
            }
            list.extend(value.take());
            Some(Value::Array(list))
        })?;
        tracing::debug!("Upserted chunk record {:?}", record.chunk_id);
        Ok(())
    }

    /// All records, oldest first; unreadable entries are skipped
    pub fn list(&self) -> HandoffResult<Vec<ChunkRecord>> {
        let entries = into_list(self.store.get(keys::PENDING_CHUNKS)?);
        Ok(entries
            .into_iter()
            .filter_map(|entry| match serde_json::from_value(entry) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!("Skipping unreadable chunk record: {}", e);
                    None
                }
            })
            .collect())
    }

    /// Look up a record by chunk id
    pub fn retrieve(&self, chunk_id: &str) -> HandoffResult<ChunkRecord> {
        self.list()?
            .into_iter()
            .rev()
            .find(|record| record.chunk_id.as_deref() == Some(chunk_id))
            .ok_or_else(|| HandoffError::NotFound(chunk_id.to_string()))
    }

    /// The most recently appended record
    pub fn retrieve_latest(&self) -> HandoffResult<Option<ChunkRecord>> {
        Ok(self.list()?.pop())
    }

    /// Remove the record for `chunk_id`, returning whether one existed
    pub fn remove(&self, chunk_id: &str) -> HandoffResult<bool> {
        let removed = self
            .store
            .remove_matching(keys::PENDING_CHUNKS, &|entry| entry_id(entry) == Some(chunk_id))?;
        Ok(removed > 0)
    }

    /// Drop every record
    pub fn clear(&self) -> HandoffResult<()> {
        self.store.remove(keys::PENDING_CHUNKS)?;
        Ok(())
    }
}

fn entry_id(entry: &Value) -> Option<&str> {
    entry.get("chunkId").and_then(Value::as_str)
}
