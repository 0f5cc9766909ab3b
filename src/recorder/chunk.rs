//! Chunk lifecycle
//!
//! Chunk boundaries end the current writer set and arm a fresh one. A
//! discard throws the old set away. A save finishes it, moves the files to
//! shared storage and publishes a chunk record for the consumer.

use super::signals::CHUNK_SAVED_TOPIC;
use crate::config::RecorderConfig;
use crate::handoff::keys;
use crate::handoff::notify::Notifier;
use crate::handoff::queue::{ChunkHandoffQueue, ChunkRecord, ChunkStatus};
use crate::handoff::store::SharedStore;
use crate::writer::track::{TrackRole, WriterError, WriterResult};
use crate::writer::{FinishedWriterSet, SinkFactory, WriterSet, WriterSetOptions, WriterSetOutcome};
use chrono::Utc;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Ignores repeats of an operation inside a time window
#[derive(Debug)]
pub struct Debounce {
    window: Duration,
    last: Option<Instant>,
}

impl Debounce {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// True if the operation may run at `now`, and starts a new window
    pub fn try_pass(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last {
            if now.saturating_duration_since(last) < self.window {
                return false;
            }
        }
        self.last = Some(now);
        true
    }
}

/// Result of saving a writer set
#[derive(Debug, Clone)]
pub enum SaveOutcome {
    /// A record was built and handed to the queue
    Published(ChunkRecord),
    /// No writer set, or it never received video
    NothingCaptured,
    /// Finishing or persisting failed
    Failed {
        chunk_id: Option<String>,
        error: String,
    },
}

pub struct ChunkLifecycle {
    config: RecorderConfig,
    factory: Arc<dyn SinkFactory>,
    store: Arc<dyn SharedStore>,
    queue: ChunkHandoffQueue,
    notifier: Arc<dyn Notifier>,
}

impl ChunkLifecycle {
    pub fn new(
        config: RecorderConfig,
        factory: Arc<dyn SinkFactory>,
        store: Arc<dyn SharedStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let queue = ChunkHandoffQueue::new(store.clone());
        Self {
            config,
            factory,
            store,
            queue,
            notifier,
        }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn SharedStore> {
        &self.store
    }

    pub fn queue(&self) -> &ChunkHandoffQueue {
        &self.queue
    }

    /// Create a writer set, retrying with a linear backoff
    pub fn create_writer_set(&self, options: WriterSetOptions) -> WriterResult<WriterSet> {
        let retry = &self.config.writer_set_retry;
        let attempts = retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            match WriterSet::create(&self.config.scratch_dir, options, self.factory.clone(), &self.config) {
                Ok(set) => return Ok(set),
                Err(e) if attempt < attempts => {
                    tracing::warn!(
                        "Writer set creation failed (attempt {}/{}): {}",
                        attempt,
                        attempts,
                        e
                    );
                    std::thread::sleep(Duration::from_millis(retry.backoff_ms * attempt as u64));
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!("Giving up on writer set after {} attempts: {}", attempts, e);
                    return Err(e);
                }
            }
        }
    }

    /// Throw away the current writer set and everything it wrote
    pub fn discard(&self, current: Option<WriterSet>) {
        if let Some(set) = current {
            tracing::info!("Discarding writer set {}", set.id());
            set.discard();
        }
    }

    /// Finish the current writer set and publish it under `chunk_id`
    pub fn save(&self, current: Option<WriterSet>, chunk_id: Option<String>) -> SaveOutcome {
        let Some(set) = current else {
            tracing::info!("No active writer set to save");
            return SaveOutcome::NothingCaptured;
        };
        let options = set.options();
        let set_id = set.id();

        let finished = match set.finish() {
            Ok(WriterSetOutcome::Completed(finished)) => finished,
            Ok(WriterSetOutcome::NeverStarted) => {
                tracing::info!("Writer set {} captured no video, nothing to save", set_id);
                return SaveOutcome::NothingCaptured;
            }
            Err(e) => return self.fail(chunk_id, &options, e.to_string()),
        };

        let record = match self.persist(finished, chunk_id.clone()) {
            Ok(record) => record,
            Err(e) => return self.fail(chunk_id, &options, e.to_string()),
        };

        if let Err(e) = self.queue.upsert(&record) {
            tracing::warn!("Failed to publish chunk record {:?}: {}", record.chunk_id, e);
        }
        self.write_last_chunk_keys(&record);

        tracing::info!(
            "Saved chunk {:?}: {:?} ({:.3}s)",
            record.chunk_id,
            record.video_file_ref,
            record.duration_secs
        );
        SaveOutcome::Published(record)
    }

    /// Post the chunk-saved signal
    pub fn signal_saved(&self) {
        self.notifier.post(CHUNK_SAVED_TOPIC);
    }

    fn fail(&self, chunk_id: Option<String>, options: &WriterSetOptions, error: String) -> SaveOutcome {
        tracing::error!("Failed to save chunk {:?}: {}", chunk_id, error);
        // Only a consumer waiting on a specific id needs to hear about a lost chunk
        if chunk_id.is_some() {
            let record = ChunkRecord::failed(chunk_id.clone(), options);
            if let Err(e) = self.queue.upsert(&record) {
                tracing::warn!("Failed to publish failed chunk record: {}", e);
            }
        }
        SaveOutcome::Failed { chunk_id, error }
    }

    /// Move finished files into the chunks directory and build the record
    fn persist(&self, finished: FinishedWriterSet, chunk_id: Option<String>) -> WriterResult<ChunkRecord> {
        let chunks_dir = self.config.chunks_dir();
        let id = finished.id.simple().to_string();
        let prefix = format!("chunk_{}_{}", Utc::now().timestamp_millis(), &id[..8]);

        let result = (|| {
            std::fs::create_dir_all(&chunks_dir)?;
            let mut moved: Vec<PathBuf> = Vec::new();
            let mut place = |from: &Path, suffix: &str| -> WriterResult<String> {
                let name = format!("{}_{}", prefix, suffix);
                let to = chunks_dir.join(&name);
                match move_file(from, &to) {
                    Ok(()) => {
                        moved.push(to);
                        Ok(name)
                    }
                    Err(e) => {
                        for path in &moved {
                            let _ = std::fs::remove_file(path);
                        }
                        Err(WriterError::Io(e))
                    }
                }
            };

            let video = place(&finished.main.path, "video.mp4")?;
            let mic = finished
                .mic
                .as_ref()
                .map(|output| place(&output.path, "mic.wav"))
                .transpose()?;
            let app = finished
                .app
                .as_ref()
                .map(|output| place(&output.path, "app.wav"))
                .transpose()?;
            Ok::<_, WriterError>((video, mic, app))
        })();
        finished.remove_scratch();
        let (video, mic, app) = result?;

        let embedded_end = |role: TrackRole| finished.main.track(role).map(|t| t.end.as_secs_f64());
        let mic_duration = finished
            .mic
            .as_ref()
            .map(|o| o.duration.as_secs_f64())
            .or_else(|| embedded_end(TrackRole::EmbeddedMic));
        let app_duration = finished
            .app
            .as_ref()
            .map(|o| o.duration.as_secs_f64())
            .or_else(|| embedded_end(TrackRole::EmbeddedApp));

        Ok(ChunkRecord {
            chunk_id,
            video_file_ref: Some(video),
            mic_audio_file_ref: mic,
            app_audio_file_ref: app,
            mic_was_enabled: finished.options.mic_enabled,
            had_separate_audio: finished.options.separate_audio,
            created_at: Utc::now(),
            status: ChunkStatus::Complete,
            duration_secs: finished.main.duration.as_secs_f64(),
            mic_audio_duration_secs: mic_duration,
            app_audio_duration_secs: app_duration,
        })
    }

    /// Legacy single-chunk keys, each written on its own
    fn write_last_chunk_keys(&self, record: &ChunkRecord) {
        let string_key = |key: &str, value: &Option<String>| match value {
            Some(v) => self.store.put(key, Value::String(v.clone())),
            None => self.store.remove(key),
        };
        let results = [
            string_key(keys::LAST_VIDEO_FILE, &record.video_file_ref),
            string_key(keys::LAST_MIC_AUDIO_FILE, &record.mic_audio_file_ref),
            string_key(keys::LAST_APP_AUDIO_FILE, &record.app_audio_file_ref),
            self.store.put(keys::LAST_MIC_ENABLED, Value::Bool(record.mic_was_enabled)),
            self.store
                .put(keys::LAST_HAD_SEPARATE_AUDIO, Value::Bool(record.had_separate_audio)),
        ];
        for result in results {
            if let Err(e) = result {
                tracing::warn!("Failed to write last chunk metadata: {}", e);
            }
        }
    }
}

/// Rename, falling back to copy and delete across filesystems
fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }
    std::fs::copy(from, to)?;
    std::fs::remove_file(from)?;
    Ok(())
}
