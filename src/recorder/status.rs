//! Status reporter
//!
//! Publishes a heartbeat and coarse state to shared storage every few
//! video frames and on state changes. Consumers judge liveness from the
//! heartbeat age, since the producer can be killed without a clean stop.

use crate::handoff::keys;
use crate::handoff::store::{SharedStore, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Snapshot published under the status key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionStatus {
    pub alive: bool,

    /// Mic audio was seen at least once this capture
    pub mic_active: bool,

    pub capturing_chunk: bool,
    pub last_heartbeat: DateTime<Utc>,

    #[serde(default)]
    pub chunk_started_at: Option<DateTime<Utc>>,
}

impl ExtensionStatus {
    pub fn idle(now: DateTime<Utc>) -> Self {
        Self {
            alive: false,
            mic_active: false,
            capturing_chunk: false,
            last_heartbeat: now,
            chunk_started_at: None,
        }
    }

    /// Alive flag set and heartbeat no older than `tolerance`
    pub fn is_alive(&self, now: DateTime<Utc>, tolerance: Duration) -> bool {
        let age_ms = now.signed_duration_since(self.last_heartbeat).num_milliseconds();
        self.alive && age_ms <= tolerance.as_millis() as i64
    }
}

/// Read the published status, if any
pub fn read_status(store: &dyn SharedStore) -> Result<Option<ExtensionStatus>, StoreError> {
    match store.get(keys::EXTENSION_STATUS)? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

pub struct StatusReporter {
    store: Arc<dyn SharedStore>,
    frame_interval: u32,
    frames_since_publish: u32,
    status: ExtensionStatus,
}

impl StatusReporter {
    pub fn new(store: Arc<dyn SharedStore>, frame_interval: u32) -> Self {
        Self {
            store,
            frame_interval: frame_interval.max(1),
            frames_since_publish: 0,
            status: ExtensionStatus::idle(Utc::now()),
        }
    }

    pub fn status(&self) -> &ExtensionStatus {
        &self.status
    }

    /// Mark the producer alive and publish
    pub fn capture_started(&mut self) {
        self.status = ExtensionStatus::idle(Utc::now());
        self.status.alive = true;
        self.publish();
    }

    /// Count a video frame, publishing every `frame_interval` frames
    pub fn on_video_frame(&mut self) {
        self.frames_since_publish += 1;
        if self.frames_since_publish >= self.frame_interval {
            self.publish();
        }
    }

    pub fn on_mic_audio(&mut self) {
        if !self.status.mic_active {
            self.status.mic_active = true;
            self.publish();
        }
    }

    pub fn chunk_started(&mut self, at: DateTime<Utc>) {
        self.status.capturing_chunk = true;
        self.status.chunk_started_at = Some(at);
        self.publish();
    }

    pub fn chunk_ended(&mut self) {
        self.status.capturing_chunk = false;
        self.status.chunk_started_at = None;
        self.publish();
    }

    /// Refresh the heartbeat and write the snapshot
    ///
    /// Failures are logged; status is best-effort.
    pub fn publish(&mut self) {
        self.frames_since_publish = 0;
        self.status.last_heartbeat = Utc::now();
        self.write();
    }

    /// Reset to idle when capture ends
    pub fn reset(&mut self) {
        self.frames_since_publish = 0;
        self.status = ExtensionStatus::idle(Utc::now());
        self.write();
    }

    fn write(&self) {
        let value = match serde_json::to_value(&self.status) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Failed to encode status: {}", e);
                return;
            }
        };
        if let Err(e) = self.store.put(keys::EXTENSION_STATUS, value) {
            tracing::warn!("Failed to publish status: {}", e);
        }
    }
}
