//! Recorder configuration
//!
//! Loaded from a camelCase JSON file. Every field has a default, so a
//! missing file or a partial file is fine.

use crate::utils::time::MediaTime;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Silence padding settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PaddingConfig {
    /// How long padding waits for a busy encoder before giving up
    pub wait_timeout_ms: u64,

    /// Frames of silence appended per call
    pub chunk_frames: usize,

    /// Sample rate for tracks that never saw real audio
    pub default_sample_rate: u32,
}

impl Default for PaddingConfig {
    fn default() -> Self {
        Self {
            wait_timeout_ms: 500,
            chunk_frames: 1024,
            default_sample_rate: 48_000,
        }
    }
}

/// Writer set creation retry policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryConfig {
    pub attempts: u32,
    /// Backoff before attempt n is `n * backoff_ms`
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_ms: 50,
        }
    }
}

/// Video encoding settings for the FFmpeg backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VideoEncodingConfig {
    /// Codec preference; the first available wins, the last is the fallback
    pub codecs: Vec<String>,

    /// Constant output frame rate
    pub frame_rate: u32,

    pub crf: u8,
}

impl Default for VideoEncodingConfig {
    fn default() -> Self {
        Self {
            codecs: vec!["libx265".to_string(), "libx264".to_string()],
            frame_rate: 30,
            crf: 23,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecorderConfig {
    /// Temporary writer set storage
    pub scratch_dir: PathBuf,

    /// Durable storage shared with the consumer process
    pub shared_dir: PathBuf,

    /// Repeated chunk boundary signals inside this window are ignored
    pub debounce_window_ms: u64,

    pub padding: PaddingConfig,

    /// Publish status every N accepted video frames
    pub status_frame_interval: u32,

    /// Heartbeat age after which the producer counts as gone
    pub heartbeat_tolerance_ms: u64,

    pub writer_set_retry: RetryConfig,

    /// Frame rate used for the duration of a first frame with none reported
    pub nominal_frame_rate: u32,

    pub video: VideoEncodingConfig,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        let base = std::env::temp_dir().join("screenchunk");
        Self {
            scratch_dir: base.join("scratch"),
            shared_dir: base.join("shared"),
            debounce_window_ms: 100,
            padding: PaddingConfig::default(),
            status_frame_interval: 15,
            heartbeat_tolerance_ms: 5_000,
            writer_set_retry: RetryConfig::default(),
            nominal_frame_rate: 60,
            video: VideoEncodingConfig::default(),
        }
    }
}

impl RecorderConfig {
    /// Load from `path`, falling back to defaults when the file is missing
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        tracing::debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nominal_frame_rate == 0 || self.video.frame_rate == 0 {
            return Err(ConfigError::Invalid("frame rates must be positive".to_string()));
        }
        if self.padding.chunk_frames == 0 {
            return Err(ConfigError::Invalid("padding.chunkFrames must be positive".to_string()));
        }
        if self.padding.default_sample_rate == 0 {
            return Err(ConfigError::Invalid(
                "padding.defaultSampleRate must be positive".to_string(),
            ));
        }
        if self.writer_set_retry.attempts == 0 {
            return Err(ConfigError::Invalid(
                "writerSetRetry.attempts must be at least 1".to_string(),
            ));
        }
        if self.status_frame_interval == 0 {
            return Err(ConfigError::Invalid("statusFrameInterval must be positive".to_string()));
        }
        if self.video.codecs.is_empty() {
            return Err(ConfigError::Invalid("video.codecs must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_window_ms)
    }

    pub fn heartbeat_tolerance(&self) -> Duration {
        Duration::from_millis(self.heartbeat_tolerance_ms)
    }

    pub fn nominal_frame_duration(&self) -> MediaTime {
        MediaTime::frame_duration(self.nominal_frame_rate)
    }

    /// Where finalized chunk files are moved
    pub fn chunks_dir(&self) -> PathBuf {
        self.shared_dir.join("chunks")
    }

    /// Backing file of the file store
    pub fn store_path(&self) -> PathBuf {
        self.shared_dir.join("store.json")
    }
}
