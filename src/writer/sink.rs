//! Encoder sink seam
//!
//! A `TrackSink` is the incremental encoder behind one track. Sinks are
//! created lazily by a `SinkFactory` once the track's format is known
//! (from its first accepted frame, or the silence default for padding).

use crate::capture::frame::{AudioFormat, AudioSamples, VideoBuffer, VideoFormat};
use crate::utils::time::MediaTime;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors reported by an encoder sink
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("FFmpeg error: {0}")]
    Ffmpeg(String),

    #[error("Sample does not match track format: {0}")]
    FormatMismatch(String),

    #[error("Sink is closed")]
    Closed,
}

/// Data of one sample handed to a sink
#[derive(Debug, Clone, Copy)]
pub enum SampleData<'a> {
    Video(&'a VideoBuffer),
    Audio(&'a AudioSamples),
}

/// A sample with session-relative timing
#[derive(Debug, Clone, Copy)]
pub struct EncodedSample<'a> {
    /// Presentation time relative to the session start
    pub pts: MediaTime,
    pub duration: MediaTime,
    pub data: SampleData<'a>,
}

/// Format a sink is created for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackFormat {
    Video(VideoFormat),
    Audio(AudioFormat),
}

impl TrackFormat {
    pub fn audio(&self) -> Option<&AudioFormat> {
        match self {
            TrackFormat::Audio(format) => Some(format),
            TrackFormat::Video(_) => None,
        }
    }
}

/// Incremental encoder for one track
pub trait TrackSink: Send {
    /// Whether the encoder can take another sample right now
    fn is_ready_for_more_data(&mut self) -> bool;

    /// Append one sample
    fn append(&mut self, sample: EncodedSample<'_>) -> Result<(), SinkError>;

    /// Flush and close, blocking until the encoder reaches a terminal state
    fn finish(&mut self) -> Result<(), SinkError>;

    /// Abort and discard any partial output
    fn cancel(&mut self);
}

/// Creates sinks and combines finished track parts into containers
pub trait SinkFactory: Send + Sync {
    /// File extension for a track part of this format
    fn part_extension(&self, format: &TrackFormat) -> &'static str;

    /// Create a sink writing to `path`
    fn create_sink(&self, path: &Path, format: &TrackFormat) -> Result<Box<dyn TrackSink>, SinkError>;

    /// Combine two or more finished track parts into one container file
    fn mux(&self, parts: &[PathBuf], output: &Path) -> Result<(), SinkError>;
}
