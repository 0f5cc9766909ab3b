//! Audio padding
//!
//! Audio sources go quiet (emit nothing) and usually stop before video
//! does. Before a separate audio container is finished, silence is
//! appended so its track ends where the video ends.

use super::container::ContainerWriter;
use super::sink::{SampleData, TrackFormat};
use super::track::{TrackRole, WriterError};
use crate::capture::frame::{AudioFormat, AudioSamples};
use crate::config::PaddingConfig;
use crate::utils::time::MediaTime;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PaddingError {
    #[error("Container has no {0} track to pad")]
    NoTrack(TrackRole),

    #[error("Track {role} not ready after {waited:?}")]
    Timeout { role: TrackRole, waited: Duration },

    #[error(transparent)]
    Writer(#[from] WriterError),
}

/// What padding did to one track
#[derive(Debug, Clone, PartialEq)]
pub struct PaddingReport {
    pub role: TrackRole,
    /// Silence appended
    pub padded: MediaTime,
    pub frames: u64,
    /// The track never saw real audio and was padded in the default format
    pub used_default_format: bool,
}

pub struct AudioPaddingEngine {
    wait_timeout: Duration,
    chunk_frames: usize,
    default_format: AudioFormat,
}

impl AudioPaddingEngine {
    pub fn new(config: &PaddingConfig) -> Self {
        Self {
            wait_timeout: Duration::from_millis(config.wait_timeout_ms),
            chunk_frames: config.chunk_frames.max(1),
            default_format: AudioFormat::default_pcm(config.default_sample_rate),
        }
    }

    /// Append silence to the `role` track of `container` up to `target_end`
    ///
    /// Opens the container session first when no audio ever arrived, so the
    /// result is a valid silent track.
    pub fn pad(
        &self,
        container: &mut ContainerWriter,
        role: TrackRole,
        target_end: MediaTime,
    ) -> Result<PaddingReport, PaddingError> {
        if !container.session_started() {
            container.start_session()?;
        }
        let track = container.track_mut(role).ok_or(PaddingError::NoTrack(role))?;

        let written_end = track.state().end_or_zero();
        let mut report = PaddingReport {
            role,
            padded: MediaTime::ZERO,
            frames: 0,
            used_default_format: false,
        };
        if target_end <= written_end {
            return Ok(report);
        }

        let format = match track.state().format.as_ref().and_then(TrackFormat::audio) {
            Some(format) => *format,
            None => {
                report.used_default_format = true;
                self.default_format
            }
        };
        track.open(TrackFormat::Audio(format))?;

        let total_frames = (target_end - written_end).to_samples(format.sample_rate);
        tracing::debug!(
            "Padding {} with {} frames of silence ({} -> {})",
            role,
            total_frames,
            written_end,
            target_end
        );

        while report.frames < total_frames {
            let frames = (total_frames - report.frames).min(self.chunk_frames as u64);
            if !track.wait_until_ready(self.wait_timeout) {
                return Err(PaddingError::Timeout {
                    role,
                    waited: self.wait_timeout,
                });
            }

            let silence = AudioSamples::silence(&format, frames as usize);
            let pts = written_end + MediaTime::from_samples(report.frames, format.sample_rate);
            let duration = MediaTime::from_samples(frames, format.sample_rate);
            track.append(TrackFormat::Audio(format), pts, duration, SampleData::Audio(&silence))?;

            report.frames += frames;
        }

        report.padded = MediaTime::from_samples(report.frames, format.sample_rate);
        Ok(report)
    }
}
