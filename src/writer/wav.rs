//! WAV audio sink
//!
//! Writes interleaved PCM with `hound`. Presentation times are honoured:
//! a sample that starts after the written end is preceded by silence.

use super::sink::{EncodedSample, SampleData, SinkError, TrackSink};
use crate::capture::frame::{AudioFormat, AudioSamples, SampleFormat};
use crate::utils::time::MediaTime;
use hound::{WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// Gaps shorter than this are treated as contiguous audio
const GAP_TOLERANCE: MediaTime = MediaTime::from_millis(1);

/// Frames of silence written per piece when filling a gap
const SILENCE_CHUNK_FRAMES: u64 = 1024;

pub struct WavAudioSink {
    path: PathBuf,
    format: AudioFormat,
    writer: Option<WavWriter<BufWriter<File>>>,
    frames_written: u64,
}

impl WavAudioSink {
    pub fn create(path: &Path, format: AudioFormat) -> Result<Self, SinkError> {
        let spec = WavSpec {
            channels: format.channels,
            sample_rate: format.sample_rate,
            bits_per_sample: format.bits_per_sample(),
            sample_format: match format.sample_format {
                SampleFormat::I16 => hound::SampleFormat::Int,
                SampleFormat::F32 => hound::SampleFormat::Float,
            },
        };
        let writer = WavWriter::create(path, spec)?;

        tracing::debug!(
            "Opened WAV sink {:?} ({}Hz, {}ch, {}-bit)",
            path,
            format.sample_rate,
            format.channels,
            format.bits_per_sample()
        );

        Ok(Self {
            path: path.to_path_buf(),
            format,
            writer: Some(writer),
            frames_written: 0,
        })
    }

    /// Session-relative end of the audio written so far
    pub fn written_end(&self) -> MediaTime {
        MediaTime::from_samples(self.frames_written, self.format.sample_rate)
    }

    fn write_samples(&mut self, samples: &AudioSamples) -> Result<(), SinkError> {
        let writer = self.writer.as_mut().ok_or(SinkError::Closed)?;
        match samples {
            AudioSamples::I16(values) => {
                for &value in values {
                    writer.write_sample(value)?;
                }
            }
            AudioSamples::F32(values) => {
                for &value in values {
                    writer.write_sample(value)?;
                }
            }
        }
        self.frames_written += (samples.len() / self.format.channels.max(1) as usize) as u64;
        Ok(())
    }

    /// Write `frames` of silence in bounded pieces
    fn write_silence(&mut self, frames: u64) -> Result<(), SinkError> {
        let piece = AudioSamples::silence(&self.format, frames.min(SILENCE_CHUNK_FRAMES) as usize);
        let mut remaining = frames;
        while remaining >= SILENCE_CHUNK_FRAMES {
            self.write_samples(&piece)?;
            remaining -= SILENCE_CHUNK_FRAMES;
        }
        if remaining > 0 {
            self.write_samples(&AudioSamples::silence(&self.format, remaining as usize))?;
        }
        Ok(())
    }
}

impl TrackSink for WavAudioSink {
    fn is_ready_for_more_data(&mut self) -> bool {
        self.writer.is_some()
    }

    fn append(&mut self, sample: EncodedSample<'_>) -> Result<(), SinkError> {
        let SampleData::Audio(samples) = sample.data else {
            return Err(SinkError::FormatMismatch("video sample on audio sink".to_string()));
        };
        if samples.sample_format() != self.format.sample_format {
            return Err(SinkError::FormatMismatch(format!(
                "expected {:?} samples, got {:?}",
                self.format.sample_format,
                samples.sample_format()
            )));
        }

        let written_end = self.written_end();
        if sample.pts > written_end + GAP_TOLERANCE {
            let gap_frames = (sample.pts - written_end).to_samples(self.format.sample_rate);
            self.write_silence(gap_frames)?;
        }

        self.write_samples(samples)
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        let writer = self.writer.take().ok_or(SinkError::Closed)?;
        writer.finalize()?;
        tracing::debug!("Finished WAV sink {:?}: {}", self.path, self.written_end());
        Ok(())
    }

    fn cancel(&mut self) {
        if self.writer.take().is_none() {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!("Failed to delete canceled WAV {:?}: {}", self.path, e);
        }
    }
}
