//! Frame types delivered by the capture source
//!
//! A frame is a timestamped buffer of one media kind. The controller
//! either hands it to a track encoder or drops it.

use crate::utils::time::MediaTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of media a capture source produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackKind {
    /// Screen video
    Video,
    /// Microphone audio
    MicAudio,
    /// System / application audio
    AppAudio,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Video => write!(f, "video"),
            TrackKind::MicAudio => write!(f, "mic-audio"),
            TrackKind::AppAudio => write!(f, "app-audio"),
        }
    }
}

/// Validity flags reported by the capture source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFlags {
    /// The buffer passed the source's own validity check
    pub valid: bool,
    /// The buffer's data is ready to be read
    pub data_ready: bool,
}

impl Default for FrameFlags {
    fn default() -> Self {
        Self {
            valid: true,
            data_ready: true,
        }
    }
}

/// Pixel layout of a video buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Bgra,
    Rgba,
}

impl PixelFormat {
    /// Name understood by ffmpeg's `-pix_fmt`
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            PixelFormat::Bgra => "bgra",
            PixelFormat::Rgba => "rgba",
        }
    }
}

/// Format of a video track, learned from its first frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
}

/// Raw video frame data
#[derive(Debug, Clone)]
pub struct VideoBuffer {
    /// Frame width in pixels
    pub width: u32,

    /// Frame height in pixels
    pub height: u32,

    pub pixel_format: PixelFormat,

    /// Bytes per row (may include padding)
    pub bytes_per_row: u32,

    /// Pixel data, `bytes_per_row * height` bytes
    pub data: Vec<u8>,
}

impl VideoBuffer {
    /// A tightly packed frame filled with a single BGRA colour
    pub fn solid(width: u32, height: u32, bgra: [u8; 4]) -> Self {
        let data = bgra
            .iter()
            .copied()
            .cycle()
            .take((width * height * 4) as usize)
            .collect();
        Self {
            width,
            height,
            pixel_format: PixelFormat::Bgra,
            bytes_per_row: width * 4,
            data,
        }
    }

    pub fn format(&self) -> VideoFormat {
        VideoFormat {
            width: self.width,
            height: self.height,
            pixel_format: self.pixel_format,
        }
    }

    /// Pixel rows without per-row padding
    pub fn packed_rows(&self) -> impl Iterator<Item = &[u8]> {
        let row_len = (self.width * 4) as usize;
        let stride = (self.bytes_per_row as usize).max(row_len);
        self.data
            .chunks(stride)
            .take(self.height as usize)
            .map(move |row| &row[..row_len.min(row.len())])
    }
}

/// Sample encoding of an audio buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    /// Signed 16-bit integer PCM
    I16,
    /// 32-bit float PCM
    F32,
}

/// Audio format descriptor, learned from a track's first accepted frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: SampleFormat,
}

impl AudioFormat {
    /// 16-bit mono PCM, used for silence when no real audio was observed
    pub fn default_pcm(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
            sample_format: SampleFormat::I16,
        }
    }

    pub fn bits_per_sample(&self) -> u16 {
        match self.sample_format {
            SampleFormat::I16 => 16,
            SampleFormat::F32 => 32,
        }
    }
}

/// Interleaved PCM samples
#[derive(Debug, Clone, PartialEq)]
pub enum AudioSamples {
    I16(Vec<i16>),
    F32(Vec<f32>),
}

impl AudioSamples {
    /// `frames` frames of silence in the given format
    pub fn silence(format: &AudioFormat, frames: usize) -> Self {
        let len = frames * format.channels.max(1) as usize;
        match format.sample_format {
            SampleFormat::I16 => AudioSamples::I16(vec![0; len]),
            SampleFormat::F32 => AudioSamples::F32(vec![0.0; len]),
        }
    }

    /// Number of individual samples (all channels)
    pub fn len(&self) -> usize {
        match self {
            AudioSamples::I16(samples) => samples.len(),
            AudioSamples::F32(samples) => samples.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn sample_format(&self) -> SampleFormat {
        match self {
            AudioSamples::I16(_) => SampleFormat::I16,
            AudioSamples::F32(_) => SampleFormat::F32,
        }
    }
}

/// Audio frame data
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    pub format: AudioFormat,
    pub samples: AudioSamples,
}

impl AudioBuffer {
    /// Number of audio frames (samples per channel)
    pub fn frame_count(&self) -> u64 {
        (self.samples.len() / self.format.channels.max(1) as usize) as u64
    }

    pub fn duration(&self) -> MediaTime {
        MediaTime::from_samples(self.frame_count(), self.format.sample_rate)
    }
}

/// Payload of a frame
#[derive(Debug, Clone)]
pub enum MediaPayload {
    Video(VideoBuffer),
    Audio(AudioBuffer),
}

/// A timestamped buffer of one media kind
#[derive(Debug, Clone)]
pub struct Frame {
    pub kind: TrackKind,

    /// Presentation time in the capture source's clock
    pub pts: MediaTime,

    /// Duration, when the source reports one
    pub duration: Option<MediaTime>,

    pub flags: FrameFlags,

    pub payload: MediaPayload,
}

impl Frame {
    pub fn video(pts: MediaTime, duration: Option<MediaTime>, buffer: VideoBuffer) -> Self {
        Self {
            kind: TrackKind::Video,
            pts,
            duration,
            flags: FrameFlags::default(),
            payload: MediaPayload::Video(buffer),
        }
    }

    pub fn audio(kind: TrackKind, pts: MediaTime, buffer: AudioBuffer) -> Self {
        Self {
            kind,
            pts,
            duration: None,
            flags: FrameFlags::default(),
            payload: MediaPayload::Audio(buffer),
        }
    }

    pub fn with_flags(mut self, flags: FrameFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Whether the frame can be handed to an encoder at all
    pub fn is_valid(&self) -> bool {
        if !self.flags.valid || !self.flags.data_ready {
            return false;
        }
        match (&self.kind, &self.payload) {
            (TrackKind::Video, MediaPayload::Video(buffer)) => {
                buffer.width > 0 && buffer.height > 0 && !buffer.data.is_empty()
            }
            (TrackKind::MicAudio | TrackKind::AppAudio, MediaPayload::Audio(buffer)) => {
                buffer.format.sample_rate > 0
                    && buffer.format.channels > 0
                    && buffer.samples.sample_format() == buffer.format.sample_format
            }
            _ => false,
        }
    }

    pub fn is_audio(&self) -> bool {
        matches!(self.kind, TrackKind::MicAudio | TrackKind::AppAudio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mic_buffer(frames: usize) -> AudioBuffer {
        AudioBuffer {
            format: AudioFormat::default_pcm(48_000),
            samples: AudioSamples::I16(vec![100; frames]),
        }
    }

    #[test]
    fn test_audio_duration_from_sample_count() {
        let buffer = mic_buffer(4_800);
        assert_eq!(buffer.frame_count(), 4_800);
        assert!((buffer.duration().as_secs_f64() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_mismatched_payload_is_invalid() {
        let frame = Frame {
            kind: TrackKind::Video,
            pts: MediaTime::ZERO,
            duration: None,
            flags: FrameFlags::default(),
            payload: MediaPayload::Audio(mic_buffer(10)),
        };
        assert!(!frame.is_valid());
    }

    #[test]
    fn test_flags_gate_validity() {
        let frame = Frame::video(MediaTime::ZERO, None, VideoBuffer::solid(2, 2, [0, 0, 0, 255]))
            .with_flags(FrameFlags {
                valid: true,
                data_ready: false,
            });
        assert!(!frame.is_valid());
    }

    #[test]
    fn test_packed_rows_strip_padding() {
        let buffer = VideoBuffer {
            width: 1,
            height: 2,
            pixel_format: PixelFormat::Bgra,
            bytes_per_row: 8,
            data: vec![1, 2, 3, 4, 0, 0, 0, 0, 5, 6, 7, 8, 0, 0, 0, 0],
        };
        let rows: Vec<&[u8]> = buffer.packed_rows().collect();
        assert_eq!(rows, vec![&[1u8, 2, 3, 4][..], &[5u8, 6, 7, 8][..]]);
    }
}
