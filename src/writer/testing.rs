//! Test sink backend
//!
//! Video tracks are written as one line per frame so tests can read back
//! what was appended; audio tracks are real WAV files. Muxing writes a
//! manifest of part names. Switches simulate a busy encoder and finish
//! failures.

use super::sink::{EncodedSample, SampleData, SinkError, SinkFactory, TrackFormat, TrackSink};
use super::wav::WavAudioSink;
use crate::capture::frame::{AudioBuffer, AudioFormat, AudioSamples, Frame, SampleFormat, TrackKind, VideoBuffer};
use crate::utils::time::MediaTime;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct TestSinkFactory {
    not_ready: Arc<AtomicBool>,
    fail_finish: Arc<AtomicBool>,
}

impl TestSinkFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(&self) -> Arc<dyn SinkFactory> {
        Arc::new(self.clone())
    }

    pub fn set_ready(&self, ready: bool) {
        self.not_ready.store(!ready, Ordering::SeqCst);
    }

    pub fn set_fail_finish(&self, fail: bool) {
        self.fail_finish.store(fail, Ordering::SeqCst);
    }
}

impl SinkFactory for TestSinkFactory {
    fn part_extension(&self, format: &TrackFormat) -> &'static str {
        match format {
            TrackFormat::Video(_) => "frames",
            TrackFormat::Audio(_) => "wav",
        }
    }

    fn create_sink(&self, path: &Path, format: &TrackFormat) -> Result<Box<dyn TrackSink>, SinkError> {
        let inner: Box<dyn TrackSink> = match format {
            TrackFormat::Video(_) => Box::new(LineVideoSink {
                path: path.to_path_buf(),
                file: Some(BufWriter::new(File::create(path)?)),
            }),
            TrackFormat::Audio(audio) => Box::new(WavAudioSink::create(path, *audio)?),
        };
        Ok(Box::new(GatedSink {
            inner,
            not_ready: self.not_ready.clone(),
            fail_finish: self.fail_finish.clone(),
        }))
    }

    fn mux(&self, parts: &[PathBuf], output: &Path) -> Result<(), SinkError> {
        let mut file = BufWriter::new(File::create(output)?);
        for part in parts {
            let name = part.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
            writeln!(file, "{}", name)?;
        }
        file.flush()?;
        Ok(())
    }
}

struct LineVideoSink {
    path: PathBuf,
    file: Option<BufWriter<File>>,
}

impl TrackSink for LineVideoSink {
    fn is_ready_for_more_data(&mut self) -> bool {
        self.file.is_some()
    }

    fn append(&mut self, sample: EncodedSample<'_>) -> Result<(), SinkError> {
        let SampleData::Video(buffer) = sample.data else {
            return Err(SinkError::FormatMismatch("audio sample on video sink".to_string()));
        };
        let file = self.file.as_mut().ok_or(SinkError::Closed)?;
        writeln!(
            file,
            "{} {} {}x{}",
            sample.pts.as_nanos(),
            sample.duration.as_nanos(),
            buffer.width,
            buffer.height
        )?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        let mut file = self.file.take().ok_or(SinkError::Closed)?;
        file.flush()?;
        Ok(())
    }

    fn cancel(&mut self) {
        if self.file.take().is_some() {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

struct GatedSink {
    inner: Box<dyn TrackSink>,
    not_ready: Arc<AtomicBool>,
    fail_finish: Arc<AtomicBool>,
}

impl TrackSink for GatedSink {
    fn is_ready_for_more_data(&mut self) -> bool {
        !self.not_ready.load(Ordering::SeqCst) && self.inner.is_ready_for_more_data()
    }

    fn append(&mut self, sample: EncodedSample<'_>) -> Result<(), SinkError> {
        self.inner.append(sample)
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        if self.fail_finish.load(Ordering::SeqCst) {
            self.inner.cancel();
            return Err(SinkError::Ffmpeg("simulated encoder failure".to_string()));
        }
        self.inner.finish()
    }

    fn cancel(&mut self) {
        self.inner.cancel();
    }
}

/// 2x2 video frame at `pts` seconds with no reported duration
pub fn video_frame(pts: f64) -> Frame {
    Frame::video(MediaTime::from_secs_f64(pts), None, VideoBuffer::solid(2, 2, [0, 0, 255, 255]))
}

/// 48kHz mono 16-bit mic frame of `frames` samples at `pts` seconds
pub fn mic_frame(pts: f64, frames: usize) -> Frame {
    audio_frame_with_format(pts, AudioFormat::default_pcm(48_000), frames)
}

pub fn app_frame(pts: f64, frames: usize) -> Frame {
    let mut frame = mic_frame(pts, frames);
    frame.kind = TrackKind::AppAudio;
    frame
}

pub fn audio_frame_with_format(pts: f64, format: AudioFormat, frames: usize) -> Frame {
    let len = frames * format.channels as usize;
    let samples = match format.sample_format {
        SampleFormat::I16 => AudioSamples::I16(vec![1_000; len]),
        SampleFormat::F32 => AudioSamples::F32(vec![0.25; len]),
    };
    Frame::audio(
        TrackKind::MicAudio,
        MediaTime::from_secs_f64(pts),
        AudioBuffer { format, samples },
    )
}

/// `(pts, duration)` of every frame in a line-per-frame video file
pub fn read_video_frames(path: &Path) -> Vec<(MediaTime, MediaTime)> {
    let contents = std::fs::read_to_string(path).unwrap();
    contents
        .lines()
        .map(|line| {
            let mut fields = line.split_whitespace();
            let pts = fields.next().unwrap().parse().unwrap();
            let duration = fields.next().unwrap().parse().unwrap();
            (MediaTime::from_nanos(pts), MediaTime::from_nanos(duration))
        })
        .collect()
}

/// Duration of a WAV file in seconds
pub fn wav_duration(path: &Path) -> f64 {
    let reader = hound::WavReader::open(path).unwrap();
    reader.duration() as f64 / reader.spec().sample_rate as f64
}
