//! FFmpeg-backed encoder sinks
//!
//! Video is piped as raw frames into an FFmpeg process at a constant frame
//! rate. Audio parts are written as WAV and combined with the video part
//! by a final stream-copy mux.

use super::sink::{EncodedSample, SampleData, SinkError, SinkFactory, TrackFormat, TrackSink};
use super::wav::WavAudioSink;
use crate::capture::frame::VideoFormat;
use crate::config::VideoEncodingConfig;
use crate::utils::time::MediaTime;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;

/// Frames queued for the encoder before the sink reports busy
const MAX_PENDING_FRAMES: usize = 8;

/// Check that an ffmpeg binary is on PATH
pub fn check_ffmpeg() -> Result<(), SinkError> {
    let status = Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|e| SinkError::Ffmpeg(format!("FFmpeg not found: {}", e)))?;
    if !status.success() {
        return Err(SinkError::Ffmpeg(format!("ffmpeg -version exited with {}", status)));
    }
    Ok(())
}

fn available_encoders() -> &'static str {
    static ENCODERS: OnceLock<String> = OnceLock::new();
    ENCODERS.get_or_init(|| {
        match Command::new("ffmpeg")
            .args(["-hide_banner", "-encoders"])
            .stderr(Stdio::null())
            .output()
        {
            Ok(output) if output.status.success() => {
                String::from_utf8_lossy(&output.stdout).to_string()
            }
            Ok(output) => {
                tracing::warn!("ffmpeg -encoders exited with {}", output.status);
                String::new()
            }
            Err(e) => {
                tracing::warn!("Failed to probe FFmpeg encoders: {}", e);
                String::new()
            }
        }
    })
}

/// Pick the first preferred codec the encoder list contains
///
/// Falls back to the last preference when none is listed.
pub fn select_codec(preferences: &[String], encoders: &str) -> Option<String> {
    preferences
        .iter()
        .find(|codec| {
            encoders
                .lines()
                .any(|line| line.split_whitespace().nth(1) == Some(codec.as_str()))
        })
        .or_else(|| preferences.last())
        .cloned()
}

/// Index of the constant-rate output frame a timestamp falls on
pub fn frame_slot(pts: MediaTime, fps: u32) -> u64 {
    if !pts.is_positive() {
        return 0;
    }
    (pts.as_secs_f64() * fps as f64).round() as u64
}

/// FFmpeg arguments for encoding raw frames from stdin
pub fn build_encode_args(
    format: &VideoFormat,
    fps: u32,
    codec: &str,
    crf: u8,
    output: &Path,
) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-y".into(),
        "-f".into(),
        "rawvideo".into(),
        "-pix_fmt".into(),
        format.pixel_format.ffmpeg_name().into(),
        "-s".into(),
        format!("{}x{}", format.width, format.height),
        "-framerate".into(),
        fps.to_string(),
        "-i".into(),
        "pipe:0".into(),
        "-c:v".into(),
        codec.to_string(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-crf".into(),
        crf.to_string(),
    ];

    // QuickTime only plays HEVC tagged as hvc1
    if codec.contains("265") || codec.contains("hevc") {
        args.extend(["-tag:v".into(), "hvc1".into()]);
    }

    args.extend([
        "-movflags".into(),
        "+faststart".into(),
        output.to_string_lossy().to_string(),
    ]);
    args
}

/// FFmpeg arguments muxing a video part with one or more audio parts
///
/// `parts[0]` must be the video part.
pub fn build_mux_args(parts: &[PathBuf], output: &Path) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-y".into(),
    ];
    for part in parts {
        args.extend(["-i".into(), part.to_string_lossy().to_string()]);
    }
    args.extend(["-map".into(), "0:v".into()]);
    for index in 1..parts.len() {
        args.extend(["-map".into(), format!("{}:a", index)]);
    }
    args.extend([
        "-c:v".into(),
        "copy".into(),
        "-c:a".into(),
        "aac".into(),
        "-b:a".into(),
        "128k".into(),
        "-movflags".into(),
        "+faststart".into(),
        output.to_string_lossy().to_string(),
    ]);
    args
}

/// Writes raw frames into the encoder pipe on its own thread
///
/// `pending` counts frames handed over but not yet written, so a full pipe
/// shows up as a busy sink instead of blocking the caller.
struct FrameWriter {
    tx: Option<mpsc::Sender<Arc<Vec<u8>>>>,
    pending: Arc<AtomicUsize>,
    failed: Arc<AtomicBool>,
    handle: Option<JoinHandle<Result<u64, String>>>,
}

impl FrameWriter {
    fn spawn<W: Write + Send + 'static>(mut pipe: W) -> Self {
        let (tx, rx) = mpsc::channel::<Arc<Vec<u8>>>();
        let pending = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicBool::new(false));

        let handle = {
            let pending = pending.clone();
            let failed = failed.clone();
            std::thread::spawn(move || {
                let mut written: u64 = 0;
                for frame in rx {
                    let result = pipe.write_all(&frame);
                    pending.fetch_sub(1, Ordering::SeqCst);
                    if let Err(e) = result {
                        failed.store(true, Ordering::SeqCst);
                        return Err(format!("Failed to write frame {}: {}", written, e));
                    }
                    written += 1;
                }
                // Dropping the pipe here closes FFmpeg's stdin
                pipe.flush().map_err(|e| format!("Failed to flush frames: {}", e))?;
                Ok(written)
            })
        };

        Self {
            tx: Some(tx),
            pending,
            failed,
            handle: Some(handle),
        }
    }

    fn has_capacity(&self) -> bool {
        self.tx.is_some()
            && !self.failed.load(Ordering::SeqCst)
            && self.pending.load(Ordering::SeqCst) < MAX_PENDING_FRAMES
    }

    fn send(&self, frame: Arc<Vec<u8>>) -> Result<(), SinkError> {
        let tx = self.tx.as_ref().ok_or(SinkError::Closed)?;
        self.pending.fetch_add(1, Ordering::SeqCst);
        tx.send(frame).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            SinkError::Ffmpeg("FFmpeg frame writer stopped".to_string())
        })
    }

    /// Close the pipe once every queued frame is written
    fn close(&mut self) -> Result<u64, SinkError> {
        drop(self.tx.take());
        let handle = self.handle.take().ok_or(SinkError::Closed)?;
        match handle.join() {
            Ok(Ok(written)) => Ok(written),
            Ok(Err(e)) => Err(SinkError::Ffmpeg(e)),
            Err(_) => Err(SinkError::Ffmpeg("FFmpeg frame writer panicked".to_string())),
        }
    }
}

/// Video sink feeding an FFmpeg process
pub struct FfmpegVideoSink {
    process: Option<Child>,
    writer: FrameWriter,
    path: PathBuf,
    format: VideoFormat,
    fps: u32,

    /// Output slots queued so far
    frames_written: u64,
    last_frame: Option<Arc<Vec<u8>>>,
    end: MediaTime,
}

impl FfmpegVideoSink {
    pub fn spawn(path: &Path, format: VideoFormat, config: &VideoEncodingConfig, codec: &str) -> Result<Self, SinkError> {
        let args = build_encode_args(&format, config.frame_rate, codec, config.crf, path);

        tracing::info!(
            "Starting FFmpeg video sink {:?}: {}x{} @ {}fps, codec={}",
            path,
            format.width,
            format.height,
            config.frame_rate,
            codec
        );
        tracing::debug!("FFmpeg args: {:?}", args);

        let mut process = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SinkError::Ffmpeg(format!("Failed to start FFmpeg encoder: {}", e)))?;

        let stdin = match process.stdin.take() {
            Some(stdin) => stdin,
            None => {
                let _ = process.kill();
                let _ = process.wait();
                return Err(SinkError::Ffmpeg("Failed to capture FFmpeg stdin".to_string()));
            }
        };

        Ok(Self {
            process: Some(process),
            writer: FrameWriter::spawn(stdin),
            path: path.to_path_buf(),
            format,
            fps: config.frame_rate,
            frames_written: 0,
            last_frame: None,
            end: MediaTime::ZERO,
        })
    }

    fn queue(&mut self, frame: Arc<Vec<u8>>) -> Result<(), SinkError> {
        self.writer.send(frame)?;
        self.frames_written += 1;
        Ok(())
    }

    /// Repeat the previous frame until `slot` frames have been queued
    fn fill_to(&mut self, slot: u64) -> Result<(), SinkError> {
        let Some(last) = self.last_frame.clone() else {
            return Ok(());
        };
        while self.frames_written < slot {
            self.queue(last.clone())?;
        }
        Ok(())
    }

    /// Kill the encoder and stop the writer thread
    fn abort(&mut self) {
        // Killing first unblocks a writer stuck on a full pipe
        if let Some(mut process) = self.process.take() {
            let _ = process.kill();
            let _ = process.wait();
        }
        if self.writer.handle.is_some() {
            let _ = self.writer.close();
        }
    }
}

impl TrackSink for FfmpegVideoSink {
    fn is_ready_for_more_data(&mut self) -> bool {
        match self.process.as_mut().map(|p| p.try_wait()) {
            Some(Ok(None)) => self.writer.has_capacity(),
            _ => false,
        }
    }

    fn append(&mut self, sample: EncodedSample<'_>) -> Result<(), SinkError> {
        let SampleData::Video(buffer) = sample.data else {
            return Err(SinkError::FormatMismatch("audio sample on video sink".to_string()));
        };
        if buffer.format() != self.format {
            return Err(SinkError::FormatMismatch(format!(
                "expected {}x{}, got {}x{}",
                self.format.width, self.format.height, buffer.width, buffer.height
            )));
        }

        let packed: Arc<Vec<u8>> = Arc::new(buffer.packed_rows().flatten().copied().collect());
        let slot = frame_slot(sample.pts, self.fps);
        self.end = self.end.max(sample.pts + sample.duration);

        if slot < self.frames_written {
            // Faster than the output rate: keep only the newest frame for the slot
            self.last_frame = Some(packed);
            return Ok(());
        }

        self.fill_to(slot)?;
        self.queue(packed.clone())?;
        self.last_frame = Some(packed);
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        let end_slot = frame_slot(self.end, self.fps);
        if let Err(e) = self.fill_to(end_slot) {
            self.abort();
            return Err(e);
        }

        // Closing stdin lets FFmpeg flush and exit
        let written = match self.writer.close() {
            Ok(written) => written,
            Err(e) => {
                self.abort();
                return Err(e);
            }
        };

        let process = self.process.take().ok_or(SinkError::Closed)?;
        let output = process
            .wait_with_output()
            .map_err(|e| SinkError::Ffmpeg(format!("FFmpeg wait failed: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::error!("FFmpeg encoder failed: {}", stderr);
            return Err(SinkError::Ffmpeg(format!(
                "FFmpeg exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        tracing::info!(
            "FFmpeg video sink finished {:?}: {} frames, {}",
            self.path,
            written,
            self.end
        );
        Ok(())
    }

    fn cancel(&mut self) {
        self.abort();
        if self.path.exists() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                tracing::warn!("Failed to delete partial video {:?}: {}", self.path, e);
            }
        }
    }
}

impl Drop for FfmpegVideoSink {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Default sink factory: FFmpeg video, WAV audio, FFmpeg mux
pub struct FfmpegSinkFactory {
    config: VideoEncodingConfig,
    codec: String,
}

impl FfmpegSinkFactory {
    /// Create a factory, probing FFmpeg for the preferred codec
    pub fn new(config: VideoEncodingConfig) -> Self {
        let codec = select_codec(&config.codecs, available_encoders())
            .unwrap_or_else(|| "libx264".to_string());
        tracing::info!("Using video codec {}", codec);
        Self { config, codec }
    }

    pub fn codec(&self) -> &str {
        &self.codec
    }
}

impl SinkFactory for FfmpegSinkFactory {
    fn part_extension(&self, format: &TrackFormat) -> &'static str {
        match format {
            TrackFormat::Video(_) => "mp4",
            TrackFormat::Audio(_) => "wav",
        }
    }

    fn create_sink(&self, path: &Path, format: &TrackFormat) -> Result<Box<dyn TrackSink>, SinkError> {
        match format {
            TrackFormat::Video(video) => Ok(Box::new(FfmpegVideoSink::spawn(
                path,
                *video,
                &self.config,
                &self.codec,
            )?)),
            TrackFormat::Audio(audio) => Ok(Box::new(WavAudioSink::create(path, *audio)?)),
        }
    }

    fn mux(&self, parts: &[PathBuf], output: &Path) -> Result<(), SinkError> {
        let args = build_mux_args(parts, output);
        tracing::debug!("FFmpeg mux args: {:?}", args);

        let output_result = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| SinkError::Ffmpeg(format!("Failed to start FFmpeg mux: {}", e)))?;

        if !output_result.status.success() {
            let stderr = String::from_utf8_lossy(&output_result.stderr);
            return Err(SinkError::Ffmpeg(format!("FFmpeg mux failed: {}", stderr.trim())));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::PixelFormat;
    use parking_lot::Mutex;
    use std::time::{Duration, Instant};

    /// Pipe that holds every write until the gate sender is dropped
    struct GatedPipe {
        gate: mpsc::Receiver<()>,
        bytes: Arc<Mutex<Vec<u8>>>,
    }

    impl Write for GatedPipe {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let _ = self.gate.recv();
            self.bytes.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "encoder exited"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_full_pipe_reports_busy_without_blocking() {
        let (gate, rx) = mpsc::channel();
        let bytes = Arc::new(Mutex::new(Vec::new()));
        let mut writer = FrameWriter::spawn(GatedPipe {
            gate: rx,
            bytes: bytes.clone(),
        });

        for _ in 0..MAX_PENDING_FRAMES {
            assert!(writer.has_capacity());
            writer.send(Arc::new(vec![1, 2, 3])).unwrap();
        }
        assert!(!writer.has_capacity());

        drop(gate);
        assert_eq!(writer.close().unwrap(), MAX_PENDING_FRAMES as u64);
        assert_eq!(bytes.lock().len(), MAX_PENDING_FRAMES * 3);
        assert!(!writer.has_capacity());
    }

    #[test]
    fn test_write_failure_stops_accepting_frames() {
        let mut writer = FrameWriter::spawn(BrokenPipe);
        writer.send(Arc::new(vec![0; 16])).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while writer.has_capacity() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(!writer.has_capacity());
        assert!(matches!(writer.close(), Err(SinkError::Ffmpeg(_))));
    }

    #[test]
    fn test_select_codec_prefers_listed_encoder() {
        let encoders = " V....D libx264   H.264 / AVC\n V....D libx265   H.265 / HEVC\n";
        let prefs = vec!["hevc_videotoolbox".to_string(), "libx265".to_string(), "libx264".to_string()];
        assert_eq!(select_codec(&prefs, encoders).as_deref(), Some("libx265"));
    }

    #[test]
    fn test_select_codec_falls_back_to_last() {
        let prefs = vec!["libx265".to_string(), "libx264".to_string()];
        assert_eq!(select_codec(&prefs, "").as_deref(), Some("libx264"));
        assert_eq!(select_codec(&[], ""), None);
    }

    #[test]
    fn test_frame_slot_rounds_to_nearest() {
        assert_eq!(frame_slot(MediaTime::ZERO, 30), 0);
        assert_eq!(frame_slot(MediaTime::from_secs_f64(1.0 / 30.0), 30), 1);
        assert_eq!(frame_slot(MediaTime::from_secs_f64(2.0), 30), 60);
        assert_eq!(frame_slot(MediaTime::from_millis(-5), 30), 0);
    }

    #[test]
    fn test_encode_args_tag_hevc() {
        let format = VideoFormat {
            width: 1280,
            height: 720,
            pixel_format: PixelFormat::Bgra,
        };
        let args = build_encode_args(&format, 30, "libx265", 23, Path::new("/tmp/out.mp4"));
        assert!(args.windows(2).any(|w| w[0] == "-s" && w[1] == "1280x720"));
        assert!(args.windows(2).any(|w| w[0] == "-tag:v" && w[1] == "hvc1"));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/out.mp4"));

        let h264 = build_encode_args(&format, 30, "libx264", 23, Path::new("/tmp/out.mp4"));
        assert!(!h264.iter().any(|a| a == "-tag:v"));
    }

    #[test]
    fn test_mux_args_map_every_audio_part() {
        let parts = vec![
            PathBuf::from("main.video.mp4"),
            PathBuf::from("main.mic.wav"),
            PathBuf::from("main.app.wav"),
        ];
        let args = build_mux_args(&parts, Path::new("main.mp4"));
        let maps: Vec<&str> = args
            .windows(2)
            .filter(|w| w[0] == "-map")
            .map(|w| w[1].as_str())
            .collect();
        assert_eq!(maps, vec!["0:v", "1:a", "2:a"]);
    }
}
