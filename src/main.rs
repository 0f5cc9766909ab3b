//! Demo driver
//!
//! `screenchunk [config.json] [seconds]`
//!
//! Feeds a synthetic capture (solid colour video, sine mic tone) through
//! the FFmpeg backend and acts as its own consumer: each second it marks a
//! chunk start, finalizes the chunk and reads the record back.

use anyhow::Context;
use screenchunk_lib::capture::{AudioBuffer, AudioFormat, AudioSamples, CaptureSource, Frame, TrackKind, VideoBuffer};
use screenchunk_lib::config::RecorderConfig;
use screenchunk_lib::handoff::{keys, BroadcastNotifier, FileStore, SharedStore};
use screenchunk_lib::recorder::signals::{FINALIZE_CHUNK_TOPIC, MARK_CHUNK_START_TOPIC, STOP_TOPIC};
use screenchunk_lib::recorder::{run_control_loop, BroadcastTransport, CaptureController};
use screenchunk_lib::utils::MediaTime;
use screenchunk_lib::writer::ffmpeg::check_ffmpeg;
use screenchunk_lib::writer::FfmpegSinkFactory;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

const FPS: u32 = 30;
const SAMPLE_RATE: u32 = 48_000;

#[derive(Default)]
struct SyntheticSource {
    paused: AtomicBool,
    stopped: AtomicBool,
}

impl CaptureSource for SyntheticSource {
    fn id(&self) -> &str {
        "synthetic"
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    fn request_stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// Deliver frames in real time until the source is asked to stop
fn produce_frames(controller: &CaptureController, source: &SyntheticSource) {
    // Source clock does not start at zero
    let clock_base = MediaTime::from_secs_f64(100.0);
    let samples_per_frame = (SAMPLE_RATE / FPS) as usize;
    let started = Instant::now();
    let mut index: u64 = 0;

    while !source.stopped.load(Ordering::SeqCst) {
        let pts = clock_base + MediaTime::from_samples(index, FPS);
        if !source.paused.load(Ordering::SeqCst) {
            let shade = (index % 255) as u8;
            let video = Frame::video(
                pts,
                Some(MediaTime::frame_duration(FPS)),
                VideoBuffer::solid(320, 240, [shade, 64, 255 - shade, 255]),
            );
            controller.handle_frame(&video);

            let first_sample = index as usize * samples_per_frame;
            let tone: Vec<i16> = (first_sample..first_sample + samples_per_frame)
                .map(|n| {
                    let t = n as f64 / SAMPLE_RATE as f64;
                    ((t * 440.0 * std::f64::consts::TAU).sin() * 0.2 * i16::MAX as f64) as i16
                })
                .collect();
            let audio = Frame::audio(
                TrackKind::MicAudio,
                pts,
                AudioBuffer {
                    format: AudioFormat::default_pcm(SAMPLE_RATE),
                    samples: AudioSamples::I16(tone),
                },
            );
            controller.handle_frame(&audio);
        }

        index += 1;
        let next = Duration::from_secs_f64(index as f64 / FPS as f64);
        if let Some(wait) = next.checked_sub(started.elapsed()) {
            std::thread::sleep(wait);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    screenchunk_lib::init_tracing();

    let mut args = std::env::args().skip(1);
    let config_path = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("screenchunk.json"));
    let seconds: u64 = args
        .next()
        .map(|s| s.parse())
        .transpose()
        .context("seconds must be a whole number")?
        .unwrap_or(3);

    let config = RecorderConfig::load(&config_path).context("failed to load config")?;
    check_ffmpeg()?;

    let store: Arc<dyn SharedStore> = Arc::new(FileStore::open(&config.store_path())?);
    store.put(keys::MIC_ENABLED, serde_json::json!(true))?;
    store.put(keys::SEPARATE_AUDIO, serde_json::json!(true))?;

    let notifier = Arc::new(BroadcastNotifier::default());
    let mut saved = notifier.subscribe();
    let source = Arc::new(SyntheticSource::default());
    let controller = Arc::new(CaptureController::new(
        config.clone(),
        Arc::new(FfmpegSinkFactory::new(config.video.clone())),
        store.clone(),
        notifier.clone(),
        source.clone(),
    ));
    controller.on_session_started()?;

    let (tx, rx) = broadcast::channel(16);
    let control = tokio::spawn(run_control_loop(controller.clone(), BroadcastTransport::new(rx)));
    let producer = {
        let controller = controller.clone();
        let source = source.clone();
        tokio::task::spawn_blocking(move || produce_frames(&controller, &source))
    };

    for n in 0..seconds {
        let chunk_id = format!("demo-{}", n);
        store.put(keys::PENDING_CHUNK_ID, serde_json::json!(chunk_id))?;
        tx.send(MARK_CHUNK_START_TOPIC.to_string())?;

        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(FINALIZE_CHUNK_TOPIC.to_string())?;
        saved.recv().await?;

        match controller.queue().retrieve(&chunk_id) {
            Ok(record) => tracing::info!(
                "Chunk {} ready: {:?} ({:.2}s)",
                chunk_id,
                record.video_file_ref,
                record.duration_secs
            ),
            Err(e) => tracing::warn!("Chunk {} lost: {}", chunk_id, e),
        }
    }

    tx.send(STOP_TOPIC.to_string())?;
    control.await?;
    producer.await?;

    let chunks_dir = config.chunks_dir();
    for record in controller.queue().list()? {
        println!(
            "{:<10} {:?} video={:?} mic={:?}",
            record.chunk_id.as_deref().unwrap_or("-"),
            record.status,
            record.video_path(&chunks_dir),
            record.mic_audio_path(&chunks_dir)
        );
    }
    Ok(())
}
