//! Capture session controller
//!
//! Routes frames to the active writer set and runs chunk boundaries. All
//! of it happens under one mutex, so a writer set swap never interleaves
//! with an append: each frame lands entirely in one writer set.

use super::chunk::{ChunkLifecycle, Debounce, SaveOutcome};
use super::signals::ControlSignal;
use super::state::CaptureState;
use super::status::{ExtensionStatus, StatusReporter};
use crate::capture::frame::{Frame, TrackKind};
use crate::capture::source::CaptureSource;
use crate::config::RecorderConfig;
use crate::handoff::keys;
use crate::handoff::notify::Notifier;
use crate::handoff::queue::ChunkHandoffQueue;
use crate::handoff::store::{get_bool, get_string, SharedStore};
use crate::utils::error::{CaptureError, CaptureResult};
use crate::writer::{DropReason, SinkFactory, TrackRole, WriterSet, WriterSetOptions};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// What happened to a delivered frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Appended(TrackRole),
    Dropped(DropReason),
}

/// Result of a mark-chunk-start request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkBoundary {
    /// Repeat inside the debounce window, ignored
    Debounced,
    /// Old writer set discarded; `writer_set` is the fresh one, if created
    Discarded { writer_set: Option<Uuid> },
}

/// Result of a finalize request
#[derive(Debug, Clone)]
pub enum FinalizeOutcome {
    /// Repeat inside the debounce window; only the signal was re-sent
    Debounced,
    Saved(SaveOutcome),
}

/// Who asked for the capture to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOrigin {
    /// The controlling process; the capture source is asked to stop too
    Controller,
    /// The capture source ended the session itself
    Source,
}

struct ControllerInner {
    state: CaptureState,
    options: WriterSetOptions,
    writer_set: Option<WriterSet>,

    /// Chunk id captured at the last mark-chunk-start, used by the next save
    pending_chunk_id: Option<String>,
    chunk_started_at: Option<DateTime<Utc>>,

    mark_debounce: Debounce,
    finalize_debounce: Debounce,
    status: StatusReporter,
}

impl ControllerInner {
    /// Move to `next` if the state machine allows it
    fn transition(&mut self, next: CaptureState) -> bool {
        if !self.state.can_transition_to(next) {
            tracing::debug!("Refusing capture state change {} -> {}", self.state, next);
            return false;
        }
        self.state = next;
        true
    }
}

pub struct CaptureController {
    lifecycle: ChunkLifecycle,
    source: Arc<dyn CaptureSource>,
    inner: Mutex<ControllerInner>,
}

impl CaptureController {
    pub fn new(
        config: RecorderConfig,
        factory: Arc<dyn SinkFactory>,
        store: Arc<dyn SharedStore>,
        notifier: Arc<dyn Notifier>,
        source: Arc<dyn CaptureSource>,
    ) -> Self {
        let window = config.debounce_window();
        let status = StatusReporter::new(store.clone(), config.status_frame_interval);
        let lifecycle = ChunkLifecycle::new(config, factory, store, notifier);
        Self {
            lifecycle,
            source,
            inner: Mutex::new(ControllerInner {
                state: CaptureState::Idle,
                options: WriterSetOptions::default(),
                writer_set: None,
                pending_chunk_id: None,
                chunk_started_at: None,
                mark_debounce: Debounce::new(window),
                finalize_debounce: Debounce::new(window),
                status,
            }),
        }
    }

    pub fn config(&self) -> &RecorderConfig {
        self.lifecycle.config()
    }

    pub fn queue(&self) -> &ChunkHandoffQueue {
        self.lifecycle.queue()
    }

    pub fn state(&self) -> CaptureState {
        self.inner.lock().state
    }

    /// Id of the active writer set
    pub fn writer_set_id(&self) -> Option<Uuid> {
        self.inner.lock().writer_set.as_ref().map(|set| set.id())
    }

    pub fn pending_chunk_id(&self) -> Option<String> {
        self.inner.lock().pending_chunk_id.clone()
    }

    pub fn chunk_started_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().chunk_started_at
    }

    pub fn status(&self) -> ExtensionStatus {
        self.inner.lock().status.status().clone()
    }

    /// Start capturing with explicit track options
    ///
    /// Fails if no writer set can be created; nothing else ends a capture.
    pub fn start(&self, options: WriterSetOptions) -> CaptureResult<Uuid> {
        let mut inner = self.inner.lock();
        if inner.state != CaptureState::Idle {
            return Err(CaptureError::AlreadyCapturing);
        }

        tracing::info!("Starting capture from source {}", self.source.id());
        let set = self.lifecycle.create_writer_set(options)?;
        let id = set.id();

        inner.writer_set = Some(set);
        inner.options = options;
        inner.pending_chunk_id = None;
        inner.chunk_started_at = None;
        inner.transition(CaptureState::Capturing);
        inner.status.capture_started();
        Ok(id)
    }

    /// Capture source callback: start with the options in shared storage
    pub fn on_session_started(&self) -> CaptureResult<Uuid> {
        let options = self.stored_options();
        self.start(options)
    }

    /// Recording-enabled flags; unreadable flags count as disabled
    fn stored_options(&self) -> WriterSetOptions {
        let store = self.lifecycle.store().as_ref();
        let flag = |key: &str| match get_bool(store, key) {
            Ok(value) => value.unwrap_or(false),
            Err(e) => {
                tracing::warn!("Failed to read {} from shared storage: {}", key, e);
                false
            }
        };
        WriterSetOptions {
            mic_enabled: flag(keys::MIC_ENABLED),
            app_audio_enabled: flag(keys::APP_AUDIO_ENABLED),
            separate_audio: flag(keys::SEPARATE_AUDIO),
        }
    }

    /// Frame delivery callback
    ///
    /// Never fails: a frame that cannot be written is dropped.
    pub fn handle_frame(&self, frame: &Frame) -> FrameOutcome {
        let mut inner = self.inner.lock();
        if !inner.state.is_active() {
            return FrameOutcome::Dropped(DropReason::NotCapturing);
        }
        let Some(set) = inner.writer_set.as_mut() else {
            return FrameOutcome::Dropped(DropReason::NoWriter);
        };

        match set.route(frame) {
            Ok(role) => {
                match role.kind() {
                    TrackKind::Video => inner.status.on_video_frame(),
                    TrackKind::MicAudio => inner.status.on_mic_audio(),
                    TrackKind::AppAudio => {}
                }
                FrameOutcome::Appended(role)
            }
            Err(reason) => {
                tracing::trace!("Dropped {} frame at {}: {}", frame.kind, frame.pts, reason);
                FrameOutcome::Dropped(reason)
            }
        }
    }

    /// Advisory pause, forwarded to the capture source
    pub fn pause(&self) -> CaptureResult<()> {
        {
            let mut inner = self.inner.lock();
            if inner.state == CaptureState::Paused {
                return Ok(());
            }
            if !inner.transition(CaptureState::Paused) {
                return Err(CaptureError::NotCapturing);
            }
        }
        tracing::info!("Capture paused");
        self.source.pause();
        Ok(())
    }

    pub fn resume(&self) -> CaptureResult<()> {
        {
            let mut inner = self.inner.lock();
            match inner.state {
                CaptureState::Capturing => return Ok(()),
                CaptureState::Paused => {
                    inner.transition(CaptureState::Capturing);
                }
                _ => return Err(CaptureError::NotCapturing),
            }
        }
        tracing::info!("Capture resumed");
        self.source.resume();
        Ok(())
    }

    /// Discard everything since the last boundary and start a new chunk
    ///
    /// `chunk_id` is the id the consumer published for the chunk now
    /// starting; the next save publishes under it.
    pub fn mark_chunk_start(&self, chunk_id: Option<String>) -> CaptureResult<ChunkBoundary> {
        let mut inner = self.inner.lock();
        if !inner.state.is_active() {
            return Err(CaptureError::NotCapturing);
        }
        if !inner.mark_debounce.try_pass(Instant::now()) {
            tracing::debug!("Ignoring repeated mark-chunk-start");
            return Ok(ChunkBoundary::Debounced);
        }

        tracing::info!("Marking chunk start (id {:?})", chunk_id);
        let old = inner.writer_set.take();
        self.lifecycle.discard(old);
        let writer_set = self.rearm(&mut inner);

        let now = Utc::now();
        inner.pending_chunk_id = chunk_id;
        inner.chunk_started_at = Some(now);
        inner.status.chunk_started(now);
        Ok(ChunkBoundary::Discarded { writer_set })
    }

    /// Save the current chunk and start the next one
    pub fn finalize_chunk(&self) -> CaptureResult<FinalizeOutcome> {
        let mut inner = self.inner.lock();
        if !inner.state.is_active() {
            // A caller may be waiting on the signal
            self.lifecycle.signal_saved();
            return Err(CaptureError::NotCapturing);
        }
        if !inner.finalize_debounce.try_pass(Instant::now()) {
            tracing::debug!("Repeated finalize, re-signaling only");
            self.lifecycle.signal_saved();
            return Ok(FinalizeOutcome::Debounced);
        }

        let chunk_id = inner.pending_chunk_id.take();
        tracing::info!("Finalizing chunk (id {:?})", chunk_id);
        let old = inner.writer_set.take();
        let outcome = self.lifecycle.save(old, chunk_id);
        self.lifecycle.signal_saved();

        self.rearm(&mut inner);
        inner.chunk_started_at = None;
        inner.status.chunk_ended();
        Ok(FinalizeOutcome::Saved(outcome))
    }

    /// Controlling process asked for a stop
    pub fn request_stop(&self) -> CaptureResult<SaveOutcome> {
        self.stop(StopOrigin::Controller)
    }

    /// Capture source callback: the session ended
    pub fn on_session_ended(&self) -> CaptureResult<SaveOutcome> {
        self.stop(StopOrigin::Source)
    }

    /// Save the final writer set like a finalize, then go idle
    pub fn stop(&self, origin: StopOrigin) -> CaptureResult<SaveOutcome> {
        let outcome = {
            let mut inner = self.inner.lock();
            if !inner.transition(CaptureState::Finishing) {
                tracing::debug!("Stop requested while {}", inner.state);
                return Ok(SaveOutcome::NothingCaptured);
            }

            tracing::info!("Stopping capture ({:?})", origin);

            let chunk_id = inner.pending_chunk_id.take();
            let set = inner.writer_set.take();
            let outcome = self.lifecycle.save(set, chunk_id);
            self.lifecycle.signal_saved();

            inner.chunk_started_at = None;
            inner.status.reset();
            inner.transition(CaptureState::Idle);
            outcome
        };

        // Outside the lock: the source may call back into on_session_ended
        if origin == StopOrigin::Controller {
            self.source.request_stop();
        }
        tracing::info!("Capture stopped");
        Ok(outcome)
    }

    /// Dispatch an inbound control signal
    pub fn handle_signal(&self, signal: ControlSignal) -> CaptureResult<()> {
        match signal {
            ControlSignal::Stop => {
                self.request_stop()?;
            }
            ControlSignal::MarkChunkStart => {
                let chunk_id = match get_string(self.lifecycle.store().as_ref(), keys::PENDING_CHUNK_ID) {
                    Ok(id) => id,
                    Err(e) => {
                        tracing::warn!("Failed to read pending chunk id: {}", e);
                        None
                    }
                };
                self.mark_chunk_start(chunk_id)?;
            }
            ControlSignal::FinalizeChunk => {
                self.finalize_chunk()?;
            }
        }
        Ok(())
    }

    /// Create a fresh writer set; on failure frames drop until the next boundary
    fn rearm(&self, inner: &mut ControllerInner) -> Option<Uuid> {
        match self.lifecycle.create_writer_set(inner.options) {
            Ok(set) => {
                let id = set.id();
                inner.writer_set = Some(set);
                Some(id)
            }
            Err(e) => {
                tracing::error!("No active writer set, dropping frames until the next boundary: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handoff::notify::BroadcastNotifier;
    use crate::handoff::queue::{ChunkRecord, ChunkStatus};
    use crate::handoff::store::MemoryStore;
    use crate::recorder::signals::CHUNK_SAVED_TOPIC;
    use crate::recorder::status::read_status;
    use crate::writer::testing::{mic_frame, read_video_frames, video_frame, wav_duration, TestSinkFactory};
    use crate::utils::time::MediaTime;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    #[derive(Default)]
    struct CountingSource {
        pauses: AtomicUsize,
        stops: AtomicUsize,
    }

    impl CaptureSource for CountingSource {
        fn id(&self) -> &str {
            "counting"
        }

        fn pause(&self) {
            self.pauses.fetch_add(1, Ordering::SeqCst);
        }

        fn resume(&self) {}

        fn request_stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Harness {
        _dir: TempDir,
        factory: TestSinkFactory,
        store: Arc<MemoryStore>,
        notifier: Arc<BroadcastNotifier>,
        source: Arc<CountingSource>,
        controller: CaptureController,
    }

    fn harness(debounce_ms: u64) -> Harness {
        let dir = tempdir().unwrap();
        let config = RecorderConfig {
            scratch_dir: dir.path().join("scratch"),
            shared_dir: dir.path().join("shared"),
            debounce_window_ms: debounce_ms,
            ..RecorderConfig::default()
        };
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(BroadcastNotifier::default());
        let source = Arc::new(CountingSource::default());
        let factory = TestSinkFactory::new();
        let controller = CaptureController::new(
            config,
            factory.shared(),
            store.clone(),
            notifier.clone(),
            source.clone(),
        );
        Harness {
            _dir: dir,
            factory,
            store,
            notifier,
            source,
            controller,
        }
    }

    fn separate_mic() -> WriterSetOptions {
        WriterSetOptions {
            mic_enabled: true,
            app_audio_enabled: false,
            separate_audio: true,
        }
    }

    fn video_only() -> WriterSetOptions {
        WriterSetOptions::default()
    }

    fn feed_video(controller: &CaptureController, start: f64, count: usize) {
        for i in 0..count {
            let frame = video_frame(start + i as f64 / 30.0);
            assert!(matches!(controller.handle_frame(&frame), FrameOutcome::Appended(_)));
        }
    }

    fn published(outcome: FinalizeOutcome) -> ChunkRecord {
        match outcome {
            FinalizeOutcome::Saved(SaveOutcome::Published(record)) => record,
            other => panic!("expected a published chunk, got {:?}", other),
        }
    }

    #[test]
    fn test_three_frames_of_video_and_mic() {
        let h = harness(0);
        h.controller.start(separate_mic()).unwrap();
        h.controller.mark_chunk_start(Some("a".to_string())).unwrap();

        for i in 0..3 {
            let pts = i as f64 / 30.0;
            assert_eq!(
                h.controller.handle_frame(&video_frame(pts)),
                FrameOutcome::Appended(TrackRole::Video)
            );
            assert_eq!(
                h.controller.handle_frame(&mic_frame(pts, 1_600)),
                FrameOutcome::Appended(TrackRole::SeparateMic)
            );
        }

        published(h.controller.finalize_chunk().unwrap());
        let records = h.controller.queue().list().unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.chunk_id.as_deref(), Some("a"));
        assert!(record.video_file_ref.is_some());
        assert!(record.mic_audio_file_ref.is_some());
        assert!((record.duration_secs - 0.1).abs() < 0.01);
        assert!((record.mic_audio_duration_secs.unwrap() - 0.1).abs() < 0.01);

        let chunks_dir = h.controller.config().chunks_dir();
        let mic = record.mic_audio_path(&chunks_dir).unwrap();
        assert!((wav_duration(&mic) - 0.1).abs() < 0.01);
    }

    #[test]
    fn test_silent_track_matches_two_seconds_of_video() {
        let h = harness(0);
        h.controller.start(separate_mic()).unwrap();
        feed_video(&h.controller, 3.0, 60);

        let record = published(h.controller.finalize_chunk().unwrap());
        let mic = record
            .mic_audio_path(&h.controller.config().chunks_dir())
            .expect("silent mic file");
        assert!(mic.exists());
        assert!((wav_duration(&mic) - 2.0).abs() < 0.01);
        let reader = hound::WavReader::open(&mic).unwrap();
        assert!(reader.into_samples::<i16>().all(|s| s.unwrap() == 0));
    }

    #[test]
    fn test_same_id_finalized_twice_keeps_second_chunk() {
        let h = harness(0);
        h.controller.start(video_only()).unwrap();

        h.controller.mark_chunk_start(Some("x".to_string())).unwrap();
        feed_video(&h.controller, 0.0, 3);
        published(h.controller.finalize_chunk().unwrap());

        h.controller.mark_chunk_start(Some("x".to_string())).unwrap();
        feed_video(&h.controller, 1.0, 5);
        published(h.controller.finalize_chunk().unwrap());

        let records = h.controller.queue().list().unwrap();
        assert_eq!(records.len(), 1);
        let video = records[0]
            .video_path(&h.controller.config().chunks_dir())
            .unwrap();
        assert_eq!(read_video_frames(&video).len(), 5);
    }

    #[test]
    fn test_discarded_batch_never_reaches_shared_storage() {
        let h = harness(0);
        h.controller.start(video_only()).unwrap();

        h.controller.mark_chunk_start(None).unwrap();
        feed_video(&h.controller, 0.0, 4);
        h.controller.mark_chunk_start(None).unwrap();
        feed_video(&h.controller, 10.0, 2);
        let record = published(h.controller.finalize_chunk().unwrap());

        let chunks_dir = h.controller.config().chunks_dir();
        let frames = read_video_frames(&record.video_path(&chunks_dir).unwrap());
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].0, MediaTime::ZERO);
        assert_eq!(std::fs::read_dir(&chunks_dir).unwrap().count(), 1);
        assert_eq!(h.controller.queue().list().unwrap().len(), 1);
    }

    #[test]
    fn test_finalize_without_video_publishes_nothing() {
        let h = harness(0);
        let mut rx = h.notifier.subscribe();
        h.controller.start(separate_mic()).unwrap();
        h.controller.mark_chunk_start(Some("empty".to_string())).unwrap();
        let _ = h.controller.handle_frame(&mic_frame(0.0, 480));

        let outcome = h.controller.finalize_chunk().unwrap();
        assert!(matches!(outcome, FinalizeOutcome::Saved(SaveOutcome::NothingCaptured)));
        assert!(h.controller.queue().list().unwrap().is_empty());
        assert_eq!(rx.try_recv().unwrap(), CHUNK_SAVED_TOPIC);
    }

    #[test]
    fn test_repeated_mark_inside_window_discards_once() {
        let h = harness(100);
        let initial = h.controller.start(video_only()).unwrap();

        let first = h.controller.mark_chunk_start(None).unwrap();
        let ChunkBoundary::Discarded { writer_set: Some(after_first) } = first else {
            panic!("expected a discard");
        };
        assert_ne!(after_first, initial);

        assert_eq!(h.controller.mark_chunk_start(None).unwrap(), ChunkBoundary::Debounced);
        assert_eq!(h.controller.writer_set_id(), Some(after_first));

        std::thread::sleep(Duration::from_millis(120));
        assert!(matches!(
            h.controller.mark_chunk_start(None).unwrap(),
            ChunkBoundary::Discarded { .. }
        ));
        assert_ne!(h.controller.writer_set_id(), Some(after_first));
    }

    #[test]
    fn test_repeated_finalize_resignals() {
        let h = harness(100);
        let mut rx = h.notifier.subscribe();
        h.controller.start(video_only()).unwrap();
        feed_video(&h.controller, 0.0, 3);

        published(h.controller.finalize_chunk().unwrap());
        assert!(matches!(h.controller.finalize_chunk().unwrap(), FinalizeOutcome::Debounced));

        assert_eq!(rx.try_recv().unwrap(), CHUNK_SAVED_TOPIC);
        assert_eq!(rx.try_recv().unwrap(), CHUNK_SAVED_TOPIC);
        assert_eq!(h.controller.queue().list().unwrap().len(), 1);
    }

    #[test]
    fn test_finish_failure_signals_rearms_and_publishes_failed_record() {
        let h = harness(0);
        let mut rx = h.notifier.subscribe();
        h.controller.start(separate_mic()).unwrap();
        h.controller.mark_chunk_start(Some("lost".to_string())).unwrap();
        let before = h.controller.writer_set_id().unwrap();
        feed_video(&h.controller, 0.0, 3);

        h.factory.set_fail_finish(true);
        match h.controller.finalize_chunk().unwrap() {
            FinalizeOutcome::Saved(SaveOutcome::Failed { chunk_id, .. }) => {
                assert_eq!(chunk_id.as_deref(), Some("lost"));
            }
            other => panic!("expected a failed save, got {:?}", other),
        }
        assert_eq!(rx.try_recv().unwrap(), CHUNK_SAVED_TOPIC);

        let after = h.controller.writer_set_id().expect("fresh writer set");
        assert_ne!(before, after);
        let record = h.controller.queue().retrieve("lost").unwrap();
        assert_eq!(record.status, ChunkStatus::Failed);
        assert_eq!(record.video_file_ref, None);

        // Capture carries on into the re-armed writer set
        h.factory.set_fail_finish(false);
        feed_video(&h.controller, 1.0, 3);
        let record = published(h.controller.finalize_chunk().unwrap());
        assert_eq!(record.status, ChunkStatus::Complete);
    }

    #[test]
    fn test_failed_rearm_drops_frames_until_next_boundary() {
        let h = harness(0);
        h.controller.start(video_only()).unwrap();
        feed_video(&h.controller, 0.0, 3);

        // Scratch root replaced by a file: no writer set can be created
        let scratch = h.controller.config().scratch_dir.clone();
        std::fs::remove_dir_all(&scratch).unwrap();
        std::fs::write(&scratch, b"not a directory").unwrap();

        let boundary = h.controller.mark_chunk_start(None).unwrap();
        assert_eq!(boundary, ChunkBoundary::Discarded { writer_set: None });
        assert_eq!(h.controller.writer_set_id(), None);
        assert_eq!(
            h.controller.handle_frame(&video_frame(0.2)),
            FrameOutcome::Dropped(DropReason::NoWriter)
        );
        assert!(h.controller.state().is_active());

        std::fs::remove_file(&scratch).unwrap();
        match h.controller.mark_chunk_start(None).unwrap() {
            ChunkBoundary::Discarded { writer_set: Some(_) } => {}
            other => panic!("expected a fresh writer set, got {:?}", other),
        }
        feed_video(&h.controller, 0.3, 3);
        published(h.controller.finalize_chunk().unwrap());
    }

    #[test]
    fn test_audio_before_video_is_dropped() {
        let h = harness(0);
        h.controller.start(separate_mic()).unwrap();

        assert_eq!(
            h.controller.handle_frame(&mic_frame(0.0, 480)),
            FrameOutcome::Dropped(DropReason::BeforeFirstVideo)
        );
        assert_eq!(
            h.controller.handle_frame(&video_frame(5.0)),
            FrameOutcome::Appended(TrackRole::Video)
        );
    }

    #[test]
    fn test_frames_rejected_when_idle() {
        let h = harness(0);
        assert_eq!(
            h.controller.handle_frame(&video_frame(0.0)),
            FrameOutcome::Dropped(DropReason::NotCapturing)
        );
        assert!(matches!(
            h.controller.mark_chunk_start(None),
            Err(CaptureError::NotCapturing)
        ));
        assert!(matches!(h.controller.finalize_chunk(), Err(CaptureError::NotCapturing)));
    }

    #[test]
    fn test_pause_is_advisory() {
        let h = harness(0);
        h.controller.start(video_only()).unwrap();
        h.controller.pause().unwrap();
        h.controller.pause().unwrap();

        assert_eq!(h.controller.state(), CaptureState::Paused);
        assert_eq!(h.source.pauses.load(Ordering::SeqCst), 1);
        assert!(matches!(h.controller.handle_frame(&video_frame(0.0)), FrameOutcome::Appended(_)));

        h.controller.resume().unwrap();
        assert_eq!(h.controller.state(), CaptureState::Capturing);
    }

    #[test]
    fn test_pause_and_resume_refused_when_idle() {
        let h = harness(0);
        assert!(matches!(h.controller.pause(), Err(CaptureError::NotCapturing)));
        assert!(matches!(h.controller.resume(), Err(CaptureError::NotCapturing)));
        assert_eq!(h.controller.state(), CaptureState::Idle);
        assert_eq!(h.source.pauses.load(Ordering::SeqCst), 0);

        h.controller.start(video_only()).unwrap();
        h.controller.request_stop().unwrap();
        assert!(matches!(h.controller.resume(), Err(CaptureError::NotCapturing)));
        assert_eq!(h.controller.state(), CaptureState::Idle);
    }

    #[test]
    fn test_stop_saves_and_goes_idle() {
        let h = harness(0);
        h.controller.start(video_only()).unwrap();
        assert!(matches!(h.controller.start(video_only()), Err(CaptureError::AlreadyCapturing)));
        h.controller.mark_chunk_start(Some("last".to_string())).unwrap();
        feed_video(&h.controller, 0.0, 10);

        let outcome = h.controller.request_stop().unwrap();
        assert!(matches!(outcome, SaveOutcome::Published(_)));
        assert_eq!(h.controller.state(), CaptureState::Idle);
        assert_eq!(h.controller.writer_set_id(), None);
        assert_eq!(h.source.stops.load(Ordering::SeqCst), 1);
        assert!(h.controller.queue().retrieve("last").is_ok());

        let status = read_status(h.store.as_ref()).unwrap().unwrap();
        assert!(!status.alive);
        assert!(!status.capturing_chunk);

        // A second stop, e.g. the source's own callback, does nothing
        assert!(matches!(
            h.controller.on_session_ended().unwrap(),
            SaveOutcome::NothingCaptured
        ));
        assert_eq!(h.source.stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_session_started_reads_stored_flags() {
        let h = harness(0);
        h.store.put(keys::MIC_ENABLED, serde_json::json!(true)).unwrap();
        h.store.put(keys::SEPARATE_AUDIO, serde_json::json!(true)).unwrap();
        h.controller.on_session_started().unwrap();

        feed_video(&h.controller, 0.0, 1);
        assert_eq!(
            h.controller.handle_frame(&mic_frame(0.0, 480)),
            FrameOutcome::Appended(TrackRole::SeparateMic)
        );
    }

    #[test]
    fn test_status_tracks_chunk_state() {
        let h = harness(0);
        h.controller.start(separate_mic()).unwrap();
        h.controller.mark_chunk_start(None).unwrap();
        feed_video(&h.controller, 0.0, 1);
        let _ = h.controller.handle_frame(&mic_frame(0.0, 480));

        let status = read_status(h.store.as_ref()).unwrap().unwrap();
        assert!(status.alive);
        assert!(status.mic_active);
        assert!(status.capturing_chunk);
        assert_eq!(status.chunk_started_at, h.controller.chunk_started_at());

        h.controller.finalize_chunk().unwrap();
        let status = read_status(h.store.as_ref()).unwrap().unwrap();
        assert!(!status.capturing_chunk);
        assert!(status.is_alive(Utc::now(), h.controller.config().heartbeat_tolerance()));
    }
}
