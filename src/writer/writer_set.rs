//! Writer set
//!
//! The main container plus the optional separate audio containers of one
//! chunk, all aligned to one session start time. A writer set is created
//! fresh, terminated once by `finish` or `discard`, and never reused.

use super::container::{ContainerOutput, ContainerWriter, FinishOutcome};
use super::padding::AudioPaddingEngine;
use super::sink::SinkFactory;
use super::track::{TrackRole, WriterError, WriterResult};
use crate::capture::frame::{Frame, TrackKind};
use crate::config::RecorderConfig;
use crate::utils::time::MediaTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Which tracks a writer set records, and where audio goes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriterSetOptions {
    pub mic_enabled: bool,
    pub app_audio_enabled: bool,

    /// Write audio to separate files instead of the main container
    pub separate_audio: bool,
}

impl WriterSetOptions {
    /// Role a frame of `kind` is routed to, if that kind is recorded
    pub fn role_for(&self, kind: TrackKind) -> Option<TrackRole> {
        match kind {
            TrackKind::Video => Some(TrackRole::Video),
            TrackKind::MicAudio if !self.mic_enabled => None,
            TrackKind::MicAudio if self.separate_audio => Some(TrackRole::SeparateMic),
            TrackKind::MicAudio => Some(TrackRole::EmbeddedMic),
            TrackKind::AppAudio if !self.app_audio_enabled => None,
            TrackKind::AppAudio if self.separate_audio => Some(TrackRole::SeparateApp),
            TrackKind::AppAudio => Some(TrackRole::EmbeddedApp),
        }
    }
}

/// Why a frame was not appended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Failed the validity check
    Invalid,
    /// The frame's kind is not recorded
    TrackDisabled,
    /// Audio before the first video frame of the writer set
    BeforeFirstVideo,
    /// Audio timestamped before the session start
    BeforeSessionStart,
    /// Encoder busy
    NotReady,
    /// Encoder rejected the sample
    AppendFailed,
    /// No active writer set
    NoWriter,
    /// Controller is not capturing
    NotCapturing,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            DropReason::Invalid => "invalid frame",
            DropReason::TrackDisabled => "track disabled",
            DropReason::BeforeFirstVideo => "before first video frame",
            DropReason::BeforeSessionStart => "before session start",
            DropReason::NotReady => "encoder not ready",
            DropReason::AppendFailed => "append failed",
            DropReason::NoWriter => "no active writer",
            DropReason::NotCapturing => "not capturing",
        };
        write!(f, "{}", reason)
    }
}

/// Outputs of a finished writer set, still in its scratch directory
#[derive(Debug)]
pub struct FinishedWriterSet {
    pub id: Uuid,
    pub scratch_dir: PathBuf,
    pub options: WriterSetOptions,
    /// Session start in the capture source's clock
    pub session_start: MediaTime,
    pub main: ContainerOutput,
    pub mic: Option<ContainerOutput>,
    pub app: Option<ContainerOutput>,
}

impl FinishedWriterSet {
    /// Delete the scratch directory and anything left in it
    pub fn remove_scratch(&self) {
        remove_dir(&self.scratch_dir);
    }
}

#[derive(Debug)]
pub enum WriterSetOutcome {
    Completed(FinishedWriterSet),
    /// No video frame was ever accepted
    NeverStarted,
}

pub struct WriterSet {
    id: Uuid,
    scratch_dir: PathBuf,
    options: WriterSetOptions,
    main: ContainerWriter,
    separate_mic: Option<ContainerWriter>,
    separate_app: Option<ContainerWriter>,
    session_start: Option<MediaTime>,
    padding: AudioPaddingEngine,
    video_frames: u64,
}

impl WriterSet {
    /// Create a writer set in a fresh directory under `scratch_root`
    pub fn create(
        scratch_root: &Path,
        options: WriterSetOptions,
        factory: Arc<dyn SinkFactory>,
        config: &RecorderConfig,
    ) -> WriterResult<Self> {
        let id = Uuid::new_v4();
        let scratch_dir = scratch_root.join(format!("writer_{}", id));
        std::fs::create_dir_all(&scratch_dir)?;

        let nominal = config.nominal_frame_duration();
        let open = |name: &str, file: &str, roles: &[TrackRole]| -> WriterResult<ContainerWriter> {
            let mut container = ContainerWriter::new(name, factory.clone(), nominal);
            container.open(&scratch_dir.join(file), roles)?;
            Ok(container)
        };

        let containers = (|| {
            let mut main_roles = vec![TrackRole::Video];
            let mut separate_mic = None;
            let mut separate_app = None;
            if options.separate_audio {
                if options.mic_enabled {
                    separate_mic = Some(open("mic", "mic.wav", &[TrackRole::SeparateMic])?);
                }
                if options.app_audio_enabled {
                    separate_app = Some(open("app", "app.wav", &[TrackRole::SeparateApp])?);
                }
            } else {
                if options.mic_enabled {
                    main_roles.push(TrackRole::EmbeddedMic);
                }
                if options.app_audio_enabled {
                    main_roles.push(TrackRole::EmbeddedApp);
                }
            }
            let main = open("main", "main.mp4", &main_roles)?;
            Ok::<_, WriterError>((main, separate_mic, separate_app))
        })();

        let (main, separate_mic, separate_app) = match containers {
            Ok(containers) => containers,
            Err(e) => {
                remove_dir(&scratch_dir);
                return Err(e);
            }
        };

        tracing::info!(
            "Created writer set {} (mic={}, app={}, separate={})",
            id,
            options.mic_enabled,
            options.app_audio_enabled,
            options.separate_audio
        );

        Ok(Self {
            id,
            scratch_dir,
            options,
            main,
            separate_mic,
            separate_app,
            session_start: None,
            padding: AudioPaddingEngine::new(&config.padding),
            video_frames: 0,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn options(&self) -> WriterSetOptions {
        self.options
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Presentation time of the first video frame, once seen
    pub fn session_start(&self) -> Option<MediaTime> {
        self.session_start
    }

    pub fn video_frames(&self) -> u64 {
        self.video_frames
    }

    /// Route a frame to its track
    ///
    /// The first video frame fixes the session start. Audio before it is
    /// dropped rather than buffered.
    pub fn route(&mut self, frame: &Frame) -> Result<TrackRole, DropReason> {
        if !frame.is_valid() {
            return Err(DropReason::Invalid);
        }
        let role = self.options.role_for(frame.kind).ok_or(DropReason::TrackDisabled)?;

        // The session start is only fixed once the first video frame is written
        let (start, first_video) = match (self.session_start, role) {
            (Some(start), _) => (start, false),
            (None, TrackRole::Video) => {
                self.main.start_session().map_err(|e| {
                    tracing::warn!("Writer set {}: failed to start session: {}", self.id, e);
                    DropReason::AppendFailed
                })?;
                (frame.pts, true)
            }
            (None, _) => return Err(DropReason::BeforeFirstVideo),
        };
        if frame.pts < start {
            return Err(DropReason::BeforeSessionStart);
        }
        let pts = frame.pts - start;

        let id = self.id;
        let container = match role {
            TrackRole::SeparateMic => self.separate_mic.as_mut(),
            TrackRole::SeparateApp => self.separate_app.as_mut(),
            _ => Some(&mut self.main),
        }
        .ok_or(DropReason::TrackDisabled)?;

        if !container.session_started() {
            container.start_session().map_err(|_| DropReason::AppendFailed)?;
        }

        match container.append(role, pts, frame.duration, &frame.payload) {
            Ok(()) => {}
            Err(WriterError::NotReady(_)) => return Err(DropReason::NotReady),
            Err(e) => {
                tracing::warn!("Writer set {}: dropped {} frame: {}", id, role, e);
                return Err(DropReason::AppendFailed);
            }
        }

        if first_video {
            self.session_start = Some(start);
            tracing::debug!("Writer set {} session start at {}", id, start);
        }
        if role == TrackRole::Video {
            self.video_frames += 1;
        }
        Ok(role)
    }

    /// Pad separate audio to the video end, then finish every container
    ///
    /// On error every container is canceled and the scratch directory is
    /// removed.
    pub fn finish(mut self) -> WriterResult<WriterSetOutcome> {
        let Some(session_start) = self.session_start else {
            tracing::info!("Writer set {} received no video, canceling", self.id);
            self.discard();
            return Ok(WriterSetOutcome::NeverStarted);
        };

        let target = self.main.last_video_end();
        for (container, role) in [
            (self.separate_mic.as_mut(), TrackRole::SeparateMic),
            (self.separate_app.as_mut(), TrackRole::SeparateApp),
        ] {
            let Some(container) = container else {
                continue;
            };
            match self.padding.pad(container, role, target) {
                Ok(report) if report.frames > 0 => {
                    tracing::debug!("Padded {} with {} of silence", role, report.padded);
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Padding aborted for {}: {}", role, e),
            }
        }

        let main = match self.main.finish() {
            Ok(FinishOutcome::Completed(output)) => output,
            Ok(FinishOutcome::NeverStarted) => {
                self.discard();
                return Ok(WriterSetOutcome::NeverStarted);
            }
            Err(e) => {
                self.discard();
                return Err(e);
            }
        };

        let mic = match finish_separate(self.separate_mic.as_mut()) {
            Ok(output) => output,
            Err(e) => {
                self.discard();
                return Err(e);
            }
        };
        let app = match finish_separate(self.separate_app.as_mut()) {
            Ok(output) => output,
            Err(e) => {
                self.discard();
                return Err(e);
            }
        };

        tracing::info!(
            "Writer set {} finished: {} video frames, {}",
            self.id,
            self.video_frames,
            main.duration
        );

        Ok(WriterSetOutcome::Completed(FinishedWriterSet {
            id: self.id,
            scratch_dir: self.scratch_dir.clone(),
            options: self.options,
            session_start,
            main,
            mic,
            app,
        }))
    }

    /// Cancel every container and delete the scratch directory
    pub fn discard(mut self) {
        self.cancel_all();
        remove_dir(&self.scratch_dir);
        tracing::debug!("Discarded writer set {}", self.id);
    }

    fn cancel_all(&mut self) {
        self.main.cancel();
        if let Some(container) = self.separate_mic.as_mut() {
            container.cancel();
        }
        if let Some(container) = self.separate_app.as_mut() {
            container.cancel();
        }
    }
}

fn finish_separate(container: Option<&mut ContainerWriter>) -> WriterResult<Option<ContainerOutput>> {
    let Some(container) = container else {
        return Ok(None);
    };
    if container.state().is_terminal() {
        return Ok(None);
    }
    match container.finish()? {
        FinishOutcome::Completed(output) => Ok(Some(output)),
        FinishOutcome::NeverStarted => Ok(None),
    }
}

fn remove_dir(dir: &Path) {
    if dir.exists() {
        if let Err(e) = std::fs::remove_dir_all(dir) {
            tracing::warn!("Failed to remove scratch directory {:?}: {}", dir, e);
        }
    }
}
