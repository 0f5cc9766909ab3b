//! Container writer
//!
//! Owns the track encoders of one output container and its
//! open / session / finish lifecycle. Track parts are written next to the
//! output file and combined on finish.

use super::sink::{SampleData, SinkFactory, TrackFormat};
use super::track::{TrackEncoder, TrackRole, WriterError, WriterResult};
use crate::capture::frame::MediaPayload;
use crate::utils::time::MediaTime;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Lifecycle state of a container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Unopened,
    /// Opened, session not started
    Ready,
    /// Session started, accepting samples
    Writing,
    Completed,
    Canceled,
    Failed,
}

impl ContainerState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ContainerState::Completed | ContainerState::Canceled | ContainerState::Failed
        )
    }
}

/// Summary of one finished track
#[derive(Debug, Clone)]
pub struct TrackSummary {
    pub role: TrackRole,
    pub end: MediaTime,
    pub format: Option<TrackFormat>,
    pub samples: u64,
}

/// A completed container file
#[derive(Debug, Clone)]
pub struct ContainerOutput {
    pub path: PathBuf,
    /// Session-relative duration of the container
    pub duration: MediaTime,
    pub tracks: Vec<TrackSummary>,
}

impl ContainerOutput {
    pub fn track(&self, role: TrackRole) -> Option<&TrackSummary> {
        self.tracks.iter().find(|t| t.role == role)
    }
}

/// Result of finishing a container
#[derive(Debug)]
pub enum FinishOutcome {
    Completed(ContainerOutput),
    /// No session or no primary track data; nothing usable was written
    NeverStarted,
}

pub struct ContainerWriter {
    name: String,
    factory: Arc<dyn SinkFactory>,
    state: ContainerState,
    output: Option<PathBuf>,
    tracks: Vec<TrackEncoder>,

    /// Duration assumed for a video frame with no duration and no predecessor
    nominal_frame: MediaTime,
    last_video_pts: Option<MediaTime>,
    last_video_end: MediaTime,
}

impl ContainerWriter {
    pub fn new(name: &str, factory: Arc<dyn SinkFactory>, nominal_frame: MediaTime) -> Self {
        Self {
            name: name.to_string(),
            factory,
            state: ContainerState::Unopened,
            output: None,
            tracks: Vec::new(),
            nominal_frame,
            last_video_pts: None,
            last_video_end: MediaTime::ZERO,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ContainerState {
        self.state
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.output.as_deref()
    }

    /// Open the container for `output` with one track per role
    ///
    /// A container can be opened only once.
    pub fn open(&mut self, output: &Path, roles: &[TrackRole]) -> WriterResult<()> {
        if self.state != ContainerState::Unopened {
            return Err(WriterError::AlreadyOpened);
        }

        let dir = output.parent().unwrap_or_else(|| Path::new("."));
        let stem = output
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| self.name.clone());

        // Video first so that it is input 0 when muxing
        let mut ordered: Vec<TrackRole> = roles.to_vec();
        ordered.sort_by_key(|role| *role != TrackRole::Video);
        ordered.dedup();

        self.tracks = ordered
            .into_iter()
            .map(|role| TrackEncoder::new(role, dir, &stem, self.factory.clone()))
            .collect();
        self.output = Some(output.to_path_buf());
        self.state = ContainerState::Ready;

        tracing::debug!(
            "Opened container {} at {:?} with {} tracks",
            self.name,
            output,
            self.tracks.len()
        );
        Ok(())
    }

    /// Start the container session, at session-relative time zero
    pub fn start_session(&mut self) -> WriterResult<()> {
        match self.state {
            ContainerState::Ready => {
                self.state = ContainerState::Writing;
                tracing::debug!("Container {} session started", self.name);
                Ok(())
            }
            ContainerState::Writing => Ok(()),
            ContainerState::Unopened => Err(WriterError::NotOpen),
            _ => Err(WriterError::AlreadyFinished),
        }
    }

    pub fn session_started(&self) -> bool {
        self.state == ContainerState::Writing
    }

    pub fn has_video(&self) -> bool {
        self.tracks.iter().any(|t| t.role() == TrackRole::Video)
    }

    /// Running `max(pts + duration)` over accepted video frames
    pub fn last_video_end(&self) -> MediaTime {
        self.last_video_end
    }

    pub fn track(&self, role: TrackRole) -> Option<&TrackEncoder> {
        self.tracks.iter().find(|t| t.role() == role)
    }

    pub fn track_mut(&mut self, role: TrackRole) -> Option<&mut TrackEncoder> {
        self.tracks.iter_mut().find(|t| t.role() == role)
    }

    /// Append a frame payload at a session-relative time
    pub fn append(
        &mut self,
        role: TrackRole,
        pts: MediaTime,
        duration: Option<MediaTime>,
        payload: &MediaPayload,
    ) -> WriterResult<()> {
        match self.state {
            ContainerState::Writing => {}
            ContainerState::Ready => return Err(WriterError::NoSession),
            ContainerState::Unopened => return Err(WriterError::NotOpen),
            _ => return Err(WriterError::AlreadyFinished),
        }

        let (format, duration, data) = match (role, payload) {
            (TrackRole::Video, MediaPayload::Video(buffer)) => {
                let duration = self.video_duration(pts, duration);
                (TrackFormat::Video(buffer.format()), duration, SampleData::Video(buffer))
            }
            (TrackRole::Video, MediaPayload::Audio(_)) | (_, MediaPayload::Video(_)) => {
                return Err(WriterError::PayloadMismatch(role));
            }
            (_, MediaPayload::Audio(buffer)) => {
                let duration = duration
                    .filter(|d| d.is_positive())
                    .unwrap_or_else(|| buffer.duration());
                (TrackFormat::Audio(buffer.format), duration, SampleData::Audio(&buffer.samples))
            }
        };

        let track = self.track_mut(role).ok_or(WriterError::NoTrack(role))?;
        track.append(format, pts, duration, data)?;

        if role == TrackRole::Video {
            self.last_video_pts = Some(pts);
            self.last_video_end = self.last_video_end.max(pts + duration);
        }
        Ok(())
    }

    /// Reported duration, else the delta to the previous frame, else nominal
    fn video_duration(&self, pts: MediaTime, reported: Option<MediaTime>) -> MediaTime {
        reported
            .filter(|d| d.is_positive())
            .or_else(|| {
                self.last_video_pts
                    .map(|previous| pts - previous)
                    .filter(|d| d.is_positive())
            })
            .unwrap_or(self.nominal_frame)
    }

    /// Duration of everything written, video end for video containers
    fn duration(&self) -> MediaTime {
        if self.has_video() {
            return self.last_video_end;
        }
        self.tracks
            .iter()
            .map(|t| t.state().end_or_zero())
            .max()
            .unwrap_or(MediaTime::ZERO)
    }

    /// Flush every track and produce the container file
    ///
    /// A container whose session never started, or whose video track never
    /// received a frame, is canceled and reported as `NeverStarted`.
    pub fn finish(&mut self) -> WriterResult<FinishOutcome> {
        if self.state.is_terminal() {
            return Err(WriterError::AlreadyFinished);
        }
        let output = self.output.clone().ok_or(WriterError::NotOpen)?;

        let video_missing = self
            .track(TrackRole::Video)
            .map(|t| t.state().appended == 0)
            .unwrap_or(false);
        if !self.session_started() || video_missing {
            tracing::info!("Container {} never started, canceling", self.name);
            self.cancel();
            return Ok(FinishOutcome::NeverStarted);
        }

        let mut parts: Vec<PathBuf> = Vec::new();
        let mut failure: Option<WriterError> = None;
        for track in &mut self.tracks {
            if failure.is_some() {
                track.cancel();
                continue;
            }
            match track.finish() {
                Ok(Some(part)) => parts.push(part),
                Ok(None) => {}
                Err(e) => failure = Some(e),
            }
        }
        if let Some(e) = failure {
            tracing::error!("Container {} failed to finish: {}", self.name, e);
            remove_parts(&parts);
            self.state = ContainerState::Failed;
            return Err(e);
        }

        match parts.as_slice() {
            [] => {
                self.state = ContainerState::Canceled;
                return Ok(FinishOutcome::NeverStarted);
            }
            [single] => {
                if let Err(e) = std::fs::rename(single, &output) {
                    remove_parts(&parts);
                    self.state = ContainerState::Failed;
                    return Err(e.into());
                }
            }
            _ => {
                let muxed = self.factory.mux(&parts, &output);
                remove_parts(&parts);
                if let Err(e) = muxed {
                    self.state = ContainerState::Failed;
                    return Err(WriterError::Mux(e));
                }
            }
        }

        self.state = ContainerState::Completed;
        let result = ContainerOutput {
            path: output,
            duration: self.duration(),
            tracks: self
                .tracks
                .iter()
                .filter(|t| t.state().appended > 0)
                .map(|t| TrackSummary {
                    role: t.role(),
                    end: t.state().end_or_zero(),
                    format: t.state().format,
                    samples: t.state().appended,
                })
                .collect(),
        };

        tracing::info!(
            "Container {} completed: {:?} ({})",
            self.name,
            result.path,
            result.duration
        );
        Ok(FinishOutcome::Completed(result))
    }

    /// Discard without producing usable output
    pub fn cancel(&mut self) {
        for track in &mut self.tracks {
            track.cancel();
        }
        if !self.state.is_terminal() {
            self.state = ContainerState::Canceled;
        }
    }
}

fn remove_parts(parts: &[PathBuf]) {
    for part in parts {
        if part.exists() {
            if let Err(e) = std::fs::remove_file(part) {
                tracing::warn!("Failed to remove track part {:?}: {}", part, e);
            }
        }
    }
}
