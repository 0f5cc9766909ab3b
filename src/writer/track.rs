//! Track encoder
//!
//! One `TrackEncoder` per track of a container. The sink behind it is
//! created lazily from the first accepted sample, which is when the
//! track's format becomes known.

use super::sink::{EncodedSample, SampleData, SinkError, SinkFactory, TrackFormat, TrackSink};
use crate::capture::frame::TrackKind;
use crate::utils::time::MediaTime;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Poll interval while waiting for a sink to accept more data
const READY_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Errors from track encoders, containers and writer sets
#[derive(Error, Debug)]
pub enum WriterError {
    #[error("Container already opened")]
    AlreadyOpened,

    #[error("Container is not open")]
    NotOpen,

    #[error("Container session has not started")]
    NoSession,

    #[error("Container already finished")]
    AlreadyFinished,

    #[error("Container has no {0} track")]
    NoTrack(TrackRole),

    #[error("Track {0} is not ready for more data")]
    NotReady(TrackRole),

    #[error("Track {0} format changed mid-stream")]
    FormatChanged(TrackRole),

    #[error("Frame payload does not match track {0}")]
    PayloadMismatch(TrackRole),

    #[error("Track {role} sink error: {source}")]
    Sink {
        role: TrackRole,
        #[source]
        source: SinkError,
    },

    #[error("Mux failed: {0}")]
    Mux(#[source] SinkError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for writer operations
pub type WriterResult<T> = Result<T, WriterError>;

/// Position of a track within a writer set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackRole {
    /// Screen video in the main container
    Video,
    /// Microphone audio multiplexed into the main container
    EmbeddedMic,
    /// System audio multiplexed into the main container
    EmbeddedApp,
    /// Microphone audio in its own container
    SeparateMic,
    /// System audio in its own container
    SeparateApp,
}

impl TrackRole {
    /// Suffix used in part file names
    pub fn part_suffix(&self) -> &'static str {
        match self {
            TrackRole::Video => "video",
            TrackRole::EmbeddedMic | TrackRole::SeparateMic => "mic",
            TrackRole::EmbeddedApp | TrackRole::SeparateApp => "app",
        }
    }

    pub fn kind(&self) -> TrackKind {
        match self {
            TrackRole::Video => TrackKind::Video,
            TrackRole::EmbeddedMic | TrackRole::SeparateMic => TrackKind::MicAudio,
            TrackRole::EmbeddedApp | TrackRole::SeparateApp => TrackKind::AppAudio,
        }
    }

    pub fn is_separate(&self) -> bool {
        matches!(self, TrackRole::SeparateMic | TrackRole::SeparateApp)
    }
}

impl fmt::Display for TrackRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackRole::Video => write!(f, "video"),
            TrackRole::EmbeddedMic => write!(f, "embedded-mic"),
            TrackRole::EmbeddedApp => write!(f, "embedded-app"),
            TrackRole::SeparateMic => write!(f, "separate-mic"),
            TrackRole::SeparateApp => write!(f, "separate-app"),
        }
    }
}

/// Per-track bookkeeping
#[derive(Debug, Clone, Default)]
pub struct TrackState {
    /// Session-relative end of the last successfully appended sample
    pub last_end: Option<MediaTime>,

    /// Format learned from the first accepted sample
    pub format: Option<TrackFormat>,

    /// Number of samples appended
    pub appended: u64,
}

impl TrackState {
    pub fn format_known(&self) -> bool {
        self.format.is_some()
    }

    pub fn end_or_zero(&self) -> MediaTime {
        self.last_end.unwrap_or(MediaTime::ZERO)
    }
}

/// Wraps the incremental sink of one track
pub struct TrackEncoder {
    role: TrackRole,
    dir: PathBuf,
    stem: String,
    factory: Arc<dyn SinkFactory>,
    sink: Option<Box<dyn TrackSink>>,
    part_path: Option<PathBuf>,
    state: TrackState,
}

impl TrackEncoder {
    /// Create an encoder whose part file will live at `dir/<stem>.<suffix>.<ext>`
    pub fn new(role: TrackRole, dir: &Path, stem: &str, factory: Arc<dyn SinkFactory>) -> Self {
        Self {
            role,
            dir: dir.to_path_buf(),
            stem: stem.to_string(),
            factory,
            sink: None,
            part_path: None,
            state: TrackState::default(),
        }
    }

    pub fn role(&self) -> TrackRole {
        self.role
    }

    pub fn state(&self) -> &TrackState {
        &self.state
    }

    /// Whether a sink has been created for this track
    pub fn is_open(&self) -> bool {
        self.sink.is_some()
    }

    /// Create the sink for `format`, or check the format of the existing one
    pub fn open(&mut self, format: TrackFormat) -> WriterResult<()> {
        if self.sink.is_some() {
            if self.state.format.as_ref() != Some(&format) {
                return Err(WriterError::FormatChanged(self.role));
            }
            return Ok(());
        }

        let ext = self.factory.part_extension(&format);
        let path = self
            .dir
            .join(format!("{}.{}.{}", self.stem, self.role.part_suffix(), ext));
        let sink = self
            .factory
            .create_sink(&path, &format)
            .map_err(|source| WriterError::Sink {
                role: self.role,
                source,
            })?;

        tracing::debug!("Opened {} track at {:?}", self.role, path);
        self.sink = Some(sink);
        self.part_path = Some(path);
        self.state.format = Some(format);
        Ok(())
    }

    /// Whether the sink can take another sample; false if not open
    pub fn is_ready(&mut self) -> bool {
        self.sink
            .as_mut()
            .map(|sink| sink.is_ready_for_more_data())
            .unwrap_or(false)
    }

    /// Poll readiness until `timeout` elapses
    pub fn wait_until_ready(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_ready() {
                return true;
            }
            if self.sink.is_none() || Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(READY_POLL_INTERVAL);
        }
    }

    /// Append one sample, creating the sink on first use
    ///
    /// Fails with `NotReady` instead of blocking when the sink is busy.
    pub fn append(
        &mut self,
        format: TrackFormat,
        pts: MediaTime,
        duration: MediaTime,
        data: SampleData<'_>,
    ) -> WriterResult<()> {
        self.open(format)?;

        let role = self.role;
        let sink = self.sink.as_mut().ok_or(WriterError::NotOpen)?;
        if !sink.is_ready_for_more_data() {
            return Err(WriterError::NotReady(role));
        }
        sink.append(EncodedSample {
            pts,
            duration,
            data,
        })
        .map_err(|source| WriterError::Sink { role, source })?;

        let end = pts + duration;
        self.state.last_end = Some(self.state.last_end.map_or(end, |last| last.max(end)));
        self.state.appended += 1;
        Ok(())
    }

    /// Finish the sink, returning the finished part file if one was written
    pub fn finish(&mut self) -> WriterResult<Option<PathBuf>> {
        let Some(mut sink) = self.sink.take() else {
            return Ok(None);
        };
        sink.finish().map_err(|source| WriterError::Sink {
            role: self.role,
            source,
        })?;
        Ok(self.part_path.clone())
    }

    /// Abort the sink and drop its partial output
    pub fn cancel(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            sink.cancel();
            tracing::debug!("Canceled {} track", self.role);
        }
    }
}
