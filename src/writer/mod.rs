//! Chunked multi-track writer
//!
//! Track encoders, container writers, audio padding and the writer set
//! that ties them to one session start time. Encoding goes through the
//! `SinkFactory` seam; FFmpeg/WAV is the default backend.

pub mod container;
pub mod ffmpeg;
pub mod padding;
pub mod sink;
pub mod track;
pub mod wav;
pub mod writer_set;

#[cfg(test)]
pub(crate) mod testing;

pub use container::{ContainerOutput, ContainerWriter, FinishOutcome};
pub use ffmpeg::FfmpegSinkFactory;
pub use padding::{AudioPaddingEngine, PaddingError};
pub use sink::{SinkError, SinkFactory, TrackSink};
pub use track::{TrackEncoder, TrackRole, WriterError};
pub use writer_set::{DropReason, FinishedWriterSet, WriterSet, WriterSetOptions, WriterSetOutcome};
