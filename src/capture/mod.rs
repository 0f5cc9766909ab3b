//! Capture source interface
//!
//! Frames and lifecycle requests exchanged with the external capture
//! source. Capture itself happens outside this crate.

pub mod frame;
pub mod source;

pub use frame::{AudioBuffer, AudioFormat, AudioSamples, Frame, FrameFlags, MediaPayload, TrackKind, VideoBuffer};
pub use source::{CaptureSource, DetachedSource};
