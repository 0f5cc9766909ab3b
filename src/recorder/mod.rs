//! Capture recorder
//!
//! This module implements the chunked capture lifecycle:
//! - CaptureController serializes frame routing and chunk boundaries
//! - ChunkLifecycle discards or saves writer sets and re-arms fresh ones
//! - StatusReporter publishes a heartbeat for the consumer process
//! - The control loop maps inbound topics onto controller calls

pub mod chunk;
pub mod controller;
pub mod signals;
pub mod state;
pub mod status;

pub use chunk::{ChunkLifecycle, SaveOutcome};
pub use controller::{CaptureController, ChunkBoundary, FinalizeOutcome, FrameOutcome, StopOrigin};
pub use signals::{run_control_loop, BroadcastTransport, ControlSignal, SignalTransport};
pub use state::CaptureState;
pub use status::{ExtensionStatus, StatusReporter};
