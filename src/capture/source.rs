//! Capture source collaborator
//!
//! The OS-level capture session lives outside this crate. The controller
//! only needs to forward advisory pause/resume requests and to ask the
//! source to end the session when the controlling process requests a stop.

/// Upstream capture source as seen by the controller
pub trait CaptureSource: Send + Sync {
    /// Get the source identifier, used in logs
    fn id(&self) -> &str;

    /// Advisory pause; frames may still arrive afterwards
    fn pause(&self);

    /// Advisory resume
    fn resume(&self);

    /// Ask the source to end the capture session
    fn request_stop(&self);
}

/// A source that ignores every request, for hosts that drive frames directly
#[derive(Debug, Default)]
pub struct DetachedSource;

impl CaptureSource for DetachedSource {
    fn id(&self) -> &str {
        "detached"
    }

    fn pause(&self) {}

    fn resume(&self) {}

    fn request_stop(&self) {}
}
