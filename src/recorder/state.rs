//! Capture state machine
//!
//! `Idle -> Capturing -> (Paused <-> Capturing) -> Finishing -> Idle`

use serde::{Deserialize, Serialize};
use std::fmt;

/// Current state of the capture controller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureState {
    /// No capture in progress
    #[default]
    Idle,
    /// Frames are being routed
    Capturing,
    /// Capture source asked to pause
    Paused,
    /// Saving the final writer set after a stop
    Finishing,
}

impl CaptureState {
    /// Whether frames and chunk boundaries are accepted
    pub fn is_active(&self) -> bool {
        matches!(self, CaptureState::Capturing | CaptureState::Paused)
    }

    pub fn can_transition_to(&self, next: CaptureState) -> bool {
        use CaptureState::*;
        matches!(
            (self, next),
            (Idle, Capturing)
                | (Capturing, Paused)
                | (Paused, Capturing)
                | (Capturing, Finishing)
                | (Paused, Finishing)
                | (Finishing, Idle)
        )
    }
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CaptureState::Idle => "idle",
            CaptureState::Capturing => "capturing",
            CaptureState::Paused => "paused",
            CaptureState::Finishing => "finishing",
        };
        write!(f, "{}", name)
    }
}
