//! Shared utilities

pub mod error;
pub mod time;

pub use error::{CaptureError, CaptureResult, ErrorResponse};
pub use time::MediaTime;
