//! Error types and handling
//!
//! Top-level error returned by capture controller operations.

use crate::config::ConfigError;
use crate::handoff::queue::HandoffError;
use crate::handoff::store::StoreError;
use crate::writer::track::WriterError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Capture already in progress")]
    AlreadyCapturing,

    #[error("No capture in progress")]
    NotCapturing,

    #[error("Failed to set up writer set: {0}")]
    Setup(#[from] WriterError),

    #[error("Shared storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Handoff error: {0}")]
    Handoff(#[from] HandoffError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl CaptureError {
    /// Stable code for a controlling process
    pub fn code(&self) -> &'static str {
        match self {
            CaptureError::AlreadyCapturing => "ALREADY_CAPTURING",
            CaptureError::NotCapturing => "NOT_CAPTURING",
            CaptureError::Setup(_) => "SETUP_FAILED",
            CaptureError::Store(_) => "STORE_ERROR",
            CaptureError::Handoff(HandoffError::NotFound(_)) => "CHUNK_NOT_FOUND",
            CaptureError::Handoff(_) => "HANDOFF_ERROR",
            CaptureError::Config(_) => "CONFIG_ERROR",
        }
    }
}

/// Error response for the controlling process
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<CaptureError> for ErrorResponse {
    fn from(error: CaptureError) -> Self {
        ErrorResponse {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using CaptureError
pub type CaptureResult<T> = Result<T, CaptureError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_codes() {
        let response = ErrorResponse::from(CaptureError::Handoff(HandoffError::NotFound("a".to_string())));
        assert_eq!(response.code, "CHUNK_NOT_FOUND");
        assert_eq!(response.message, "Handoff error: No chunk with id a");

        let response = ErrorResponse::from(CaptureError::Setup(WriterError::AlreadyOpened));
        assert_eq!(response.code, "SETUP_FAILED");
    }
}
