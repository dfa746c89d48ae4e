//! Error types and handling
//!
//! Application-wide error type and the serializable shape handed to the frontend.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capture::CaptureError;
use crate::config::ConfigError;
use crate::recorder::RecordingError;
use crate::transcode::TranscodeError;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Recording error: {0}")]
    Recording(#[from] RecordingError),

    #[error("Transcode error: {0}")]
    Transcode(#[from] TranscodeError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),
}

/// Error response for frontend
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl AppError {
    /// Stable machine-readable code for the frontend
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Recording(e) => e.code(),
            AppError::Transcode(_) => "TRANSCODE_ERROR",
            AppError::Capture(CaptureError::DeviceUnavailable(_)) => "DEVICE_UNAVAILABLE",
            AppError::Capture(CaptureError::CaptureUnsupported(_)) => "CAPTURE_UNSUPPORTED",
            AppError::Capture(_) => "CAPTURE_ERROR",
        }
    }
}

impl From<AppError> for ErrorResponse {
    fn from(error: AppError) -> Self {
        ErrorResponse {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}
