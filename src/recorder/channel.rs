//! Capture host interface
//!
//! The session controller drives the capture side (device capture, mixing,
//! compositing and the stream recorder) through [`CaptureHost`]. Encoded
//! chunks come back only through the chunk transport.

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

use super::settings::RecordingSettings;
use super::transport::ChunkSender;
use crate::capture::CaptureError;
use crate::transcode::TranscodeError;

/// Errors that can occur during recording
#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("A recording is already in progress")]
    AlreadyRecording,

    #[error("No active recording")]
    NoActiveRecording,

    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Capture unsupported: {0}")]
    CaptureUnsupported(String),

    #[error("Capture error: {0}")]
    CaptureFailed(String),

    #[error("Encoding error: {0}")]
    EncodingError(String),

    #[error("Recording file is empty")]
    EmptyRecording,

    #[error("Recording file is too small ({0} bytes) and likely corrupted")]
    CorruptRecording(u64),

    #[error("Recording file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Recording file too small: {0} bytes")]
    FileTooSmall(u64),

    #[error("Invalid media: {0}")]
    InvalidMedia(String),

    #[error("Transcode failed: {0}")]
    TranscodeFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RecordingError {
    /// Stable machine-readable code for the frontend
    pub fn code(&self) -> &'static str {
        match self {
            RecordingError::AlreadyRecording => "ALREADY_RECORDING",
            RecordingError::NoActiveRecording => "NO_ACTIVE_RECORDING",
            RecordingError::DeviceUnavailable(_) => "DEVICE_UNAVAILABLE",
            RecordingError::CaptureUnsupported(_) => "CAPTURE_UNSUPPORTED",
            RecordingError::CaptureFailed(_) => "CAPTURE_ERROR",
            RecordingError::EncodingError(_) => "ENCODING_ERROR",
            RecordingError::EmptyRecording => "EMPTY_RECORDING",
            RecordingError::CorruptRecording(_) => "CORRUPT_RECORDING",
            RecordingError::FileNotFound(_) => "FILE_NOT_FOUND",
            RecordingError::FileTooSmall(_) => "FILE_TOO_SMALL",
            RecordingError::InvalidMedia(_) => "INVALID_MEDIA",
            RecordingError::TranscodeFailed(_) => "TRANSCODE_FAILED",
            RecordingError::Io(_) => "IO_ERROR",
        }
    }

    /// Errors rejected by the session guard rather than raised by a failing session
    pub fn is_guard(&self) -> bool {
        matches!(
            self,
            RecordingError::AlreadyRecording | RecordingError::NoActiveRecording
        )
    }
}

impl From<CaptureError> for RecordingError {
    fn from(error: CaptureError) -> Self {
        match error {
            CaptureError::DeviceUnavailable(msg) => RecordingError::DeviceUnavailable(msg),
            CaptureError::CaptureUnsupported(msg) => RecordingError::CaptureUnsupported(msg),
            CaptureError::Io(e) => RecordingError::Io(e),
            other => RecordingError::CaptureFailed(other.to_string()),
        }
    }
}

impl From<TranscodeError> for RecordingError {
    fn from(error: TranscodeError) -> Self {
        match error {
            TranscodeError::FileNotFound(path) => RecordingError::FileNotFound(path),
            TranscodeError::EmptyFile => RecordingError::EmptyRecording,
            TranscodeError::FileTooSmall(size) => RecordingError::FileTooSmall(size),
            TranscodeError::InvalidMedia(msg) => RecordingError::InvalidMedia(msg),
            other => RecordingError::TranscodeFailed(other.to_string()),
        }
    }
}

/// Result type for recording operations
pub type RecordingResult<T> = Result<T, RecordingError>;

/// What the capture side should record
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    /// `screen:<n>` or `window:<id>`
    pub source_id: String,
    pub display_id: Option<String>,
    pub settings: RecordingSettings,
}

/// Capture side of a recording session
#[async_trait]
pub trait CaptureHost: Send + Sync {
    /// Acquire devices and start streaming chunks into `sink`
    async fn start(&self, request: CaptureRequest, sink: ChunkSender) -> RecordingResult<()>;

    async fn pause(&self) -> RecordingResult<()>;

    async fn resume(&self) -> RecordingResult<()>;

    /// Flush the final chunk and release every device
    async fn stop(&self) -> RecordingResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_errors_map_to_taxonomy() {
        let e: RecordingError = CaptureError::CaptureUnsupported("loopback".into()).into();
        assert!(matches!(e, RecordingError::CaptureUnsupported(_)));

        let e: RecordingError = CaptureError::InvalidSource("bogus".into()).into();
        assert_eq!(e.code(), "CAPTURE_ERROR");
    }

    #[test]
    fn test_transcode_errors_map_to_taxonomy() {
        let e: RecordingError = TranscodeError::EmptyFile.into();
        assert!(matches!(e, RecordingError::EmptyRecording));

        let e: RecordingError = TranscodeError::Failed("exit 1".into()).into();
        assert!(matches!(e, RecordingError::TranscodeFailed(_)));
    }

    #[test]
    fn test_guard_errors() {
        assert!(RecordingError::AlreadyRecording.is_guard());
        assert!(RecordingError::NoActiveRecording.is_guard());
        assert!(!RecordingError::EmptyRecording.is_guard());
    }
}
