//! Transcode types and errors

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while validating or converting a recording
#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("File is empty")]
    EmptyFile,

    #[error("File too small: {0} bytes")]
    FileTooSmall(u64),

    #[error("Invalid media: {0}")]
    InvalidMedia(String),

    #[error("{0} is not available")]
    ToolUnavailable(String),

    #[error("FFmpeg failed: {0}")]
    Failed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TranscodeError {
    /// The raw file can still be delivered in place of the transcoded one
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TranscodeError::ToolUnavailable(_) | TranscodeError::Failed(_) | TranscodeError::Io(_)
        )
    }
}

pub type TranscodeResult<T> = Result<T, TranscodeError>;

/// Advisory progress callback, percent in `0.0..=100.0`
pub type ProgressCallback = Arc<dyn Fn(f64) + Send + Sync>;

/// Section of a video to keep, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrimSettings {
    pub start_time: f64,
    pub end_time: f64,
}

impl TrimSettings {
    pub fn duration(&self) -> f64 {
        (self.end_time - self.start_time).max(0.0)
    }

    pub fn validate(&self) -> TranscodeResult<()> {
        if self.start_time < 0.0 || self.end_time <= self.start_time {
            return Err(TranscodeError::Failed(format!(
                "invalid trim range {}..{}",
                self.start_time, self.end_time
            )));
        }
        Ok(())
    }
}

/// Structural probe of a media file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetadata {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub duration_ms: f64,
    /// Video codec name, `unknown` when absent
    pub codec: String,
    pub audio_codec: Option<String>,
    pub format: String,
    pub size_bytes: u64,
}
