//! Recording state management
//!
//! Defines the session phases, the state snapshot shown to the frontend and
//! the naming of the files a session produces.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Phase of the recording session controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    /// No recording in progress
    #[default]
    Idle,
    /// Capture is being brought up
    Starting,
    /// Currently recording
    Recording,
    /// Recording is paused
    Paused,
    /// Stop requested; trailing chunks drain and the file is transcoded
    Finalizing,
}

impl SessionPhase {
    /// Recording or paused
    pub fn is_active(self) -> bool {
        matches!(self, SessionPhase::Recording | SessionPhase::Paused)
    }
}

/// Snapshot of the session pushed to observers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingState {
    pub is_recording: bool,
    pub is_paused: bool,
    /// Whole seconds spent recording, pauses excluded
    pub duration: u64,
    pub output_file: Option<PathBuf>,
}

/// Result of a completed recording
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishedRecording {
    /// File handed to the user: the MP4, or the raw WebM when transcoding failed
    pub output_file: PathBuf,
    pub raw_file: PathBuf,
    pub duration_secs: u64,
    pub transcoded: bool,
}

/// Paths of the two files belonging to one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingPaths {
    pub raw: PathBuf,
    pub output: PathBuf,
}

impl RecordingPaths {
    pub const RAW_EXTENSION: &'static str = "webm";
    pub const OUTPUT_EXTENSION: &'static str = "mp4";

    /// `recording-<timestamp>.webm` and `.mp4` under `dir`
    pub fn for_timestamp(dir: &Path, at: DateTime<Utc>) -> Self {
        let base = format!("recording-{}", file_stamp(at));
        Self {
            raw: dir.join(format!("{}.{}", base, Self::RAW_EXTENSION)),
            output: dir.join(format!("{}.{}", base, Self::OUTPUT_EXTENSION)),
        }
    }
}

/// ISO-8601 timestamp with `:` and `.` replaced so it is safe in file names
fn file_stamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_paths_share_timestamp_base() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
            + chrono::Duration::milliseconds(42);
        let paths = RecordingPaths::for_timestamp(Path::new("/tmp/rec"), at);

        assert_eq!(
            paths.raw,
            PathBuf::from("/tmp/rec/recording-2024-03-09T14-05-07-042Z.webm")
        );
        assert_eq!(
            paths.output,
            PathBuf::from("/tmp/rec/recording-2024-03-09T14-05-07-042Z.mp4")
        );
    }

    #[test]
    fn test_state_serializes_camel_case() {
        let state = RecordingState {
            is_recording: true,
            is_paused: false,
            duration: 3,
            output_file: None,
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["isRecording"], true);
        assert_eq!(json["duration"], 3);
        assert!(json["outputFile"].is_null());
    }
}
