//! Per-session recording settings
//!
//! Settings are captured once when a session starts and never change while it runs.
//! The frontend edits them through partial [`SettingsPatch`] updates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Quality tier controlling the transcode bitrate and the nominal fps/resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Low,
    #[default]
    Medium,
    High,
    Ultra,
}

/// Encoding parameters for a quality tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QualityPreset {
    /// Video bitrate in kbit/s
    pub bitrate_kbps: u32,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
}

impl QualityPreset {
    /// Bitrate in ffmpeg notation, e.g. `2500k`
    pub fn bitrate_arg(&self) -> String {
        format!("{}k", self.bitrate_kbps)
    }
}

impl QualityTier {
    pub const ALL: [QualityTier; 4] = [
        QualityTier::Low,
        QualityTier::Medium,
        QualityTier::High,
        QualityTier::Ultra,
    ];

    pub fn preset(self) -> QualityPreset {
        match self {
            QualityTier::Low => QualityPreset {
                bitrate_kbps: 1000,
                fps: 15,
                width: 1280,
                height: 720,
            },
            QualityTier::Medium => QualityPreset {
                bitrate_kbps: 2500,
                fps: 30,
                width: 1920,
                height: 1080,
            },
            QualityTier::High => QualityPreset {
                bitrate_kbps: 5000,
                fps: 60,
                width: 1920,
                height: 1080,
            },
            QualityTier::Ultra => QualityPreset {
                bitrate_kbps: 8000,
                fps: 60,
                width: 2560,
                height: 1440,
            },
        }
    }
}

/// Corner of the canvas holding the webcam overlay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WebcamPosition {
    TopLeft,
    TopRight,
    BottomLeft,
    #[default]
    BottomRight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebcamShape {
    #[default]
    Circle,
    Square,
}

/// Overlay geometry handed to the compositor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WebcamOverlay {
    pub position: WebcamPosition,
    /// Overlay edge as a percentage of the canvas width
    pub size_percent: f32,
    pub shape: WebcamShape,
}

impl Default for WebcamOverlay {
    fn default() -> Self {
        Self {
            position: WebcamPosition::default(),
            size_percent: DEFAULT_WEBCAM_SIZE,
            shape: WebcamShape::default(),
        }
    }
}

pub const DEFAULT_FPS: u32 = 30;
pub const DEFAULT_WEBCAM_SIZE: f32 = 15.0;

/// Settings for one recording session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecordingSettings {
    /// Directory receiving the raw and final files
    pub output_path: PathBuf,

    pub video_quality: QualityTier,

    /// Target frame rate, independent of the quality tier
    pub fps: u32,

    /// Preferred system audio device, if the platform exposes a choice
    pub audio_source: Option<String>,

    /// Microphone device id; `None` selects the default input
    pub microphone_source: Option<String>,

    pub include_system_audio: bool,
    pub include_microphone: bool,
    pub include_webcam: bool,
    pub webcam_device_id: Option<String>,
    pub webcam_position: WebcamPosition,
    pub webcam_size: f32,
    pub webcam_shape: WebcamShape,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            output_path: default_output_dir(),
            video_quality: QualityTier::default(),
            fps: DEFAULT_FPS,
            audio_source: None,
            microphone_source: None,
            include_system_audio: true,
            include_microphone: false,
            include_webcam: false,
            webcam_device_id: None,
            webcam_position: WebcamPosition::default(),
            webcam_size: DEFAULT_WEBCAM_SIZE,
            webcam_shape: WebcamShape::default(),
        }
    }
}

impl RecordingSettings {
    pub fn preset(&self) -> QualityPreset {
        self.video_quality.preset()
    }

    /// Whether any audio source was requested for the session
    pub fn wants_audio(&self) -> bool {
        self.include_system_audio || self.include_microphone
    }

    /// Frame rate actually used, never zero
    pub fn effective_fps(&self) -> u32 {
        if self.fps == 0 {
            self.preset().fps
        } else {
            self.fps
        }
    }

    pub fn webcam_overlay(&self) -> WebcamOverlay {
        WebcamOverlay {
            position: self.webcam_position,
            size_percent: self.webcam_size,
            shape: self.webcam_shape,
        }
    }

    /// Merge a partial update into these settings
    pub fn apply(&mut self, patch: SettingsPatch) {
        if let Some(v) = patch.output_path {
            self.output_path = v;
        }
        if let Some(v) = patch.video_quality {
            self.video_quality = v;
        }
        if let Some(v) = patch.fps {
            self.fps = v;
        }
        if let Some(v) = patch.audio_source {
            self.audio_source = v;
        }
        if let Some(v) = patch.microphone_source {
            self.microphone_source = v;
        }
        if let Some(v) = patch.include_system_audio {
            self.include_system_audio = v;
        }
        if let Some(v) = patch.include_microphone {
            self.include_microphone = v;
        }
        if let Some(v) = patch.include_webcam {
            self.include_webcam = v;
        }
        if let Some(v) = patch.webcam_device_id {
            self.webcam_device_id = v;
        }
        if let Some(v) = patch.webcam_position {
            self.webcam_position = v;
        }
        if let Some(v) = patch.webcam_size {
            self.webcam_size = v;
        }
        if let Some(v) = patch.webcam_shape {
            self.webcam_shape = v;
        }
    }
}

/// Partial settings update. Absent fields keep their current value;
/// nullable device ids are cleared with an explicit `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsPatch {
    pub output_path: Option<PathBuf>,
    pub video_quality: Option<QualityTier>,
    pub fps: Option<u32>,
    #[serde(deserialize_with = "nullable")]
    pub audio_source: Option<Option<String>>,
    #[serde(deserialize_with = "nullable")]
    pub microphone_source: Option<Option<String>>,
    pub include_system_audio: Option<bool>,
    pub include_microphone: Option<bool>,
    pub include_webcam: Option<bool>,
    #[serde(deserialize_with = "nullable")]
    pub webcam_device_id: Option<Option<String>>,
    pub webcam_position: Option<WebcamPosition>,
    pub webcam_size: Option<f32>,
    pub webcam_shape: Option<WebcamShape>,
}

fn nullable<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

/// `~/Movies/Screen Recordings` on macOS, `~/Videos/Screen Recordings` elsewhere
pub fn default_output_dir() -> PathBuf {
    let base = if cfg!(target_os = "macos") {
        dirs::home_dir().map(|home| home.join("Movies"))
    } else {
        dirs::video_dir().or_else(|| dirs::home_dir().map(|home| home.join("Videos")))
    };

    base.unwrap_or_else(std::env::temp_dir)
        .join("Screen Recordings")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_quality_tiers_are_distinct() {
        let triples: HashSet<_> = QualityTier::ALL
            .iter()
            .map(|tier| {
                let p = tier.preset();
                (p.bitrate_kbps, p.fps, (p.width, p.height))
            })
            .collect();
        assert_eq!(triples.len(), 4);
        assert_eq!(QualityTier::Medium.preset().bitrate_arg(), "2500k");
        let ultra = QualityTier::Ultra.preset();
        assert_eq!((ultra.width, ultra.height), (2560, 1440));
    }

    #[test]
    fn test_defaults() {
        let settings = RecordingSettings::default();
        assert_eq!(settings.video_quality, QualityTier::Medium);
        assert_eq!(settings.fps, 30);
        assert!(settings.include_system_audio);
        assert!(!settings.include_microphone);
        assert!(!settings.include_webcam);
        assert_eq!(settings.webcam_position, WebcamPosition::BottomRight);
        assert_eq!(settings.webcam_shape, WebcamShape::Circle);
        assert!(settings.output_path.ends_with("Screen Recordings"));
    }

    #[test]
    fn test_fps_is_independent_of_tier() {
        let settings = RecordingSettings {
            video_quality: QualityTier::Low,
            fps: 60,
            ..Default::default()
        };
        assert_eq!(settings.effective_fps(), 60);
        assert_eq!(settings.preset().fps, 15);
    }

    #[test]
    fn test_patch_merges_only_present_fields() {
        let mut settings = RecordingSettings::default();
        let patch: SettingsPatch = serde_json::from_str(
            r#"{"videoQuality":"high","webcamPosition":"top-left","webcamDeviceId":"cam-1"}"#,
        )
        .unwrap();
        settings.apply(patch);

        assert_eq!(settings.video_quality, QualityTier::High);
        assert_eq!(settings.webcam_position, WebcamPosition::TopLeft);
        assert_eq!(settings.webcam_device_id.as_deref(), Some("cam-1"));
        assert_eq!(settings.fps, 30);

        let clear: SettingsPatch = serde_json::from_str(r#"{"webcamDeviceId":null}"#).unwrap();
        settings.apply(clear);
        assert_eq!(settings.webcam_device_id, None);
        assert_eq!(settings.video_quality, QualityTier::High);
    }

    #[test]
    fn test_settings_serialize_camel_case() {
        let json = serde_json::to_value(RecordingSettings::default()).unwrap();
        assert_eq!(json["videoQuality"], "medium");
        assert_eq!(json["webcamPosition"], "bottom-right");
        assert_eq!(json["includeSystemAudio"], true);
    }
}
