//! Capture trait definitions
//!
//! Platform-agnostic types and the backend seam every capture implementation fills.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::track::{OwnedAudioTrack, OwnedVideoTrack};

/// Errors raised while acquiring capture devices
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The requested combination of sources cannot be captured together
    #[error("Capture unsupported: {0}")]
    CaptureUnsupported(String),

    #[error("Invalid source id: {0}")]
    InvalidSource(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Capture backend error: {0}")]
    Backend(String),
}

pub type CaptureResult<T> = Result<T, CaptureError>;

/// A screen or window that can be recorded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenSource {
    /// Source id, `screen:<n>` or `window:<id>`
    pub id: String,

    pub name: String,

    /// PNG data URL preview, empty when no preview could be grabbed
    pub thumbnail: String,

    #[serde(rename = "display_id")]
    pub display_id: Option<String>,

    pub app_icon: Option<String>,
}

/// Information about an audio device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioDeviceInfo {
    /// Unique device ID
    pub id: String,

    /// Device name
    pub name: String,

    /// Whether this is an input device
    pub is_input: bool,

    /// Whether this is the default device
    pub is_default: bool,
}

/// Information about a camera/webcam
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraInfo {
    /// Unique device ID
    pub id: String,

    /// Device name
    pub name: String,

    /// Supported resolutions
    pub supported_resolutions: Vec<Resolution>,
}

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Resolution bounds and frame rate requested from a video device
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoConstraints {
    pub min: Resolution,
    pub max: Resolution,
    pub fps: u32,
}

impl VideoConstraints {
    pub const MIN_RESOLUTION: Resolution = Resolution::new(1280, 720);
    pub const MAX_RESOLUTION: Resolution = Resolution::new(3840, 2160);

    pub fn screen(fps: u32) -> Self {
        Self {
            min: Self::MIN_RESOLUTION,
            max: Self::MAX_RESOLUTION,
            fps: fps.max(1),
        }
    }

    /// Scale a native size into the bounds, keeping the aspect ratio and
    /// even dimensions (required by yuv420p encoders)
    pub fn fit(&self, native: Resolution) -> Resolution {
        if native.width == 0 || native.height == 0 {
            return self.min;
        }

        let w = native.width as f64;
        let h = native.height as f64;
        let down = (self.max.width as f64 / w).min(self.max.height as f64 / h);
        let up = (self.min.width as f64 / w).max(self.min.height as f64 / h);

        let scale = if down < 1.0 {
            down
        } else if up > 1.0 {
            up.min(down)
        } else {
            1.0
        };

        let even = |v: f64| ((v.round() as u32) / 2 * 2).max(2);
        Resolution::new(even(w * scale), even(h * scale))
    }
}

/// Loopback of what the system is playing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemAudio {
    /// Loopback device id, `None` for the platform default
    pub device: Option<String>,
}

/// Where an audio track comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    /// Microphone by device id, `None` for the default input
    Microphone(Option<String>),
    System(SystemAudio),
}

/// Screen/window video plus the system audio captured alongside it
pub struct DesktopCapture {
    pub video: OwnedVideoTrack,
    pub system_audio: Option<OwnedAudioTrack>,
}

/// Platform capture backend
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Screens and windows available for recording
    async fn screen_sources(&self) -> CaptureResult<Vec<ScreenSource>>;

    async fn audio_devices(&self) -> CaptureResult<Vec<AudioDeviceInfo>>;

    async fn cameras(&self) -> CaptureResult<Vec<CameraInfo>>;

    /// Open a screen or window, optionally together with system audio.
    /// Returns `CaptureUnsupported` when the combination is impossible.
    async fn open_desktop(
        &self,
        source_id: &str,
        constraints: &VideoConstraints,
        system_audio: Option<&SystemAudio>,
    ) -> CaptureResult<DesktopCapture>;

    async fn open_audio(&self, source: &AudioSource) -> CaptureResult<OwnedAudioTrack>;

    async fn open_webcam(
        &self,
        device_id: Option<&str>,
        fps: u32,
    ) -> CaptureResult<OwnedVideoTrack>;
}
