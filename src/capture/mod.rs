//! Media capture
//!
//! Live tracks, the platform backend seam and the adapter that acquires
//! screen, audio and webcam tracks for a recording.

pub mod adapter;
pub mod ffmpeg;
pub mod platform;
pub mod track;
pub mod traits;

#[cfg(feature = "devices")]
pub mod audio;
#[cfg(feature = "devices")]
pub mod native;
#[cfg(feature = "devices")]
pub mod webcam;

use std::sync::Arc;

pub use adapter::{AcquiredVideo, DeviceCaptureAdapter};
pub use ffmpeg::FfmpegCaptureBackend;
pub use track::{
    audio_track, video_track, AudioBuffer, AudioFeed, AudioTrack, OwnedAudioTrack,
    OwnedVideoTrack, VideoFeed, VideoFrame, VideoTrack,
};
pub use traits::{
    AudioDeviceInfo, AudioSource, CameraInfo, CaptureBackend, CaptureError, CaptureResult,
    DesktopCapture, Resolution, ScreenSource, SystemAudio, VideoConstraints,
};

use crate::utils::FfmpegTools;

/// Best backend compiled into this build
pub fn default_backend(tools: FfmpegTools) -> Arc<dyn CaptureBackend> {
    let ffmpeg = FfmpegCaptureBackend::new(tools);

    #[cfg(feature = "devices")]
    {
        Arc::new(native::NativeCaptureBackend::new(ffmpeg))
    }

    #[cfg(not(feature = "devices"))]
    {
        Arc::new(ffmpeg)
    }
}
