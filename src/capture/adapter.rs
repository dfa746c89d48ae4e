//! Device capture adapter
//!
//! Thin layer over a [`CaptureBackend`] that applies the recording bounds and
//! negotiates system audio: when video and system audio cannot be opened
//! together it retries exactly once with video alone.

use std::sync::Arc;

use super::track::{OwnedAudioTrack, OwnedVideoTrack};
use super::traits::{
    AudioSource, CaptureBackend, CaptureError, CaptureResult, DesktopCapture, SystemAudio,
    VideoConstraints,
};

/// Outcome of acquiring the desktop source
pub struct AcquiredVideo {
    pub video: OwnedVideoTrack,
    pub system_audio: Option<OwnedAudioTrack>,
    /// System audio was requested but had to be dropped
    pub degraded: bool,
}

#[derive(Clone)]
pub struct DeviceCaptureAdapter {
    backend: Arc<dyn CaptureBackend>,
}

impl DeviceCaptureAdapter {
    pub fn new(backend: Arc<dyn CaptureBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn CaptureBackend> {
        &self.backend
    }

    /// Open a screen or window, with system audio when requested and possible
    pub async fn acquire_video(
        &self,
        source_id: &str,
        fps: u32,
        system_audio: Option<&SystemAudio>,
    ) -> CaptureResult<AcquiredVideo> {
        let constraints = VideoConstraints::screen(fps);
        let with_system_audio = system_audio.is_some();

        match self
            .backend
            .open_desktop(source_id, &constraints, system_audio)
            .await
        {
            Ok(DesktopCapture {
                video,
                system_audio,
            }) => Ok(AcquiredVideo {
                degraded: with_system_audio && system_audio.is_none(),
                video,
                system_audio,
            }),
            Err(CaptureError::CaptureUnsupported(reason)) if with_system_audio => {
                tracing::warn!(
                    "System audio unavailable for {} ({}), continuing with video only",
                    source_id,
                    reason
                );
                let capture = self
                    .backend
                    .open_desktop(source_id, &constraints, None)
                    .await?;
                Ok(AcquiredVideo {
                    video: capture.video,
                    system_audio: None,
                    degraded: true,
                })
            }
            Err(e) => Err(e),
        }
    }

    pub async fn acquire_audio(&self, source: &AudioSource) -> CaptureResult<OwnedAudioTrack> {
        tracing::debug!("Acquiring audio source {:?} via {}", source, self.backend.name());
        self.backend.open_audio(source).await
    }

    pub async fn acquire_webcam(
        &self,
        device_id: Option<&str>,
        fps: u32,
    ) -> CaptureResult<OwnedVideoTrack> {
        tracing::debug!("Acquiring webcam {:?} via {}", device_id, self.backend.name());
        self.backend.open_webcam(device_id, fps).await
    }
}
