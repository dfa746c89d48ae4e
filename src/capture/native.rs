//! Capture backend using native device APIs where available
//!
//! Screens and system audio still go through ffmpeg; microphones use cpal and
//! webcams use nokhwa.

use async_trait::async_trait;

use super::ffmpeg::FfmpegCaptureBackend;
use super::track::{OwnedAudioTrack, OwnedVideoTrack};
use super::traits::{
    AudioDeviceInfo, AudioSource, CameraInfo, CaptureBackend, CaptureResult, DesktopCapture,
    ScreenSource, SystemAudio, VideoConstraints,
};
use super::{audio, webcam};

pub struct NativeCaptureBackend {
    ffmpeg: FfmpegCaptureBackend,
}

impl NativeCaptureBackend {
    pub fn new(ffmpeg: FfmpegCaptureBackend) -> Self {
        Self { ffmpeg }
    }
}

#[async_trait]
impl CaptureBackend for NativeCaptureBackend {
    fn name(&self) -> &'static str {
        "native"
    }

    async fn screen_sources(&self) -> CaptureResult<Vec<ScreenSource>> {
        self.ffmpeg.screen_sources().await
    }

    async fn audio_devices(&self) -> CaptureResult<Vec<AudioDeviceInfo>> {
        Ok(audio::input_devices())
    }

    async fn cameras(&self) -> CaptureResult<Vec<CameraInfo>> {
        match webcam::cameras() {
            Ok(cameras) => Ok(cameras),
            Err(e) => {
                tracing::warn!("nokhwa camera query failed ({}), asking ffmpeg", e);
                self.ffmpeg.cameras().await
            }
        }
    }

    async fn open_desktop(
        &self,
        source_id: &str,
        constraints: &VideoConstraints,
        system_audio: Option<&SystemAudio>,
    ) -> CaptureResult<DesktopCapture> {
        self.ffmpeg
            .open_desktop(source_id, constraints, system_audio)
            .await
    }

    async fn open_audio(&self, source: &AudioSource) -> CaptureResult<OwnedAudioTrack> {
        match source {
            AudioSource::Microphone(device) => audio::open_microphone(device.clone()).await,
            AudioSource::System(_) => self.ffmpeg.open_audio(source).await,
        }
    }

    async fn open_webcam(
        &self,
        device_id: Option<&str>,
        fps: u32,
    ) -> CaptureResult<OwnedVideoTrack> {
        webcam::open_webcam(device_id.map(str::to_string), fps).await
    }
}
