//! In-process capture host
//!
//! Acquires the session's devices, wires them through the mixer and
//! compositor into a stream recorder and tears everything down again on stop.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

use super::channel::{CaptureHost, CaptureRequest, RecordingError, RecordingResult};
use super::stream::{select_format, EncoderFactory, RecorderOptions, StreamRecorder};
use super::transport::ChunkSender;
use crate::capture::{
    AudioSource, AudioTrack, DeviceCaptureAdapter, OwnedAudioTrack, OwnedVideoTrack, SystemAudio,
};
use crate::processing::{compose, AudioMixer, DrawLoop, MixedAudio};

/// Devices opened for one session. Released when the session ends.
#[derive(Default)]
struct AcquiredDevices {
    video: Option<OwnedVideoTrack>,
    system_audio: Option<OwnedAudioTrack>,
    microphone: Option<OwnedAudioTrack>,
    webcam: Option<OwnedVideoTrack>,
}

impl AcquiredDevices {
    fn audio_tracks(&self) -> Vec<AudioTrack> {
        self.system_audio
            .iter()
            .chain(self.microphone.iter())
            .map(OwnedAudioTrack::handle)
            .collect()
    }

    fn release(self) {
        if let Some(webcam) = self.webcam {
            webcam.stop();
        }
        if let Some(microphone) = self.microphone {
            microphone.stop();
        }
        if let Some(system_audio) = self.system_audio {
            system_audio.stop();
        }
        if let Some(video) = self.video {
            video.stop();
        }
    }
}

/// Everything running for the active session
struct CapturePipeline {
    recorder: StreamRecorder,
    draw_loop: Option<DrawLoop>,
    mixed: Option<MixedAudio>,
    devices: AcquiredDevices,
}

impl CapturePipeline {
    async fn shutdown(mut self) {
        self.recorder.stop().await;
        if let Some(draw_loop) = self.draw_loop.take() {
            draw_loop.stop().await;
        }
        if let Some(mixed) = self.mixed.take() {
            mixed.close().await;
        }
        self.devices.release();
        tracing::info!("Capture pipeline shut down");
    }
}

pub struct LocalCaptureHost {
    adapter: DeviceCaptureAdapter,
    encoders: Arc<dyn EncoderFactory>,
    pipeline: Mutex<Option<CapturePipeline>>,
}

impl LocalCaptureHost {
    pub fn new(adapter: DeviceCaptureAdapter, encoders: Arc<dyn EncoderFactory>) -> Self {
        Self {
            adapter,
            encoders,
            pipeline: Mutex::new(None),
        }
    }

    pub fn adapter(&self) -> &DeviceCaptureAdapter {
        &self.adapter
    }

    pub fn is_running(&self) -> bool {
        self.pipeline.lock().is_some()
    }

    async fn acquire(&self, request: &CaptureRequest) -> RecordingResult<AcquiredDevices> {
        let settings = &request.settings;
        let fps = settings.effective_fps();
        let mut devices = AcquiredDevices::default();

        let system_audio = settings.include_system_audio.then(|| SystemAudio {
            device: settings.audio_source.clone(),
        });
        let acquired = self
            .adapter
            .acquire_video(&request.source_id, fps, system_audio.as_ref())
            .await?;
        if acquired.degraded {
            tracing::warn!("Recording {} without system audio", request.source_id);
        }
        devices.video = Some(acquired.video);
        devices.system_audio = acquired.system_audio;

        if settings.include_microphone {
            let source = AudioSource::Microphone(settings.microphone_source.clone());
            match self.adapter.acquire_audio(&source).await {
                Ok(track) => devices.microphone = Some(track),
                Err(e) => {
                    devices.release();
                    return Err(e.into());
                }
            }
        }

        if settings.include_webcam {
            match self
                .adapter
                .acquire_webcam(settings.webcam_device_id.as_deref(), fps)
                .await
            {
                Ok(track) => devices.webcam = Some(track),
                Err(e) => tracing::warn!("Webcam unavailable, recording screen only: {}", e),
            }
        }

        Ok(devices)
    }
}

#[async_trait]
impl CaptureHost for LocalCaptureHost {
    async fn start(&self, request: CaptureRequest, sink: ChunkSender) -> RecordingResult<()> {
        if self.is_running() {
            return Err(RecordingError::AlreadyRecording);
        }

        let devices = self.acquire(&request).await?;
        let Some(video) = devices.video.as_ref().map(OwnedVideoTrack::handle) else {
            return Err(RecordingError::CaptureFailed("no video track".to_string()));
        };
        let settings = &request.settings;
        let fps = settings.effective_fps();

        let mixed = AudioMixer::mix(&devices.audio_tracks());
        let webcam = devices.webcam.as_ref().map(OwnedVideoTrack::handle);
        let composite = compose(&video, webcam.as_ref(), settings.webcam_overlay(), fps);

        let format = select_format(self.encoders.format_support());
        let options = RecorderOptions::with_fps(fps);
        tracing::info!("Recording {} as {}", request.source_id, format.mime_type());

        let mut recorder = StreamRecorder::new(sink);
        let started = self
            .encoders
            .create(format, &options, mixed.is_some())
            .and_then(|encoder| {
                recorder.start(
                    encoder,
                    composite.track.clone(),
                    mixed.as_ref().map(|m| m.track.clone()),
                    options,
                )
            });

        let pipeline = CapturePipeline {
            recorder,
            draw_loop: composite.draw_loop,
            mixed,
            devices,
        };

        if let Err(e) = started {
            pipeline.shutdown().await;
            return Err(e);
        }

        let rejected = {
            let mut slot = self.pipeline.lock();
            if slot.is_some() {
                Some(pipeline)
            } else {
                *slot = Some(pipeline);
                None
            }
        };
        if let Some(pipeline) = rejected {
            pipeline.shutdown().await;
            return Err(RecordingError::AlreadyRecording);
        }
        Ok(())
    }

    async fn pause(&self) -> RecordingResult<()> {
        match self.pipeline.lock().as_ref() {
            Some(pipeline) => {
                pipeline.recorder.pause();
                Ok(())
            }
            None => Err(RecordingError::NoActiveRecording),
        }
    }

    async fn resume(&self) -> RecordingResult<()> {
        match self.pipeline.lock().as_ref() {
            Some(pipeline) => {
                pipeline.recorder.resume();
                Ok(())
            }
            None => Err(RecordingError::NoActiveRecording),
        }
    }

    async fn stop(&self) -> RecordingResult<()> {
        let pipeline = self.pipeline.lock().take();
        match pipeline {
            Some(pipeline) => {
                pipeline.shutdown().await;
                Ok(())
            }
            None => Err(RecordingError::NoActiveRecording),
        }
    }
}
