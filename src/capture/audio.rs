//! Microphone capture using cpal
//!
//! The cpal stream is not `Send`, so it lives on its own thread for the
//! lifetime of the track. Releasing the track signals that thread to drop it.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat};
use tokio::sync::oneshot;

use super::track::{audio_track, AudioFeed, OwnedAudioTrack};
use super::traits::{AudioDeviceInfo, CaptureError, CaptureResult};

/// Get list of available audio input devices
pub fn input_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let Ok(devices) = host.input_devices() else {
        return Vec::new();
    };

    devices
        .filter_map(|device| device.name().ok())
        .map(|name| AudioDeviceInfo {
            is_default: default_name.as_ref() == Some(&name),
            id: name.clone(),
            name,
            is_input: true,
        })
        .collect()
}

/// Input device by name, or the default input
fn find_device(name: Option<&str>) -> CaptureResult<Device> {
    let host = cpal::default_host();
    match name {
        Some(name) => host
            .input_devices()
            .map_err(|e| CaptureError::Backend(e.to_string()))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| CaptureError::DeviceUnavailable(format!("Audio device '{}' not found", name))),
        None => host
            .default_input_device()
            .ok_or_else(|| CaptureError::DeviceUnavailable("No default audio input device".to_string())),
    }
}

/// Open a microphone as an audio track in the device's native format
pub async fn open_microphone(device_id: Option<String>) -> CaptureResult<OwnedAudioTrack> {
    let (ready_tx, ready_rx) = oneshot::channel();

    std::thread::Builder::new()
        .name("capture-microphone".to_string())
        .spawn(move || run_microphone(device_id, ready_tx))?;

    ready_rx
        .await
        .map_err(|_| CaptureError::Backend("microphone thread exited".to_string()))?
}

fn run_microphone(device_id: Option<String>, ready: oneshot::Sender<CaptureResult<OwnedAudioTrack>>) {
    let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

    let opened = open_stream(device_id.as_deref()).and_then(|(stream, track)| {
        stream
            .play()
            .map_err(|e| CaptureError::DeviceUnavailable(format!("Failed to start audio stream: {}", e)))?;
        Ok((stream, track))
    });

    let stream = match opened {
        Ok((stream, track)) => {
            track.on_release(move || {
                let _ = stop_tx.send(());
            });
            if ready.send(Ok(track)).is_err() {
                return;
            }
            stream
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    // Returns once the track is released or dropped
    let _ = stop_rx.recv();
    drop(stream);
    tracing::info!("Microphone capture stopped");
}

fn open_stream(device_id: Option<&str>) -> CaptureResult<(cpal::Stream, OwnedAudioTrack)> {
    let device = find_device(device_id)?;
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    let config = device
        .default_input_config()
        .map_err(|e| CaptureError::DeviceUnavailable(format!("Failed to get audio config: {}", e)))?;

    let sample_format = config.sample_format();
    let stream_config = config.config();

    tracing::info!(
        "Microphone capture: {} ({}Hz, {}ch, {:?})",
        device_name,
        stream_config.sample_rate.0,
        stream_config.channels,
        sample_format
    );

    let (track, feed) = audio_track(
        format!("microphone:{}", device_name),
        stream_config.sample_rate.0,
        stream_config.channels,
    );

    let err_fn = |e| tracing::error!("Audio stream error: {}", e);

    let stream = match sample_format {
        SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &_| push(&feed, data.to_vec()),
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &_| {
                push(&feed, data.iter().map(|&s| s as f32 / i16::MAX as f32).collect())
            },
            err_fn,
            None,
        ),
        SampleFormat::U16 => device.build_input_stream(
            &stream_config,
            move |data: &[u16], _: &_| {
                push(&feed, data.iter().map(|&s| (s as f32 - 32768.0) / 32768.0).collect())
            },
            err_fn,
            None,
        ),
        other => {
            return Err(CaptureError::CaptureUnsupported(format!(
                "Unsupported sample format: {:?}",
                other
            )))
        }
    }
    .map_err(|e| CaptureError::DeviceUnavailable(format!("Failed to build audio stream: {}", e)))?;

    Ok((stream, track))
}

fn push(feed: &AudioFeed, samples: Vec<f32>) {
    if !feed.push(samples) {
        tracing::trace!("Microphone buffer dropped after track ended");
    }
}
