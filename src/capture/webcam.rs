//! Webcam capture using nokhwa
//!
//! `nokhwa::Camera` is `!Send`, so each opened camera runs on its own thread
//! and publishes RGBA frames into a video track until the track is released.

use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

use super::track::{video_track, OwnedVideoTrack, VideoFeed, VideoFrame};
use super::traits::{CameraInfo, CaptureError, CaptureResult, Resolution};
use crate::utils::CancelToken;

/// Enumerate available webcam devices
pub fn cameras() -> CaptureResult<Vec<CameraInfo>> {
    let backend = nokhwa::native_api_backend()
        .ok_or_else(|| CaptureError::Backend("No camera backend available".to_string()))?;

    let cameras = nokhwa::query(backend)
        .map_err(|e| CaptureError::Backend(format!("Failed to query cameras: {}", e)))?;

    Ok(cameras
        .into_iter()
        .map(|info| CameraInfo {
            id: match info.index() {
                CameraIndex::Index(i) => i.to_string(),
                CameraIndex::String(s) => s.clone(),
            },
            name: info.human_name(),
            supported_resolutions: vec![Resolution::new(1280, 720), Resolution::new(640, 480)],
        })
        .collect())
}

/// Open a webcam by index (`None` for the first camera)
pub async fn open_webcam(device_id: Option<String>, fps: u32) -> CaptureResult<OwnedVideoTrack> {
    let index = match device_id.as_deref() {
        Some(id) => match id.parse::<u32>() {
            Ok(i) => CameraIndex::Index(i),
            Err(_) => CameraIndex::String(id.to_string()),
        },
        None => CameraIndex::Index(0),
    };

    let (ready_tx, ready_rx) = oneshot::channel();
    std::thread::Builder::new()
        .name("capture-webcam".to_string())
        .spawn(move || run_webcam(index, fps.max(1), ready_tx))?;

    ready_rx
        .await
        .map_err(|_| CaptureError::Backend("webcam thread exited".to_string()))?
}

fn run_webcam(index: CameraIndex, fps: u32, ready: oneshot::Sender<CaptureResult<OwnedVideoTrack>>) {
    let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);

    let mut camera = match Camera::new(index.clone(), requested) {
        Ok(c) => c,
        Err(e) => {
            let _ = ready.send(Err(CaptureError::DeviceUnavailable(format!(
                "Failed to open webcam {:?}: {}",
                index, e
            ))));
            return;
        }
    };

    if let Err(e) = camera.open_stream() {
        let _ = ready.send(Err(CaptureError::DeviceUnavailable(format!(
            "Failed to open webcam stream: {}",
            e
        ))));
        return;
    }

    let format = camera.camera_format();
    tracing::info!(
        "Webcam capture started: {}x{} @ {}fps",
        format.resolution().width_x,
        format.resolution().height_y,
        fps
    );

    let cancel = CancelToken::new();
    let (track, feed) = video_track("webcam");
    let stop = cancel.clone();
    track.on_release(move || stop.cancel());
    if ready.send(Ok(track)).is_err() {
        return;
    }

    capture_loop(&mut camera, &feed, &cancel, fps);

    if let Err(e) = camera.stop_stream() {
        tracing::warn!("Error stopping webcam stream: {}", e);
    }
    feed.end();
    tracing::info!("Webcam capture stopped");
}

fn capture_loop(camera: &mut Camera, feed: &VideoFeed, cancel: &CancelToken, fps: u32) {
    let frame_interval = Duration::from_millis(1000 / u64::from(fps));
    let started = Instant::now();

    while !cancel.is_cancelled() {
        let frame_start = Instant::now();

        match camera.frame() {
            Ok(frame) => match frame.decode_image::<RgbFormat>() {
                Ok(decoded) => {
                    let (width, height) = (decoded.width(), decoded.height());
                    let frame = VideoFrame::new(
                        width,
                        height,
                        rgb_to_rgba(&decoded.into_raw()),
                        started.elapsed().as_millis() as u64,
                    );
                    if !feed.push(frame) {
                        break;
                    }
                }
                Err(e) => tracing::warn!("Failed to decode webcam frame: {}", e),
            },
            Err(e) => {
                tracing::warn!("Failed to capture webcam frame: {}", e);
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
        }

        if let Some(remaining) = frame_interval.checked_sub(frame_start.elapsed()) {
            std::thread::sleep(remaining);
        }
    }
}

fn rgb_to_rgba(rgb: &[u8]) -> Vec<u8> {
    let mut rgba = Vec::with_capacity(rgb.len() / 3 * 4);
    for px in rgb.chunks_exact(3) {
        rgba.extend_from_slice(&[px[0], px[1], px[2], 255]);
    }
    rgba
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgb_to_rgba() {
        assert_eq!(rgb_to_rgba(&[1, 2, 3, 4, 5, 6]), vec![1, 2, 3, 255, 4, 5, 6, 255]);
    }
}
