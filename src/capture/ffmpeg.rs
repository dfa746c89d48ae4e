//! FFmpeg capture backend
//!
//! Captures screens, windows, system audio, microphones and webcams by running
//! ffmpeg against the platform input device and reading raw RGBA frames or
//! f32 PCM from its stdout on a dedicated reader thread.

use async_trait::async_trait;
use base64::Engine;
use std::io::{BufReader, Read};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};

use super::platform::{self, DeviceList, Monitor, Platform, SourceId};
use super::track::{audio_track, video_track, AudioFeed, OwnedAudioTrack, OwnedVideoTrack, VideoFeed, VideoFrame};
use super::traits::{
    AudioDeviceInfo, AudioSource, CameraInfo, CaptureBackend, CaptureError, CaptureResult,
    DesktopCapture, Resolution, ScreenSource, SystemAudio, VideoConstraints,
};
use crate::utils::FfmpegTools;

/// PCM format requested from every audio input
pub const CAPTURE_SAMPLE_RATE: u32 = 48_000;
pub const CAPTURE_CHANNELS: u16 = 2;
/// Frames per audio read, 20 ms at 48 kHz
const AUDIO_BLOCK_FRAMES: usize = 960;

const THUMBNAIL_SIZE: Resolution = Resolution::new(320, 180);
const THUMBNAIL_TIMEOUT: Duration = Duration::from_secs(5);
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct FfmpegCaptureBackend {
    tools: FfmpegTools,
    platform: Platform,
}

impl FfmpegCaptureBackend {
    pub fn new(tools: FfmpegTools) -> Self {
        Self {
            tools,
            platform: Platform::current(),
        }
    }

    pub fn tools(&self) -> &FfmpegTools {
        &self.tools
    }

    /// Device listing printed by ffmpeg on Windows and macOS
    async fn list_devices(&self) -> DeviceList {
        let (format, dummy) = match self.platform {
            Platform::Windows => ("dshow", "dummy"),
            Platform::MacOs => ("avfoundation", ""),
            Platform::Linux => return DeviceList::default(),
        };

        let output = self
            .tools
            .ffmpeg_command()
            .args(["-hide_banner", "-list_devices", "true", "-f", format, "-i", dummy])
            .stdin(Stdio::null())
            .output()
            .await;

        match output {
            // ffmpeg exits with an error after listing; the listing is on stderr
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                match self.platform {
                    Platform::Windows => platform::parse_dshow_devices(&stderr),
                    _ => platform::parse_avfoundation_devices(&stderr),
                }
            }
            Err(e) => {
                tracing::warn!("Failed to list {} devices: {}", format, e);
                DeviceList::default()
            }
        }
    }

    async fn monitors(&self) -> Vec<Monitor> {
        if self.platform != Platform::Linux {
            return Vec::new();
        }

        match tokio::process::Command::new("xrandr")
            .arg("--listmonitors")
            .output()
            .await
        {
            Ok(output) if output.status.success() => {
                platform::parse_xrandr_monitors(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(_) | Err(_) => {
                tracing::debug!("xrandr unavailable, falling back to the whole X display");
                Vec::new()
            }
        }
    }

    /// Open the input briefly with ffprobe to confirm it exists and read its size
    async fn probe_input(&self, input: &[String]) -> CaptureResult<Option<Resolution>> {
        let output = tokio::time::timeout(
            PROBE_TIMEOUT,
            self.tools
                .ffprobe_command()
                .args(["-v", "error", "-show_entries", "stream=codec_type,width,height", "-of", "csv=p=0"])
                .args(input)
                .stdin(Stdio::null())
                .output(),
        )
        .await
        .map_err(|_| CaptureError::DeviceUnavailable(format!("timed out probing {}", input.join(" "))))?
        .map_err(|e| CaptureError::Backend(format!("Failed to run ffprobe: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CaptureError::DeviceUnavailable(stderr.trim().to_string()));
        }

        Ok(parse_probe_size(&String::from_utf8_lossy(&output.stdout)))
    }

    fn spawn(&self, input: &[String], output: &[String]) -> CaptureResult<(Child, ChildStdout)> {
        let mut child = Command::new(&self.tools.ffmpeg)
            .args(["-hide_banner", "-loglevel", "error", "-nostdin"])
            .args(input)
            .args(output)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| CaptureError::Backend(format!("Failed to start ffmpeg capture: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CaptureError::Backend("Failed to capture ffmpeg stdout".to_string()))?;

        Ok((child, stdout))
    }

    fn spawn_video(
        &self,
        label: &str,
        input: &[String],
        size: Resolution,
    ) -> CaptureResult<OwnedVideoTrack> {
        let scale = format!("scale={}:{}", size.width, size.height);
        let output = ["-vf", scale.as_str(), "-pix_fmt", "rgba", "-f", "rawvideo", "-"]
            .map(String::from);
        let (child, stdout) = self.spawn(input, &output)?;

        tracing::info!("Capturing {} at {}x{}", label, size.width, size.height);

        let (track, feed) = video_track(label);
        track.on_release(kill_on_release(child));
        std::thread::Builder::new()
            .name(format!("capture-{}", label))
            .spawn(move || read_video(stdout, feed, size))?;

        Ok(track)
    }

    fn spawn_audio(&self, label: &str, input: &[String]) -> CaptureResult<OwnedAudioTrack> {
        let rate = CAPTURE_SAMPLE_RATE.to_string();
        let channels = CAPTURE_CHANNELS.to_string();
        let output = ["-ac", channels.as_str(), "-ar", rate.as_str(), "-f", "f32le", "-"]
            .map(String::from);
        let (child, stdout) = self.spawn(input, &output)?;

        tracing::info!("Capturing audio from {}", label);

        let (track, feed) = audio_track(label, CAPTURE_SAMPLE_RATE, CAPTURE_CHANNELS);
        track.on_release(kill_on_release(child));
        std::thread::Builder::new()
            .name(format!("capture-{}", label))
            .spawn(move || read_audio(stdout, feed))?;

        Ok(track)
    }

    /// Grab one frame as a PNG data URL
    async fn thumbnail(&self, input: &[String]) -> Option<String> {
        let filter = format!(
            "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2",
            w = THUMBNAIL_SIZE.width,
            h = THUMBNAIL_SIZE.height
        );

        let output = tokio::time::timeout(
            THUMBNAIL_TIMEOUT,
            self.tools
                .ffmpeg_command()
                .args(["-hide_banner", "-loglevel", "error"])
                .args(input)
                .args(["-frames:v", "1", "-vf", filter.as_str(), "-pix_fmt", "rgba", "-f", "rawvideo", "-"])
                .stdin(Stdio::null())
                .output(),
        )
        .await
        .ok()?
        .ok()?;

        let expected = (THUMBNAIL_SIZE.width * THUMBNAIL_SIZE.height * 4) as usize;
        if !output.status.success() || output.stdout.len() < expected {
            return None;
        }

        match encode_png_data_url(
            THUMBNAIL_SIZE.width,
            THUMBNAIL_SIZE.height,
            &output.stdout[..expected],
        ) {
            Ok(url) => Some(url),
            Err(e) => {
                tracing::warn!("Failed to encode thumbnail: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl CaptureBackend for FfmpegCaptureBackend {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    async fn screen_sources(&self) -> CaptureResult<Vec<ScreenSource>> {
        let mut screens: Vec<(u32, String)> = match self.platform {
            Platform::Linux => self
                .monitors()
                .await
                .into_iter()
                .map(|m| (m.index, format!("Screen {} ({})", m.index + 1, m.name)))
                .collect(),
            Platform::Windows => Vec::new(),
            Platform::MacOs => {
                let devices = self.list_devices().await;
                platform::avfoundation_screens(&devices)
                    .into_iter()
                    .map(|(n, _)| (n, format!("Screen {}", n + 1)))
                    .collect()
            }
        };
        if screens.is_empty() {
            screens.push((0, "Entire Screen".to_string()));
        }

        let devices = self.list_devices().await;
        let monitors = self.monitors().await;
        let mut sources = Vec::with_capacity(screens.len());

        for (index, name) in screens {
            let id = format!("screen:{}", index);
            let thumbnail = match platform::screen_input(
                self.platform,
                &SourceId::Screen(index),
                1,
                &monitors,
                &devices,
            ) {
                Ok(input) => self.thumbnail(&input).await.unwrap_or_default(),
                Err(_) => String::new(),
            };

            sources.push(ScreenSource {
                id,
                name,
                thumbnail,
                display_id: Some(index.to_string()),
                app_icon: None,
            });
        }

        Ok(sources)
    }

    async fn audio_devices(&self) -> CaptureResult<Vec<AudioDeviceInfo>> {
        if self.platform == Platform::Linux {
            return match tokio::process::Command::new("pactl")
                .args(["list", "short", "sources"])
                .output()
                .await
            {
                Ok(output) => Ok(platform::parse_pactl_sources(&String::from_utf8_lossy(
                    &output.stdout,
                ))),
                Err(e) => {
                    tracing::debug!("pactl unavailable ({}), offering the default input only", e);
                    Ok(vec![AudioDeviceInfo {
                        id: "default".to_string(),
                        name: "Default".to_string(),
                        is_input: true,
                        is_default: true,
                    }])
                }
            };
        }

        Ok(platform::microphones_from(&self.list_devices().await))
    }

    async fn cameras(&self) -> CaptureResult<Vec<CameraInfo>> {
        if self.platform == Platform::Linux {
            return Ok(v4l2_cameras());
        }

        Ok(platform::cameras_from(self.platform, &self.list_devices().await))
    }

    async fn open_desktop(
        &self,
        source_id: &str,
        constraints: &VideoConstraints,
        system_audio: Option<&SystemAudio>,
    ) -> CaptureResult<DesktopCapture> {
        let source = SourceId::parse(source_id)?;
        let loopback = system_audio.map(|audio| audio.device.as_deref());
        if loopback == Some(None) && !self.platform.supports_system_audio() {
            return Err(CaptureError::CaptureUnsupported(
                "system audio cannot be captured with the screen on this platform".into(),
            ));
        }

        let devices = self.list_devices().await;
        let monitors = self.monitors().await;
        let input = platform::screen_input(self.platform, &source, constraints.fps, &monitors, &devices)?;
        let audio_input = match loopback {
            Some(device) => Some(platform::system_audio_input(self.platform, device, &devices)?),
            None => None,
        };

        let native = self
            .probe_input(&input)
            .await?
            .ok_or_else(|| CaptureError::DeviceUnavailable(format!("{} has no video", source_id)))?;
        let size = constraints.fit(native);

        let video = self.spawn_video(source_id, &input, size)?;
        let system_audio = match audio_input {
            Some(input) => Some(self.spawn_audio("system-audio", &input)?),
            None => None,
        };

        Ok(DesktopCapture {
            video,
            system_audio,
        })
    }

    async fn open_audio(&self, source: &AudioSource) -> CaptureResult<OwnedAudioTrack> {
        let devices = self.list_devices().await;
        let (label, input) = match source {
            AudioSource::System(audio) => (
                "system-audio",
                platform::system_audio_input(self.platform, audio.device.as_deref(), &devices)?,
            ),
            AudioSource::Microphone(device) => (
                "microphone",
                platform::microphone_input(self.platform, device.as_deref(), &devices)?,
            ),
        };

        self.probe_input(&input).await?;
        self.spawn_audio(label, &input)
    }

    async fn open_webcam(
        &self,
        device_id: Option<&str>,
        fps: u32,
    ) -> CaptureResult<OwnedVideoTrack> {
        let devices = self.list_devices().await;
        let input = platform::webcam_input(self.platform, device_id, fps, &devices)?;
        let size = self
            .probe_input(&input)
            .await?
            .ok_or_else(|| CaptureError::DeviceUnavailable("webcam has no video".into()))?;

        self.spawn_video("webcam", &input, size)
    }
}

fn kill_on_release(mut child: Child) -> impl FnOnce() + Send + 'static {
    move || {
        let _ = child.kill();
        let _ = child.wait();
    }
}

fn read_video(stdout: ChildStdout, feed: VideoFeed, size: Resolution) {
    let frame_size = size.width as usize * size.height as usize * 4;
    let mut reader = BufReader::with_capacity(frame_size * 2, stdout);
    let started = Instant::now();

    loop {
        let mut buffer = vec![0u8; frame_size];
        match reader.read_exact(&mut buffer) {
            Ok(()) => {
                let frame = VideoFrame::new(
                    size.width,
                    size.height,
                    buffer,
                    started.elapsed().as_millis() as u64,
                );
                if !feed.push(frame) {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => {
                tracing::warn!("Video capture read failed: {}", e);
                break;
            }
        }
    }

    feed.end();
}

fn read_audio(stdout: ChildStdout, feed: AudioFeed) {
    let block_bytes = AUDIO_BLOCK_FRAMES * feed.channels() as usize * 4;
    let mut reader = BufReader::new(stdout);
    let mut buffer = vec![0u8; block_bytes];

    loop {
        match reader.read_exact(&mut buffer) {
            Ok(()) => {
                if !feed.push(f32le_samples(&buffer)) {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => {
                tracing::warn!("Audio capture read failed: {}", e);
                break;
            }
        }
    }

    feed.end();
}

fn f32le_samples(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// First `width,height` pair from `csv=p=0` ffprobe output
fn parse_probe_size(output: &str) -> Option<Resolution> {
    output.lines().find_map(|line| {
        let mut parts = line.trim().split(',');
        if parts.next()? != "video" {
            return None;
        }
        let width = parts.next()?.parse().ok()?;
        let height = parts.next()?.parse().ok()?;
        Some(Resolution::new(width, height))
    })
}

/// `/dev/video*` nodes with the name the kernel reports for them
fn v4l2_cameras() -> Vec<CameraInfo> {
    let Ok(entries) = std::fs::read_dir("/dev") else {
        return Vec::new();
    };

    let mut nodes: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|name| name.starts_with("video"))
        .collect();
    nodes.sort();

    nodes
        .into_iter()
        .map(|node| {
            let name = std::fs::read_to_string(format!("/sys/class/video4linux/{}/name", node))
                .map(|n| n.trim().to_string())
                .unwrap_or_else(|_| node.clone());
            CameraInfo {
                id: format!("/dev/{}", node),
                name,
                supported_resolutions: vec![Resolution::new(1280, 720), Resolution::new(640, 480)],
            }
        })
        .collect()
}

/// Encode RGBA pixels as a `data:image/png;base64,` URL
pub fn encode_png_data_url(width: u32, height: u32, rgba: &[u8]) -> Result<String, png::EncodingError> {
    let mut bytes = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut bytes, width, height);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(rgba)?;
    }

    Ok(format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(&bytes)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_probe_size() {
        assert_eq!(
            parse_probe_size("audio,,\nvideo,1920,1080\n"),
            Some(Resolution::new(1920, 1080))
        );
        assert_eq!(parse_probe_size("audio,,\n"), None);
    }

    #[test]
    fn test_f32le_samples() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0.5f32.to_le_bytes());
        bytes.extend_from_slice(&(-1.0f32).to_le_bytes());
        assert_eq!(f32le_samples(&bytes), vec![0.5, -1.0]);
    }

    #[test]
    fn test_png_data_url() {
        let url = encode_png_data_url(2, 2, &[255u8; 16]).unwrap();
        assert!(url.starts_with("data:image/png;base64,iVBORw0KGgo"));
    }
}
