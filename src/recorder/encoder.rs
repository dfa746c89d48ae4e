//! FFmpeg chunk encoder
//!
//! Raw RGBA frames go to ffmpeg's stdin. Audio is converted to the mix format
//! and streamed over a loopback TCP socket that ffmpeg connects to as its
//! second input. The WebM produced on stdout is buffered until the stream
//! recorder collects it.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::channel::{RecordingError, RecordingResult};
use super::stream::{
    AudioCodec, ChunkEncoder, EncodedFormat, EncoderFactory, FormatSupport, RecorderOptions,
    VideoCodec,
};
use crate::capture::{AudioBuffer, VideoFrame};
use crate::processing::mixer::{MixFormatConverter, MIX_CHANNELS, MIX_SAMPLE_RATE};
use crate::utils::FfmpegTools;

/// Frames queued for ffmpeg before new ones are dropped
const VIDEO_QUEUE: usize = 8;
/// Audio blocks queued for ffmpeg before new ones are dropped
const AUDIO_QUEUE: usize = 64;

fn video_encoder_name(codec: VideoCodec) -> &'static str {
    match codec {
        VideoCodec::Vp9 => "libvpx-vp9",
        VideoCodec::Vp8 => "libvpx",
    }
}

fn audio_encoder_name(codec: AudioCodec) -> &'static str {
    match codec {
        AudioCodec::Opus => "libopus",
    }
}

/// Encoders compiled into the local ffmpeg
#[derive(Debug, Clone, Default)]
pub struct FfmpegFormatSupport {
    encoders: HashSet<String>,
}

impl FfmpegFormatSupport {
    pub async fn detect(tools: &FfmpegTools) -> Self {
        let output = tools
            .ffmpeg_command()
            .args(["-hide_banner", "-encoders"])
            .stdin(Stdio::null())
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {
                let support = Self::from_listing(&String::from_utf8_lossy(&output.stdout));
                tracing::info!("ffmpeg provides {} encoders", support.encoders.len());
                support
            }
            Ok(output) => {
                tracing::warn!("ffmpeg -encoders exited with {}", output.status);
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to query ffmpeg encoders: {}", e);
                Self::default()
            }
        }
    }

    /// Parse `ffmpeg -encoders` output. Entries look like ` V....D libvpx-vp9  ...`.
    pub fn from_listing(listing: &str) -> Self {
        let encoders = listing
            .lines()
            .skip_while(|line| !line.trim_start().starts_with("------"))
            .skip(1)
            .filter_map(|line| {
                let mut parts = line.split_whitespace();
                let flags = parts.next()?;
                let name = parts.next()?;
                (flags.len() == 6).then(|| name.to_string())
            })
            .collect();
        Self { encoders }
    }

    pub fn has_encoder(&self, name: &str) -> bool {
        self.encoders.contains(name)
    }
}

impl FormatSupport for FfmpegFormatSupport {
    fn is_supported(&self, format: &EncodedFormat) -> bool {
        let video = format
            .video
            .map_or(true, |codec| self.has_encoder(video_encoder_name(codec)));
        let audio = format
            .audio
            .map_or(true, |codec| self.has_encoder(audio_encoder_name(codec)));
        video && audio
    }
}

/// ffmpeg arguments for one live encode
pub fn encoder_args(
    format: EncodedFormat,
    options: &RecorderOptions,
    width: u32,
    height: u32,
    audio_port: Option<u16>,
) -> Vec<String> {
    let mut args = vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pix_fmt".to_string(),
        "rgba".to_string(),
        "-s".to_string(),
        format!("{}x{}", width, height),
        "-r".to_string(),
        options.fps.to_string(),
        "-i".to_string(),
        "pipe:0".to_string(),
    ];

    if let Some(port) = audio_port {
        args.extend([
            "-f".to_string(),
            "f32le".to_string(),
            "-ar".to_string(),
            MIX_SAMPLE_RATE.to_string(),
            "-ac".to_string(),
            MIX_CHANNELS.to_string(),
            "-i".to_string(),
            format!("tcp://127.0.0.1:{}", port),
        ]);
    }

    if let Some(codec) = format.video {
        args.extend(["-c:v".to_string(), video_encoder_name(codec).to_string()]);
    }
    args.extend([
        "-b:v".to_string(),
        options.video_bits_per_second.to_string(),
        "-deadline".to_string(),
        "realtime".to_string(),
        "-cpu-used".to_string(),
        "8".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
    ]);

    if audio_port.is_some() {
        if let Some(codec) = format.audio {
            args.extend(["-c:a".to_string(), audio_encoder_name(codec).to_string()]);
        }
        args.extend(["-b:a".to_string(), options.audio_bits_per_second.to_string()]);
    } else {
        args.push("-an".to_string());
    }

    args.extend([
        "-f".to_string(),
        "webm".to_string(),
        "pipe:1".to_string(),
    ]);
    args
}

struct RunningEncoder {
    child: Child,
    width: u32,
    height: u32,
    video_tx: Option<mpsc::Sender<Bytes>>,
    audio_tx: Option<mpsc::Sender<Vec<u8>>>,
    writers: Vec<JoinHandle<()>>,
    reader: JoinHandle<()>,
    stderr: JoinHandle<String>,
}

pub struct FfmpegChunkEncoder {
    tools: FfmpegTools,
    format: EncodedFormat,
    options: RecorderOptions,
    audio_listener: Option<std::net::TcpListener>,
    running: Option<RunningEncoder>,
    output: Arc<Mutex<Vec<u8>>>,
    audio_format: MixFormatConverter,
    dropped_frames: u64,
}

impl FfmpegChunkEncoder {
    pub fn new(
        tools: FfmpegTools,
        format: EncodedFormat,
        options: RecorderOptions,
        has_audio: bool,
    ) -> RecordingResult<Self> {
        let audio_listener = if has_audio {
            let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
            listener.set_nonblocking(true)?;
            Some(listener)
        } else {
            None
        };

        Ok(Self {
            tools,
            format,
            options,
            audio_listener,
            running: None,
            output: Arc::new(Mutex::new(Vec::new())),
            audio_format: MixFormatConverter::new(),
            dropped_frames: 0,
        })
    }

    /// Start ffmpeg once the frame size is known
    fn spawn(&mut self, width: u32, height: u32) -> RecordingResult<()> {
        let audio_port = match &self.audio_listener {
            Some(listener) => Some(listener.local_addr()?.port()),
            None => None,
        };
        let args = encoder_args(self.format, &self.options, width, height, audio_port);
        tracing::info!("Starting live encoder ({}): {:?}", self.format.mime_type(), args);

        let mut child = self
            .tools
            .ffmpeg_command()
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| RecordingError::EncodingError(format!("Failed to start ffmpeg: {}", e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| RecordingError::EncodingError("Failed to capture ffmpeg stdin".to_string()))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| RecordingError::EncodingError("Failed to capture ffmpeg stdout".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| RecordingError::EncodingError("Failed to capture ffmpeg stderr".to_string()))?;

        let mut writers = Vec::new();

        let (video_tx, mut video_rx) = mpsc::channel::<Bytes>(VIDEO_QUEUE);
        writers.push(tokio::spawn(async move {
            while let Some(frame) = video_rx.recv().await {
                if let Err(e) = stdin.write_all(&frame).await {
                    tracing::warn!("Encoder video input closed: {}", e);
                    break;
                }
            }
            let _ = stdin.shutdown().await;
        }));

        let audio_tx = match self.audio_listener.take() {
            Some(listener) => {
                let listener = tokio::net::TcpListener::from_std(listener)?;
                let (tx, mut rx) = mpsc::channel::<Vec<u8>>(AUDIO_QUEUE);
                writers.push(tokio::spawn(async move {
                    let mut socket = match listener.accept().await {
                        Ok((socket, _)) => socket,
                        Err(e) => {
                            tracing::warn!("ffmpeg never connected for audio: {}", e);
                            return;
                        }
                    };
                    while let Some(block) = rx.recv().await {
                        if let Err(e) = socket.write_all(&block).await {
                            tracing::warn!("Encoder audio input closed: {}", e);
                            break;
                        }
                    }
                    let _ = socket.shutdown().await;
                }));
                Some(tx)
            }
            None => None,
        };

        let output = self.output.clone();
        let reader = tokio::spawn(async move {
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                match stdout.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => output.lock().extend_from_slice(&buf[..n]),
                    Err(e) => {
                        tracing::warn!("Failed to read encoder output: {}", e);
                        break;
                    }
                }
            }
        });

        let stderr = tokio::spawn(async move {
            let mut text = String::new();
            let _ = stderr.read_to_string(&mut text).await;
            text
        });

        self.running = Some(RunningEncoder {
            child,
            width,
            height,
            video_tx: Some(video_tx),
            audio_tx,
            writers,
            reader,
            stderr,
        });
        Ok(())
    }
}

#[async_trait]
impl ChunkEncoder for FfmpegChunkEncoder {
    async fn write_video(&mut self, frame: &VideoFrame) -> RecordingResult<()> {
        if self.running.is_none() {
            self.spawn(frame.width, frame.height)?;
        }
        let Some(running) = self.running.as_ref() else {
            return Ok(());
        };

        if (frame.width, frame.height) != (running.width, running.height) {
            tracing::debug!(
                "Skipping {}x{} frame for {}x{} encoder",
                frame.width,
                frame.height,
                running.width,
                running.height
            );
            return Ok(());
        }

        let Some(tx) = running.video_tx.as_ref() else {
            return Ok(());
        };
        match tx.try_send(Bytes::copy_from_slice(&frame.data)) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped_frames += 1;
                if self.dropped_frames % 30 == 1 {
                    tracing::warn!("Encoder falling behind, {} frames dropped", self.dropped_frames);
                }
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(RecordingError::EncodingError(
                "ffmpeg stopped accepting video".to_string(),
            )),
        }
    }

    async fn write_audio(&mut self, buffer: &AudioBuffer) -> RecordingResult<()> {
        // Audio before the first frame has nowhere to go yet
        let Some(tx) = self.running.as_ref().and_then(|r| r.audio_tx.as_ref()) else {
            return Ok(());
        };

        let bytes: Vec<u8> = self
            .audio_format
            .convert(buffer)
            .into_iter()
            .flat_map(f32::to_le_bytes)
            .collect();
        if tx.try_send(bytes).is_err() {
            tracing::trace!("Dropping audio block for encoder");
        }
        Ok(())
    }

    fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut *self.output.lock())
    }

    async fn finish(&mut self) -> RecordingResult<Vec<u8>> {
        let Some(mut running) = self.running.take() else {
            tracing::warn!("Encoder finished without receiving any frames");
            return Ok(self.take_output());
        };

        running.video_tx.take();
        running.audio_tx.take();
        for writer in running.writers.drain(..) {
            let _ = writer.await;
        }

        let status = running.child.wait().await?;
        let _ = running.reader.await;
        let stderr = running.stderr.await.unwrap_or_default();

        if !status.success() {
            return Err(RecordingError::EncodingError(format!(
                "ffmpeg exited with {}: {}",
                status,
                stderr.trim()
            )));
        }

        tracing::debug!("Live encoder finished, {} frames dropped", self.dropped_frames);
        Ok(self.take_output())
    }
}

/// Creates [`FfmpegChunkEncoder`]s using the encoders ffmpeg reports
pub struct FfmpegEncoderFactory {
    tools: FfmpegTools,
    support: FfmpegFormatSupport,
}

impl FfmpegEncoderFactory {
    pub async fn detect(tools: FfmpegTools) -> Self {
        let support = FfmpegFormatSupport::detect(&tools).await;
        Self { tools, support }
    }

    pub fn with_support(tools: FfmpegTools, support: FfmpegFormatSupport) -> Self {
        Self { tools, support }
    }
}

impl EncoderFactory for FfmpegEncoderFactory {
    fn format_support(&self) -> &dyn FormatSupport {
        &self.support
    }

    fn create(
        &self,
        format: EncodedFormat,
        options: &RecorderOptions,
        has_audio: bool,
    ) -> RecordingResult<Box<dyn ChunkEncoder>> {
        let encoder = FfmpegChunkEncoder::new(self.tools.clone(), format, *options, has_audio)?;
        Ok(Box::new(encoder))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::stream::select_format;

    const LISTING: &str = "Encoders:
 V..... = Video
 A..... = Audio
 ------
 V....D libx264              libx264 H.264 / AVC / MPEG-4 AVC (codec h264)
 V....D libvpx               libvpx VP8 (codec vp8)
 A....D aac                  AAC (Advanced Audio Coding)
";

    #[test]
    fn test_listing_parse_and_preference() {
        let support = FfmpegFormatSupport::from_listing(LISTING);
        assert!(support.has_encoder("libvpx"));
        assert!(support.has_encoder("aac"));
        assert!(!support.has_encoder("libvpx-vp9"));
        assert!(!support.has_encoder("="));

        let format = select_format(&support);
        assert_eq!(format.mime_type(), "video/webm;codecs=vp8");

        let mut with_opus = support.clone();
        with_opus.encoders.insert("libopus".to_string());
        assert_eq!(select_format(&with_opus).mime_type(), "video/webm;codecs=vp8,opus");
    }

    #[test]
    fn test_encoder_args_with_audio() {
        let format = EncodedFormat::PREFERENCES[0];
        let args = encoder_args(format, &RecorderOptions::with_fps(25), 1280, 720, Some(40000));
        let joined = args.join(" ");

        assert!(joined.contains("-s 1280x720 -r 25 -i pipe:0"));
        assert!(joined.contains("-i tcp://127.0.0.1:40000"));
        assert!(joined.contains("-c:v libvpx-vp9 -b:v 2500000"));
        assert!(joined.contains("-c:a libopus -b:a 128000"));
        assert!(joined.ends_with("-f webm pipe:1"));
    }

    #[test]
    fn test_encoder_args_without_audio() {
        let args = encoder_args(EncodedFormat::FALLBACK, &RecorderOptions::default(), 640, 480, None);
        assert!(args.contains(&"-an".to_string()));
        assert!(!args.contains(&"-c:v".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("tcp://")));
    }

    #[tokio::test]
    async fn test_finish_without_frames_is_empty() {
        let mut encoder =
            FfmpegChunkEncoder::new(FfmpegTools::default(), EncodedFormat::FALLBACK, RecorderOptions::default(), true)
                .unwrap();
        encoder
            .write_audio(&AudioBuffer {
                sample_rate: 48_000,
                channels: 2,
                samples: vec![0.0; 1920],
            })
            .await
            .unwrap();
        assert!(encoder.finish().await.unwrap().is_empty());
    }
}
