//! FFmpeg-backed validate and transcode stage, plus the editor pass-throughs

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};

use super::probe::probe;
use super::types::{ProgressCallback, TranscodeError, TranscodeResult, TrimSettings, VideoMetadata};
use super::validate::check_raw_file;
use crate::recorder::RecordingSettings;
use crate::utils::FfmpegTools;

/// Audio bitrate of the delivered file
pub const OUTPUT_AUDIO_BITRATE: &str = "128k";

/// Thumbnail size used by the editor
pub const THUMBNAIL_SIZE: (u32, u32) = (320, 240);

/// Thumbnail position when the caller gives none
pub const DEFAULT_THUMBNAIL_AT_SECS: f64 = 1.0;

/// Post-recording stage turning the raw stream into the delivered file
#[async_trait]
pub trait TranscodeStage: Send + Sync {
    /// Check that `path` holds a usable recording and probe it
    async fn validate(&self, path: &Path) -> TranscodeResult<VideoMetadata>;

    /// Convert `raw` into `output` using the session settings
    async fn transcode(
        &self,
        raw: &Path,
        output: &Path,
        settings: &RecordingSettings,
        progress: Option<ProgressCallback>,
    ) -> TranscodeResult<()>;
}

pub struct FfmpegTranscoder {
    tools: FfmpegTools,
}

impl FfmpegTranscoder {
    pub fn new(tools: FfmpegTools) -> Self {
        Self { tools }
    }

    pub fn tools(&self) -> &FfmpegTools {
        &self.tools
    }

    /// Cut `[start, end)` out of `input` without re-encoding
    pub async fn trim_video(&self, input: &Path, output: &Path, trim: TrimSettings) -> TranscodeResult<()> {
        trim.validate()?;
        if !input.exists() {
            return Err(TranscodeError::FileNotFound(input.to_path_buf()));
        }

        tracing::info!(
            "Trimming {:?} to {:.3}s..{:.3}s into {:?}",
            input,
            trim.start_time,
            trim.end_time,
            output
        );

        let args = vec![
            "-ss".to_string(),
            trim.start_time.to_string(),
            "-to".to_string(),
            trim.end_time.to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            "-c".to_string(),
            "copy".to_string(),
            "-y".to_string(),
            output.to_string_lossy().to_string(),
        ];
        self.run(&args, None, 0.0).await
    }

    /// Probe a finished video for the editor
    pub async fn video_metadata(&self, path: &Path) -> TranscodeResult<VideoMetadata> {
        if !path.exists() {
            return Err(TranscodeError::FileNotFound(path.to_path_buf()));
        }
        probe(&self.tools, path).await
    }

    /// Extract a single 320x240 frame at `at_seconds`
    pub async fn generate_thumbnail(&self, video: &Path, output: &Path, at_seconds: f64) -> TranscodeResult<()> {
        if !video.exists() {
            return Err(TranscodeError::FileNotFound(video.to_path_buf()));
        }

        self.run(&thumbnail_args(video, output, at_seconds), None, 0.0).await
    }

    /// Run ffmpeg to completion, reporting `-progress` output against `duration_ms`
    async fn run(&self, args: &[String], progress: Option<ProgressCallback>, duration_ms: f64) -> TranscodeResult<()> {
        tracing::debug!("Running ffmpeg: {:?}", args);

        let mut child = self
            .tools
            .ffmpeg_command()
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => TranscodeError::ToolUnavailable("ffmpeg".to_string()),
                _ => TranscodeError::Io(e),
            })?;

        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf).await;
                buf
            })
        });

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let Some(callback) = progress.as_ref() else {
                    continue;
                };
                if let Some(percent) = progress_percent(&line, duration_ms) {
                    callback(percent);
                }
            }
        }

        let status = child.wait().await?;
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if !status.success() {
            return Err(TranscodeError::Failed(format!(
                "ffmpeg exited with {}: {}",
                status,
                stderr_tail(&stderr)
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl TranscodeStage for FfmpegTranscoder {
    async fn validate(&self, path: &Path) -> TranscodeResult<VideoMetadata> {
        let size = check_raw_file(path).await?;
        let mut metadata = probe(&self.tools, path).await?;
        if metadata.size_bytes == 0 {
            metadata.size_bytes = size;
        }

        tracing::info!(
            duration_ms = metadata.duration_ms,
            video_codec = %metadata.codec,
            audio_codec = ?metadata.audio_codec,
            width = metadata.width,
            height = metadata.height,
            "Validated recording {:?}",
            path
        );

        Ok(metadata)
    }

    async fn transcode(
        &self,
        raw: &Path,
        output: &Path,
        settings: &RecordingSettings,
        progress: Option<ProgressCallback>,
    ) -> TranscodeResult<()> {
        let duration_ms = if progress.is_some() {
            match probe(&self.tools, raw).await {
                Ok(meta) => meta.duration_ms,
                Err(e) => {
                    tracing::debug!("No duration for progress reporting: {}", e);
                    0.0
                }
            }
        } else {
            0.0
        };

        let args = transcode_args(raw, output, settings);
        tracing::info!("Transcoding {:?} -> {:?}", raw, output);
        self.run(&args, progress.clone(), duration_ms).await?;

        if let Some(callback) = progress {
            callback(100.0);
        }
        tracing::info!("Transcode finished: {:?}", output);
        Ok(())
    }
}

/// ffmpeg arguments extracting one thumbnail-sized frame
pub fn thumbnail_args(video: &Path, output: &Path, at_seconds: f64) -> Vec<String> {
    let (width, height) = THUMBNAIL_SIZE;
    vec![
        "-ss".to_string(),
        at_seconds.max(0.0).to_string(),
        "-i".to_string(),
        video.to_string_lossy().to_string(),
        "-vframes".to_string(),
        "1".to_string(),
        "-s".to_string(),
        format!("{}x{}", width, height),
        "-y".to_string(),
        output.to_string_lossy().to_string(),
    ]
}

/// ffmpeg arguments converting the raw WebM into the delivered MP4
pub fn transcode_args(raw: &Path, output: &Path, settings: &RecordingSettings) -> Vec<String> {
    let mut args = vec![
        "-i".to_string(),
        raw.to_string_lossy().to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-b:v".to_string(),
        settings.preset().bitrate_arg(),
        "-r".to_string(),
        settings.effective_fps().to_string(),
        "-preset".to_string(),
        "fast".to_string(),
        "-crf".to_string(),
        "23".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
    ];

    if settings.wants_audio() {
        args.extend([
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            OUTPUT_AUDIO_BITRATE.to_string(),
        ]);
    } else {
        args.push("-an".to_string());
    }

    args.extend([
        "-progress".to_string(),
        "pipe:1".to_string(),
        "-nostats".to_string(),
        "-y".to_string(),
        output.to_string_lossy().to_string(),
    ]);
    args
}

/// Percent complete from one `-progress` line. `out_time_ms` is in microseconds.
fn progress_percent(line: &str, duration_ms: f64) -> Option<f64> {
    if duration_ms <= 0.0 {
        return None;
    }
    let (key, value) = line.trim().split_once('=')?;
    let out_time_us: f64 = match key {
        "out_time_ms" | "out_time_us" => value.parse().ok()?,
        _ => return None,
    };
    Some((out_time_us / 1000.0 / duration_ms * 100.0).clamp(0.0, 100.0))
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(5);
    lines[start..].join("\n")
}
