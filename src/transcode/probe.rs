//! ffprobe wrapper

use std::path::Path;
use std::process::Stdio;

use super::types::{TranscodeError, TranscodeResult, VideoMetadata};
use crate::utils::FfmpegTools;

/// Probe `path` with ffprobe. Fails with `InvalidMedia` when ffprobe rejects the file.
pub async fn probe(tools: &FfmpegTools, path: &Path) -> TranscodeResult<VideoMetadata> {
    let output = tools
        .ffprobe_command()
        .args(["-v", "error", "-print_format", "json", "-show_streams", "-show_format"])
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => TranscodeError::ToolUnavailable("ffprobe".to_string()),
            _ => TranscodeError::Io(e),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(TranscodeError::InvalidMedia(stderr.trim().to_string()));
    }

    parse_ffprobe_json(&String::from_utf8_lossy(&output.stdout))
}

/// Parse `-print_format json -show_streams -show_format` output
pub fn parse_ffprobe_json(json: &str) -> TranscodeResult<VideoMetadata> {
    let json: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| TranscodeError::InvalidMedia(format!("Failed to parse ffprobe output: {}", e)))?;

    let streams = json
        .get("streams")
        .and_then(|s| s.as_array())
        .ok_or_else(|| TranscodeError::InvalidMedia("No streams found".to_string()))?;

    let of_type = |kind: &str| {
        streams
            .iter()
            .find(|s| s.get("codec_type").and_then(|t| t.as_str()) == Some(kind))
    };

    let video = of_type("video")
        .ok_or_else(|| TranscodeError::InvalidMedia("No video stream found".to_string()))?;
    let audio = of_type("audio");
    let format = json.get("format");

    let duration_secs = format
        .and_then(|f| f.get("duration"))
        .and_then(|d| d.as_str())
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0);

    Ok(VideoMetadata {
        width: video.get("width").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
        height: video.get("height").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
        fps: video
            .get("r_frame_rate")
            .and_then(|v| v.as_str())
            .map(parse_frame_rate)
            .unwrap_or(0.0),
        duration_ms: duration_secs * 1000.0,
        codec: video
            .get("codec_name")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string(),
        audio_codec: audio
            .and_then(|a| a.get("codec_name"))
            .and_then(|v| v.as_str())
            .map(str::to_string),
        format: format
            .and_then(|f| f.get("format_name"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string(),
        size_bytes: format
            .and_then(|f| f.get("size"))
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
            .unwrap_or(0),
    })
}

/// Frame rate as "30/1", "30000/1001" or "29.97"
fn parse_frame_rate(s: &str) -> f64 {
    match s.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().unwrap_or(0.0);
            let den: f64 = den.parse().unwrap_or(1.0);
            if den > 0.0 {
                num / den
            } else {
                0.0
            }
        }
        None => s.parse().unwrap_or(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WEBM_PROBE: &str = r#"{
        "streams": [
            {"index": 0, "codec_name": "vp9", "codec_type": "video", "width": 1920, "height": 1080, "r_frame_rate": "30/1"},
            {"index": 1, "codec_name": "opus", "codec_type": "audio", "sample_rate": "48000"}
        ],
        "format": {"format_name": "matroska,webm", "duration": "5.012000", "size": "1843200"}
    }"#;

    #[test]
    fn test_parse_webm_probe() {
        let meta = parse_ffprobe_json(WEBM_PROBE).unwrap();
        assert_eq!((meta.width, meta.height), (1920, 1080));
        assert_eq!(meta.fps, 30.0);
        assert_eq!(meta.codec, "vp9");
        assert_eq!(meta.audio_codec.as_deref(), Some("opus"));
        assert_eq!(meta.format, "matroska,webm");
        assert!((meta.duration_ms - 5012.0).abs() < 1e-6);
        assert_eq!(meta.size_bytes, 1_843_200);
    }

    #[test]
    fn test_probe_without_video_is_invalid() {
        let result = parse_ffprobe_json(r#"{"streams": [{"codec_type": "audio"}], "format": {}}"#);
        assert!(matches!(result, Err(TranscodeError::InvalidMedia(_))));
        assert!(parse_ffprobe_json("not json").is_err());
    }

    #[test]
    fn test_parse_frame_rate() {
        assert!((parse_frame_rate("30000/1001") - 29.97).abs() < 0.01);
        assert_eq!(parse_frame_rate("25"), 25.0);
        assert_eq!(parse_frame_rate("0/0"), 0.0);
    }
}
