//! Editor commands operating on finished recordings

use std::path::PathBuf;
use tauri::State;

use super::to_response;
use crate::transcode::{FfmpegTranscoder, TrimSettings, VideoMetadata, DEFAULT_THUMBNAIL_AT_SECS};
use crate::utils::ErrorResponse;

pub struct EditorState {
    pub transcoder: FfmpegTranscoder,
}

/// Cut a section out of a video without re-encoding
#[tauri::command]
pub async fn trim_video(
    state: State<'_, EditorState>,
    input_path: PathBuf,
    output_path: PathBuf,
    trim: TrimSettings,
) -> Result<PathBuf, ErrorResponse> {
    state
        .transcoder
        .trim_video(&input_path, &output_path, trim)
        .await
        .map_err(to_response)?;
    Ok(output_path)
}

/// Get video metadata using FFprobe
#[tauri::command]
pub async fn get_video_metadata(state: State<'_, EditorState>, path: PathBuf) -> Result<VideoMetadata, ErrorResponse> {
    state.transcoder.video_metadata(&path).await.map_err(to_response)
}

/// Write a 320x240 still taken `at_seconds` into the video, 1 s by default
#[tauri::command]
pub async fn generate_thumbnail(
    state: State<'_, EditorState>,
    video_path: PathBuf,
    output_path: PathBuf,
    at_seconds: Option<f64>,
) -> Result<PathBuf, ErrorResponse> {
    state
        .transcoder
        .generate_thumbnail(&video_path, &output_path, at_seconds.unwrap_or(DEFAULT_THUMBNAIL_AT_SECS))
        .await
        .map_err(to_response)?;
    Ok(output_path)
}
