//! Recording-related Tauri commands

use std::sync::Arc;
use tauri::State;

use super::to_response;
use crate::capture::{AudioDeviceInfo, CameraInfo, CaptureBackend, ScreenSource};
use crate::config::SettingsStore;
use crate::recorder::{FinishedRecording, RecordingCoordinator, RecordingSettings, RecordingState};
use crate::utils::ErrorResponse;

/// Application state for recording
pub struct RecorderState {
    pub coordinator: RecordingCoordinator,
    pub backend: Arc<dyn CaptureBackend>,
}

/// Screens and windows that can be recorded, with thumbnails
#[tauri::command]
pub async fn get_screen_sources(state: State<'_, RecorderState>) -> Result<Vec<ScreenSource>, ErrorResponse> {
    state.backend.screen_sources().await.map_err(to_response)
}

/// Get list of available audio input devices (microphones)
#[tauri::command]
pub async fn get_audio_devices(state: State<'_, RecorderState>) -> Result<Vec<AudioDeviceInfo>, ErrorResponse> {
    state.backend.audio_devices().await.map_err(to_response)
}

/// Get list of available cameras/webcams
#[tauri::command]
pub async fn get_cameras(state: State<'_, RecorderState>) -> Result<Vec<CameraInfo>, ErrorResponse> {
    state.backend.cameras().await.map_err(to_response)
}

/// Start recording `source_id`. Uses the stored settings unless the caller passes its own.
#[tauri::command]
pub async fn start_recording(
    state: State<'_, RecorderState>,
    settings_store: State<'_, SettingsStore>,
    source_id: String,
    settings: Option<RecordingSettings>,
    display_id: Option<String>,
) -> Result<(), ErrorResponse> {
    let settings = settings.unwrap_or_else(|| settings_store.settings());
    state
        .coordinator
        .start_recording(&source_id, settings, display_id)
        .await
        .map_err(to_response)
}

/// Stop recording and return the delivered file
#[tauri::command]
pub async fn stop_recording(state: State<'_, RecorderState>) -> Result<FinishedRecording, ErrorResponse> {
    state.coordinator.stop_recording().await.map_err(to_response)
}

/// Pause recording
#[tauri::command]
pub async fn pause_recording(state: State<'_, RecorderState>) -> Result<(), ErrorResponse> {
    state.coordinator.pause_recording().await.map_err(to_response)
}

/// Resume recording
#[tauri::command]
pub async fn resume_recording(state: State<'_, RecorderState>) -> Result<(), ErrorResponse> {
    state.coordinator.resume_recording().await.map_err(to_response)
}

/// Encoded chunk produced by a capture host living in the webview
#[tauri::command]
pub async fn recording_data_chunk(state: State<'_, RecorderState>, chunk: Vec<u8>) -> Result<(), ErrorResponse> {
    state.coordinator.handle_recording_chunk(chunk);
    Ok(())
}

/// Get current recording state
#[tauri::command]
pub async fn get_recording_state(state: State<'_, RecorderState>) -> Result<RecordingState, ErrorResponse> {
    Ok(state.coordinator.state())
}
