//! System and settings commands

use serde::{Deserialize, Serialize};
use tauri::State;

use super::to_response;
use crate::capture::platform::Platform;
use crate::config::SettingsStore;
use crate::recorder::{RecordingSettings, SettingsPatch};
use crate::utils::ErrorResponse;

/// System information
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    pub os: String,
    pub arch: String,
    pub supports_system_audio: bool,
}

/// Get basic system information
#[tauri::command]
pub async fn get_system_info() -> Result<SystemInfo, ErrorResponse> {
    Ok(SystemInfo {
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        supports_system_audio: Platform::current().supports_system_audio(),
    })
}

/// Current recording settings
#[tauri::command]
pub async fn get_settings(settings: State<'_, SettingsStore>) -> Result<RecordingSettings, ErrorResponse> {
    Ok(settings.settings())
}

/// Merge a partial update into the settings and persist them
#[tauri::command]
pub async fn update_settings(
    settings: State<'_, SettingsStore>,
    patch: SettingsPatch,
) -> Result<RecordingSettings, ErrorResponse> {
    settings.update(patch).map_err(to_response)
}
