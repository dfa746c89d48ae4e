//! Application configuration
//!
//! Persisted as TOML in the user's config directory. A missing or unreadable
//! file falls back to defaults, which are written back so the user has a
//! file to edit.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::recorder::{RecordingSettings, SettingsPatch};
use crate::utils::FfmpegTools;

const APP_DIR: &str = "screen-recorder";
const CONFIG_FILE: &str = "config.toml";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Could not determine config directory")]
    NoConfigDir,
}

/// Complete application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Explicit ffmpeg binary, otherwise resolved from PATH
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ffmpeg_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ffprobe_path: Option<PathBuf>,
    /// Settings applied to new recording sessions
    #[serde(default)]
    pub recording: RecordingSettings,
}

impl AppConfig {
    /// Load from the user's config directory, falling back to defaults
    pub fn load() -> Self {
        let path = match config_path() {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!("{}, using default config", e);
                return Self::default();
            }
        };

        match Self::load_from_path(&path) {
            Ok(config) => config,
            Err(e) => {
                if path.exists() {
                    tracing::warn!("Failed to load {:?}: {}, using defaults", path, e);
                } else {
                    tracing::info!("No config at {:?}, creating one", path);
                }
                let config = Self::default();
                if let Err(e) = config.save_to_path(&path) {
                    tracing::warn!("Failed to write default config: {}", e);
                }
                config
            }
        }
    }

    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to_path(&config_path()?)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    pub fn tools(&self) -> FfmpegTools {
        FfmpegTools::resolve(self.ffmpeg_path.as_deref(), self.ffprobe_path.as_deref())
    }
}

/// `<config dir>/screen-recorder/config.toml`
pub fn config_path() -> Result<PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
        .ok_or(ConfigError::NoConfigDir)
}

/// Current recording settings shared with the frontend
pub struct SettingsStore {
    config: Mutex<AppConfig>,
    path: Option<PathBuf>,
}

impl SettingsStore {
    /// Store backed by the user's config file
    pub fn load() -> Self {
        Self {
            config: Mutex::new(AppConfig::load()),
            path: config_path().ok(),
        }
    }

    /// In-memory store, nothing is persisted
    pub fn in_memory(config: AppConfig) -> Self {
        Self {
            config: Mutex::new(config),
            path: None,
        }
    }

    pub fn with_path(config: AppConfig, path: PathBuf) -> Self {
        Self {
            config: Mutex::new(config),
            path: Some(path),
        }
    }

    pub fn config(&self) -> AppConfig {
        self.config.lock().clone()
    }

    pub fn settings(&self) -> RecordingSettings {
        self.config.lock().recording.clone()
    }

    /// Merge `patch` into the current settings and persist them
    pub fn update(&self, patch: SettingsPatch) -> Result<RecordingSettings, ConfigError> {
        let snapshot = {
            let mut config = self.config.lock();
            config.recording.apply(patch);
            config.clone()
        };

        if let Some(path) = &self.path {
            snapshot.save_to_path(path)?;
        }
        Ok(snapshot.recording)
    }
}
