//! Screen Recorder - screen, webcam and audio recording with chunked capture.
//!
//! The library provides the capture pipeline, the recording session
//! controller and the ffmpeg transcode stage. The `desktop` feature adds the
//! Tauri application exposing them to a webview.

pub mod capture;
pub mod config;
pub mod processing;
pub mod recorder;
pub mod transcode;
pub mod utils;

#[cfg(feature = "desktop")]
pub mod commands;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber. Later calls are ignored.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "screen_recorder=debug,tauri=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

#[cfg(feature = "desktop")]
mod app {
    use std::sync::Arc;
    use tauri::Emitter;

    use crate::capture::{default_backend, DeviceCaptureAdapter};
    use crate::commands;
    use crate::commands::editor::EditorState;
    use crate::commands::recording::RecorderState;
    use crate::config::SettingsStore;
    use crate::recorder::{FfmpegEncoderFactory, LocalCaptureHost, RecordingCoordinator, RecordingEvent};
    use crate::transcode::FfmpegTranscoder;
    use crate::utils::ErrorResponse;

    /// Initialize and run the application
    #[cfg_attr(mobile, tauri::mobile_entry_point)]
    pub fn run() -> anyhow::Result<()> {
        crate::init_tracing();
        tracing::info!("Starting Screen Recorder v{}", env!("CARGO_PKG_VERSION"));

        let settings = SettingsStore::load();
        let tools = settings.config().tools();
        tracing::info!("Using ffmpeg at {:?}", tools.ffmpeg);

        let backend = default_backend(tools.clone());
        let encoders = tauri::async_runtime::block_on(FfmpegEncoderFactory::detect(tools.clone()));
        let host = LocalCaptureHost::new(DeviceCaptureAdapter::new(backend.clone()), Arc::new(encoders));
        let coordinator = RecordingCoordinator::new(
            Arc::new(host),
            Arc::new(FfmpegTranscoder::new(tools.clone())),
        );
        let events = coordinator.events().clone();

        tauri::Builder::default()
            .plugin(tauri_plugin_shell::init())
            .plugin(tauri_plugin_dialog::init())
            .plugin(tauri_plugin_fs::init())
            .manage(RecorderState { coordinator, backend })
            .manage(EditorState {
                transcoder: FfmpegTranscoder::new(tools),
            })
            .manage(settings)
            .invoke_handler(tauri::generate_handler![
                // Recording commands
                commands::recording::get_screen_sources,
                commands::recording::get_audio_devices,
                commands::recording::get_cameras,
                commands::recording::start_recording,
                commands::recording::stop_recording,
                commands::recording::pause_recording,
                commands::recording::resume_recording,
                commands::recording::recording_data_chunk,
                commands::recording::get_recording_state,
                // Settings and system commands
                commands::system::get_settings,
                commands::system::update_settings,
                commands::system::get_system_info,
                // Editor commands
                commands::editor::trim_video,
                commands::editor::get_video_metadata,
                commands::editor::generate_thumbnail,
            ])
            .setup(move |app| {
                let handle = app.handle().clone();
                let mut rx = events.subscribe();
                tauri::async_runtime::spawn(async move {
                    use tokio::sync::broadcast::error::RecvError;
                    loop {
                        let event = match rx.recv().await {
                            Ok(event) => event,
                            Err(RecvError::Lagged(n)) => {
                                tracing::warn!("Frontend event relay lagged, {} events skipped", n);
                                continue;
                            }
                            Err(RecvError::Closed) => break,
                        };
                        let sent = match event {
                            RecordingEvent::StateChanged(state) => handle.emit("recording-state-changed", state),
                            RecordingEvent::Error { code, message } => {
                                handle.emit("recording-error", ErrorResponse { code, message })
                            }
                        };
                        if let Err(e) = sent {
                            tracing::warn!("Failed to emit recording event: {}", e);
                        }
                    }
                });
                Ok(())
            })
            .run(tauri::generate_context!())?;

        Ok(())
    }
}

#[cfg(feature = "desktop")]
pub use app::run;
