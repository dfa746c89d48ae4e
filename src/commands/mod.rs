//! Tauri command handlers
//!
//! This module contains all the IPC command handlers that can be called
//! from the frontend via Tauri's invoke system.

pub mod editor;
pub mod recording;
pub mod system;

use crate::utils::{AppError, ErrorResponse};

/// Convert any crate error into the shape the frontend receives
pub(crate) fn to_response<E: Into<AppError>>(error: E) -> ErrorResponse {
    let error: AppError = error.into();
    tracing::debug!("Command failed: {}", error);
    error.into()
}
