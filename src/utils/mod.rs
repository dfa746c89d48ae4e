//! Shared helpers

pub mod cancel;
pub mod error;
pub mod tools;

pub use cancel::CancelToken;
pub use error::{AppError, ErrorResponse};
pub use tools::FfmpegTools;
