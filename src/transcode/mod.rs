//! Post-recording validation and conversion
//!
//! The raw WebM written during a session is checked, probed and converted to
//! MP4 by an external ffmpeg. The same tools back the editor's trim and
//! thumbnail operations.

mod ffmpeg;
mod probe;
mod types;
mod validate;

pub use ffmpeg::{
    thumbnail_args, transcode_args, FfmpegTranscoder, TranscodeStage, DEFAULT_THUMBNAIL_AT_SECS,
    THUMBNAIL_SIZE,
};
pub use probe::{parse_ffprobe_json, probe};
pub use types::{ProgressCallback, TranscodeError, TranscodeResult, TrimSettings, VideoMetadata};
pub use validate::{check_raw_file, EBML_MAGIC, MIN_RAW_FILE_BYTES};
