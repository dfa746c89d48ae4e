//! Recording system module
//!
//! - [`StreamRecorder`] turns the composited track into timesliced WebM chunks
//! - [`ChunkTransport`] carries those chunks to the storage side
//! - [`RecordingCoordinator`] runs the session state machine, writes the raw
//!   file and hands it to the transcode stage on stop

pub mod channel;
pub mod coordinator;
pub mod encoder;
pub mod events;
pub mod pipeline;
pub mod settings;
pub mod state;
pub mod stream;
pub mod transport;
pub mod writer;

pub use channel::{CaptureHost, CaptureRequest, RecordingError, RecordingResult};
pub use coordinator::{ControllerTimings, RecordingCoordinator};
pub use encoder::{FfmpegChunkEncoder, FfmpegEncoderFactory, FfmpegFormatSupport};
pub use events::{EventHub, RecordingEvent, Subscription};
pub use pipeline::LocalCaptureHost;
pub use settings::{
    QualityPreset, QualityTier, RecordingSettings, SettingsPatch, WebcamOverlay, WebcamPosition,
    WebcamShape,
};
pub use state::{FinishedRecording, RecordingPaths, RecordingState, SessionPhase};
pub use stream::{
    select_format, ChunkEncoder, EncodedFormat, EncoderFactory, FormatSupport, RecorderOptions,
    RecorderState, StreamRecorder,
};
pub use transport::{Chunk, ChunkReceiver, ChunkSender, ChunkTransport};
pub use writer::{ChunkWriter, WriteStats};
