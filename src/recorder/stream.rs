//! Stream recorder
//!
//! Drives a video track (and optional audio track) through a chunked encoder
//! and emits the encoded bytes once per timeslice. Frames are sampled at the
//! session fps; nothing is written while paused.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::channel::{RecordingError, RecordingResult};
use super::transport::ChunkSender;
use crate::capture::{AudioBuffer, AudioTrack, VideoFrame, VideoTrack};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    Vp9,
    Vp8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    Opus,
}

/// WebM output format, optionally pinned to specific codecs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedFormat {
    pub video: Option<VideoCodec>,
    pub audio: Option<AudioCodec>,
}

impl EncodedFormat {
    /// Container-only format every encoder must accept
    pub const FALLBACK: EncodedFormat = EncodedFormat {
        video: None,
        audio: None,
    };

    /// Preference order, first supported wins
    pub const PREFERENCES: [EncodedFormat; 5] = [
        EncodedFormat {
            video: Some(VideoCodec::Vp9),
            audio: Some(AudioCodec::Opus),
        },
        EncodedFormat {
            video: Some(VideoCodec::Vp8),
            audio: Some(AudioCodec::Opus),
        },
        EncodedFormat {
            video: Some(VideoCodec::Vp9),
            audio: None,
        },
        EncodedFormat {
            video: Some(VideoCodec::Vp8),
            audio: None,
        },
        EncodedFormat::FALLBACK,
    ];

    pub fn mime_type(&self) -> String {
        let mut codecs = Vec::new();
        match self.video {
            Some(VideoCodec::Vp9) => codecs.push("vp9"),
            Some(VideoCodec::Vp8) => codecs.push("vp8"),
            None => {}
        }
        if let Some(AudioCodec::Opus) = self.audio {
            codecs.push("opus");
        }

        if codecs.is_empty() {
            "video/webm".to_string()
        } else {
            format!("video/webm;codecs={}", codecs.join(","))
        }
    }
}

/// Answers which encoded formats can be produced
pub trait FormatSupport: Send + Sync {
    fn is_supported(&self, format: &EncodedFormat) -> bool;
}

/// First supported format from the preference list
pub fn select_format(support: &dyn FormatSupport) -> EncodedFormat {
    EncodedFormat::PREFERENCES
        .iter()
        .copied()
        .find(|format| *format == EncodedFormat::FALLBACK || support.is_supported(format))
        .unwrap_or(EncodedFormat::FALLBACK)
}

/// Encoder parameters for one recording
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecorderOptions {
    pub fps: u32,
    pub video_bits_per_second: u32,
    pub audio_bits_per_second: u32,
    /// Interval between emitted chunks
    pub timeslice: Duration,
}

impl RecorderOptions {
    pub const DEFAULT_VIDEO_BITRATE: u32 = 2_500_000;
    pub const DEFAULT_AUDIO_BITRATE: u32 = 128_000;
    pub const DEFAULT_TIMESLICE: Duration = Duration::from_secs(1);

    pub fn with_fps(fps: u32) -> Self {
        Self {
            fps: fps.max(1),
            ..Self::default()
        }
    }
}

impl Default for RecorderOptions {
    fn default() -> Self {
        Self {
            fps: 30,
            video_bits_per_second: Self::DEFAULT_VIDEO_BITRATE,
            audio_bits_per_second: Self::DEFAULT_AUDIO_BITRATE,
            timeslice: Self::DEFAULT_TIMESLICE,
        }
    }
}

/// Encoder consuming raw media and producing a WebM byte stream incrementally
#[async_trait]
pub trait ChunkEncoder: Send {
    async fn write_video(&mut self, frame: &VideoFrame) -> RecordingResult<()>;

    async fn write_audio(&mut self, buffer: &AudioBuffer) -> RecordingResult<()>;

    /// Encoded bytes produced since the previous call
    fn take_output(&mut self) -> Vec<u8>;

    /// Flush the encoder and return the remaining bytes
    async fn finish(&mut self) -> RecordingResult<Vec<u8>>;
}

/// Creates encoders for a selected format
pub trait EncoderFactory: Send + Sync {
    fn format_support(&self) -> &dyn FormatSupport;

    fn create(
        &self,
        format: EncodedFormat,
        options: &RecorderOptions,
        has_audio: bool,
    ) -> RecordingResult<Box<dyn ChunkEncoder>>;
}

/// Lifecycle of a stream recorder. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Inactive,
    Recording,
    Paused,
    Stopped,
}

pub struct StreamRecorder {
    sink: ChunkSender,
    state: Arc<Mutex<RecorderState>>,
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl StreamRecorder {
    pub fn new(sink: ChunkSender) -> Self {
        Self {
            sink,
            state: Arc::new(Mutex::new(RecorderState::Inactive)),
            stop_tx: None,
            task: None,
        }
    }

    pub fn state(&self) -> RecorderState {
        *self.state.lock()
    }

    /// Begin recording. Only valid from `Inactive`.
    pub fn start(
        &mut self,
        encoder: Box<dyn ChunkEncoder>,
        video: VideoTrack,
        audio: Option<AudioTrack>,
        options: RecorderOptions,
    ) -> RecordingResult<()> {
        {
            let mut state = self.state.lock();
            if *state != RecorderState::Inactive {
                return Err(RecordingError::AlreadyRecording);
            }
            *state = RecorderState::Recording;
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        self.stop_tx = Some(stop_tx);
        self.task = Some(tokio::spawn(record_loop(
            encoder,
            video,
            audio,
            options,
            self.state.clone(),
            self.sink.clone(),
            stop_rx,
        )));

        tracing::info!(
            "Stream recorder started: {}fps, {} bps, {:?} timeslice",
            options.fps,
            options.video_bits_per_second,
            options.timeslice
        );
        Ok(())
    }

    /// Recording → Paused; no-op otherwise
    pub fn pause(&self) {
        let mut state = self.state.lock();
        if *state == RecorderState::Recording {
            *state = RecorderState::Paused;
            tracing::debug!("Stream recorder paused");
        }
    }

    /// Paused → Recording; no-op otherwise
    pub fn resume(&self) {
        let mut state = self.state.lock();
        if *state == RecorderState::Paused {
            *state = RecorderState::Recording;
            tracing::debug!("Stream recorder resumed");
        }
    }

    /// Finalize the stream and emit the last chunk. Safe to call twice.
    pub async fn stop(&mut self) {
        {
            let mut state = self.state.lock();
            match *state {
                RecorderState::Stopped => return,
                RecorderState::Inactive => {
                    *state = RecorderState::Stopped;
                    return;
                }
                RecorderState::Recording | RecorderState::Paused => {}
            }
        }

        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!("Stream recorder task failed: {}", e);
            }
        }

        *self.state.lock() = RecorderState::Stopped;
        tracing::info!("Stream recorder stopped");
    }
}

enum AudioEvent {
    Buffer(Arc<AudioBuffer>),
    Lagged(u64),
    Closed,
}

async fn next_audio(rx: &mut Option<broadcast::Receiver<Arc<AudioBuffer>>>) -> AudioEvent {
    match rx {
        Some(rx) => match rx.recv().await {
            Ok(buffer) => AudioEvent::Buffer(buffer),
            Err(broadcast::error::RecvError::Lagged(n)) => AudioEvent::Lagged(n),
            Err(broadcast::error::RecvError::Closed) => AudioEvent::Closed,
        },
        None => std::future::pending().await,
    }
}

async fn record_loop(
    mut encoder: Box<dyn ChunkEncoder>,
    video: VideoTrack,
    audio: Option<AudioTrack>,
    options: RecorderOptions,
    state: Arc<Mutex<RecorderState>>,
    sink: ChunkSender,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let mut frame_tick = tokio::time::interval(Duration::from_secs_f64(1.0 / options.fps.max(1) as f64));
    frame_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut slice_tick =
        tokio::time::interval_at(Instant::now() + options.timeslice, options.timeslice);
    let mut audio_rx = audio.as_ref().and_then(|a| a.subscribe());
    let mut video_ended_logged = false;

    loop {
        tokio::select! {
            _ = &mut stop_rx => break,
            _ = frame_tick.tick() => {
                if *state.lock() != RecorderState::Recording {
                    continue;
                }
                match video.latest() {
                    Some(frame) => {
                        if let Err(e) = encoder.write_video(&frame).await {
                            tracing::error!("Video encoding failed: {}", e);
                            break;
                        }
                    }
                    None if video.is_ended() && !video_ended_logged => {
                        tracing::warn!("Video track {} ended while recording", video.label());
                        video_ended_logged = true;
                    }
                    None => {}
                }
            }
            event = next_audio(&mut audio_rx) => match event {
                AudioEvent::Buffer(buffer) => {
                    if *state.lock() == RecorderState::Recording {
                        if let Err(e) = encoder.write_audio(&buffer).await {
                            tracing::warn!("Audio encoding failed: {}", e);
                        }
                    }
                }
                AudioEvent::Lagged(n) => tracing::warn!("Recorder audio lagged, {} buffers skipped", n),
                AudioEvent::Closed => {
                    tracing::debug!("Recorder audio track ended");
                    audio_rx = None;
                }
            },
            _ = slice_tick.tick() => {
                if *state.lock() != RecorderState::Recording {
                    continue;
                }
                let bytes = encoder.take_output();
                if !bytes.is_empty() {
                    sink.send(bytes);
                }
            }
        }
    }

    match encoder.finish().await {
        Ok(rest) if !rest.is_empty() => sink.send(rest),
        Ok(_) => {}
        Err(e) => tracing::error!("Failed to finalize encoder: {}", e),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::capture::video_track;
    use crate::recorder::transport::ChunkTransport;
    use std::collections::HashSet;

    /// Encoder emitting one byte per video frame plus a marker on finish
    #[derive(Default)]
    pub struct CountingEncoder {
        pending: Vec<u8>,
        pub audio_buffers: Arc<Mutex<usize>>,
    }

    #[async_trait]
    impl ChunkEncoder for CountingEncoder {
        async fn write_video(&mut self, _frame: &VideoFrame) -> RecordingResult<()> {
            self.pending.push(b'v');
            Ok(())
        }

        async fn write_audio(&mut self, _buffer: &AudioBuffer) -> RecordingResult<()> {
            *self.audio_buffers.lock() += 1;
            Ok(())
        }

        fn take_output(&mut self) -> Vec<u8> {
            std::mem::take(&mut self.pending)
        }

        async fn finish(&mut self) -> RecordingResult<Vec<u8>> {
            let mut rest = std::mem::take(&mut self.pending);
            rest.push(b'$');
            Ok(rest)
        }
    }

    struct Supports(HashSet<String>);

    impl Supports {
        fn of(mime_types: &[&str]) -> Self {
            Supports(mime_types.iter().map(|m| m.to_string()).collect())
        }
    }

    impl FormatSupport for Supports {
        fn is_supported(&self, format: &EncodedFormat) -> bool {
            self.0.contains(&format.mime_type())
        }
    }

    #[test]
    fn test_format_preference_order() {
        let all: Vec<String> = EncodedFormat::PREFERENCES.iter().map(|f| f.mime_type()).collect();
        let all = Supports(all.into_iter().collect());
        assert_eq!(select_format(&all).mime_type(), "video/webm;codecs=vp9,opus");

        let vp8_only = Supports::of(&["video/webm;codecs=vp8,opus", "video/webm;codecs=vp8"]);
        assert_eq!(select_format(&vp8_only).mime_type(), "video/webm;codecs=vp8,opus");

        let no_opus = Supports::of(&["video/webm;codecs=vp9"]);
        assert_eq!(select_format(&no_opus).mime_type(), "video/webm;codecs=vp9");

        let nothing = Supports::of(&[]);
        assert_eq!(select_format(&nothing), EncodedFormat::FALLBACK);
        assert_eq!(EncodedFormat::FALLBACK.mime_type(), "video/webm");
    }

    #[tokio::test(start_paused = true)]
    async fn test_emits_one_chunk_per_timeslice() {
        let (tx, mut rx) = ChunkTransport::channel();
        let (screen, feed) = video_track("screen:0");
        feed.push(VideoFrame::solid(4, 4, [0, 0, 0, 255]));

        let mut recorder = StreamRecorder::new(tx);
        recorder
            .start(
                Box::new(CountingEncoder::default()),
                screen.handle(),
                None,
                RecorderOptions::with_fps(10),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(3050)).await;
        recorder.stop().await;
        recorder.stop().await;
        assert_eq!(recorder.state(), RecorderState::Stopped);

        let mut chunks = Vec::new();
        while let Some(chunk) = rx.try_recv() {
            chunks.push(chunk);
        }
        // Three timeslices plus the final flush
        assert_eq!(chunks.len(), 4);
        assert!((10..=11).contains(&chunks[0].len()));
        // 31 frames sampled over 3.05s plus the finish marker
        assert_eq!(chunks.iter().map(|c| c.len()).sum::<usize>(), 32);
        assert_eq!(chunks.last().unwrap().as_bytes().last(), Some(&b'$'));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_suppresses_frames_and_chunks() {
        let (tx, mut rx) = ChunkTransport::channel();
        let (screen, feed) = video_track("screen:0");
        feed.push(VideoFrame::solid(4, 4, [0, 0, 0, 255]));

        let mut recorder = StreamRecorder::new(tx);
        recorder
            .start(
                Box::new(CountingEncoder::default()),
                screen.handle(),
                None,
                RecorderOptions::with_fps(10),
            )
            .unwrap();

        recorder.resume();
        assert_eq!(recorder.state(), RecorderState::Recording);
        recorder.pause();
        recorder.pause();
        assert_eq!(recorder.state(), RecorderState::Paused);

        tokio::time::sleep(Duration::from_millis(2500)).await;
        recorder.stop().await;

        // Paused before the first frame tick: only the finish marker
        let chunk = rx.try_recv().unwrap();
        assert_eq!(chunk.as_bytes(), b"$");
        assert!(rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let (tx, _rx) = ChunkTransport::channel();
        let (screen, _feed) = video_track("screen:0");
        let mut recorder = StreamRecorder::new(tx);
        recorder
            .start(
                Box::new(CountingEncoder::default()),
                screen.handle(),
                None,
                RecorderOptions::default(),
            )
            .unwrap();
        let again = recorder.start(
            Box::new(CountingEncoder::default()),
            screen.handle(),
            None,
            RecorderOptions::default(),
        );
        assert!(matches!(again, Err(RecordingError::AlreadyRecording)));
        recorder.stop().await;
    }
}
