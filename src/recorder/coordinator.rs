//! Recording session controller
//!
//! Owns the session state machine. Chunks arriving from the capture host are
//! appended to the raw file; on stop the file is closed, checked and handed to
//! the transcode stage. Observers are notified through the [`EventHub`].

use chrono::Utc;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::channel::{CaptureHost, CaptureRequest, RecordingError, RecordingResult};
use super::events::{EventHub, RecordingEvent};
use super::settings::RecordingSettings;
use super::state::{FinishedRecording, RecordingPaths, RecordingState, SessionPhase};
use super::transport::{Chunk, ChunkTransport};
use super::writer::ChunkWriter;
use crate::transcode::{ProgressCallback, TranscodeStage, MIN_RAW_FILE_BYTES};

/// Timer settings of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerTimings {
    /// Duration counter period
    pub tick: Duration,
    /// Wait for chunks still in flight after the capture host stopped
    pub trailing_grace: Duration,
    /// Wait after closing the raw file before inspecting it
    pub flush_grace: Duration,
}

impl Default for ControllerTimings {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            trailing_grace: Duration::from_secs(1),
            flush_grace: Duration::from_millis(500),
        }
    }
}

#[derive(Default)]
struct Session {
    phase: SessionPhase,
    state: RecordingState,
    paths: Option<RecordingPaths>,
    settings: Option<RecordingSettings>,
    writer: Option<ChunkWriter>,
    /// The raw file writer failed and observers were told
    write_failed: bool,
    ticker: Option<JoinHandle<()>>,
    receiver: Option<JoinHandle<()>>,
}

struct Inner {
    host: Arc<dyn CaptureHost>,
    transcoder: Arc<dyn TranscodeStage>,
    events: EventHub,
    timings: ControllerTimings,
    session: Mutex<Session>,
}

impl Inner {
    fn notify_state(&self) {
        let state = self.session.lock().state.clone();
        self.events.emit(RecordingEvent::StateChanged(state));
    }

    fn notify_error(&self, error: &RecordingError) {
        if error.is_guard() {
            return;
        }
        tracing::error!("Recording failed: {}", error);
        self.events.emit(RecordingEvent::Error {
            code: error.code().to_string(),
            message: error.to_string(),
        });
    }

    fn append_chunk(&self, chunk: Chunk) {
        let failed_path = {
            let mut session = self.session.lock();
            let Some(writer) = session.writer.as_ref() else {
                tracing::warn!(
                    "Discarding {} byte chunk: no recording file open ({:?})",
                    chunk.len(),
                    session.phase
                );
                return;
            };
            if writer.append(chunk) {
                return;
            }
            tracing::warn!("Raw file writer has failed, chunk lost");
            if session.write_failed {
                return;
            }
            let path = writer.path().to_path_buf();
            session.write_failed = true;
            path
        };

        self.notify_error(&RecordingError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("failed to write {}", failed_path.display()),
        )));
    }

    /// Drop everything the session held and go back to idle
    fn reset(&self) -> Option<ChunkWriter> {
        let mut session = self.session.lock();
        if let Some(ticker) = session.ticker.take() {
            ticker.abort();
        }
        if let Some(receiver) = session.receiver.take() {
            receiver.abort();
        }
        let writer = session.writer.take();
        *session = Session::default();
        writer
    }
}

/// Single-session recording controller. Cheap to clone.
#[derive(Clone)]
pub struct RecordingCoordinator {
    inner: Arc<Inner>,
}

impl RecordingCoordinator {
    pub fn new(host: Arc<dyn CaptureHost>, transcoder: Arc<dyn TranscodeStage>) -> Self {
        Self::with_timings(host, transcoder, ControllerTimings::default())
    }

    pub fn with_timings(
        host: Arc<dyn CaptureHost>,
        transcoder: Arc<dyn TranscodeStage>,
        timings: ControllerTimings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                host,
                transcoder,
                events: EventHub::new(),
                timings,
                session: Mutex::new(Session::default()),
            }),
        }
    }

    pub fn events(&self) -> &EventHub {
        &self.inner.events
    }

    /// Snapshot of the current state
    pub fn state(&self) -> RecordingState {
        self.inner.session.lock().state.clone()
    }

    pub fn phase(&self) -> SessionPhase {
        self.inner.session.lock().phase
    }

    /// Start a session recording `source_id`
    pub async fn start_recording(
        &self,
        source_id: &str,
        settings: RecordingSettings,
        display_id: Option<String>,
    ) -> RecordingResult<()> {
        {
            let mut session = self.inner.session.lock();
            if session.phase != SessionPhase::Idle {
                return Err(RecordingError::AlreadyRecording);
            }
            session.phase = SessionPhase::Starting;
        }

        tracing::info!("Starting recording of {} into {:?}", source_id, settings.output_path);

        match self.bring_up(source_id, settings, display_id).await {
            Ok(()) => {
                self.inner.notify_state();
                Ok(())
            }
            Err(e) => {
                if let Some(writer) = self.inner.reset() {
                    if let Err(close_err) = writer.close().await {
                        tracing::warn!("Failed to close recording file: {}", close_err);
                    }
                }
                self.inner.notify_error(&e);
                self.inner.notify_state();
                Err(e)
            }
        }
    }

    async fn bring_up(
        &self,
        source_id: &str,
        settings: RecordingSettings,
        display_id: Option<String>,
    ) -> RecordingResult<()> {
        tokio::fs::create_dir_all(&settings.output_path).await?;
        let paths = RecordingPaths::for_timestamp(&settings.output_path, Utc::now());
        let writer = ChunkWriter::create(&paths.raw).await?;

        let (sink, chunks) = ChunkTransport::channel();
        let weak = Arc::downgrade(&self.inner);
        let receiver = chunks.on_chunk(move |chunk| {
            if let Some(inner) = weak.upgrade() {
                inner.append_chunk(chunk);
            }
        });

        {
            let mut session = self.inner.session.lock();
            session.state = RecordingState {
                is_recording: true,
                is_paused: false,
                duration: 0,
                output_file: Some(paths.output.clone()),
            };
            session.paths = Some(paths.clone());
            session.settings = Some(settings.clone());
            session.writer = Some(writer);
            session.receiver = Some(receiver);
            session.ticker = Some(spawn_ticker(Arc::downgrade(&self.inner), self.inner.timings.tick));
        }

        let request = CaptureRequest {
            source_id: source_id.to_string(),
            display_id,
            settings,
        };
        self.inner.host.start(request, sink).await?;

        self.inner.session.lock().phase = SessionPhase::Recording;
        tracing::info!("Recording started: {:?} -> {:?}", paths.raw, paths.output);
        Ok(())
    }

    /// Pause the active session. Pausing twice is a no-op.
    pub async fn pause_recording(&self) -> RecordingResult<()> {
        match self.phase() {
            SessionPhase::Recording => {}
            SessionPhase::Paused => return Ok(()),
            _ => return Err(RecordingError::NoActiveRecording),
        }

        if let Err(e) = self.inner.host.pause().await {
            self.inner.notify_error(&e);
            return Err(e);
        }

        {
            let mut session = self.inner.session.lock();
            if session.phase == SessionPhase::Recording {
                session.phase = SessionPhase::Paused;
                session.state.is_paused = true;
            }
        }
        tracing::info!("Recording paused");
        self.inner.notify_state();
        Ok(())
    }

    /// Resume a paused session. Resuming while recording is a no-op.
    pub async fn resume_recording(&self) -> RecordingResult<()> {
        match self.phase() {
            SessionPhase::Paused => {}
            SessionPhase::Recording => return Ok(()),
            _ => return Err(RecordingError::NoActiveRecording),
        }

        if let Err(e) = self.inner.host.resume().await {
            self.inner.notify_error(&e);
            return Err(e);
        }

        {
            let mut session = self.inner.session.lock();
            if session.phase == SessionPhase::Paused {
                session.phase = SessionPhase::Recording;
                session.state.is_paused = false;
            }
        }
        tracing::info!("Recording resumed");
        self.inner.notify_state();
        Ok(())
    }

    /// Stop the session, finalize the file and return what was delivered
    pub async fn stop_recording(&self) -> RecordingResult<FinishedRecording> {
        let (paths, settings, duration) = {
            let mut session = self.inner.session.lock();
            if !session.phase.is_active() {
                return Err(RecordingError::NoActiveRecording);
            }
            let (Some(paths), Some(settings)) = (session.paths.clone(), session.settings.clone()) else {
                return Err(RecordingError::NoActiveRecording);
            };
            session.phase = SessionPhase::Finalizing;
            if let Some(ticker) = session.ticker.take() {
                ticker.abort();
            }
            (paths, settings, session.state.duration)
        };

        tracing::info!("Stopping recording after {}s", duration);

        if let Err(e) = self.inner.host.stop().await {
            tracing::warn!("Capture host failed to stop cleanly: {}", e);
        }

        tokio::time::sleep(self.inner.timings.trailing_grace).await;

        let result = self.finalize(paths, &settings, duration).await;

        if let Some(writer) = self.inner.reset() {
            if let Err(e) = writer.close().await {
                tracing::warn!("Failed to close recording file: {}", e);
            }
        }
        match &result {
            Ok(finished) => tracing::info!("Recording saved to {:?}", finished.output_file),
            Err(e) => self.inner.notify_error(e),
        }
        self.inner.notify_state();
        result
    }

    async fn finalize(
        &self,
        paths: RecordingPaths,
        settings: &RecordingSettings,
        duration: u64,
    ) -> RecordingResult<FinishedRecording> {
        let writer = self.inner.session.lock().writer.take();
        if let Some(writer) = writer {
            writer.close().await?;
        }

        tokio::time::sleep(self.inner.timings.flush_grace).await;

        let size = match tokio::fs::metadata(&paths.raw).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RecordingError::FileNotFound(paths.raw))
            }
            Err(e) => return Err(e.into()),
        };
        tracing::info!("Raw recording {:?}: {} bytes", paths.raw, size);

        if size == 0 {
            return Err(RecordingError::EmptyRecording);
        }
        if size < MIN_RAW_FILE_BYTES {
            return Err(RecordingError::CorruptRecording(size));
        }

        let raw_only = |reason: &str| {
            tracing::warn!("Delivering raw recording: {}", reason);
            FinishedRecording {
                output_file: paths.raw.clone(),
                raw_file: paths.raw.clone(),
                duration_secs: duration,
                transcoded: false,
            }
        };

        match self.inner.transcoder.validate(&paths.raw).await {
            Ok(meta) => tracing::debug!(
                "Raw recording is {}x{} {} ({:.1}s)",
                meta.width,
                meta.height,
                meta.codec,
                meta.duration_ms / 1000.0
            ),
            Err(e) if e.is_recoverable() => return Ok(raw_only(&e.to_string())),
            Err(e) => return Err(e.into()),
        }

        let progress: ProgressCallback = Arc::new(|percent| {
            tracing::debug!("Transcode progress: {:.0}%", percent);
        });
        match self
            .inner
            .transcoder
            .transcode(&paths.raw, &paths.output, settings, Some(progress))
            .await
        {
            Ok(()) => Ok(FinishedRecording {
                output_file: paths.output.clone(),
                raw_file: paths.raw.clone(),
                duration_secs: duration,
                transcoded: true,
            }),
            Err(e) => Ok(raw_only(&RecordingError::from(e).to_string())),
        }
    }

    /// Append an encoded chunk to the open recording file. Never fails;
    /// chunks arriving without an open file are discarded.
    pub fn handle_recording_chunk(&self, chunk: impl Into<Chunk>) {
        self.inner.append_chunk(chunk.into());
    }

    /// Raw file of the running session
    pub fn raw_file(&self) -> Option<PathBuf> {
        self.inner.session.lock().paths.as_ref().map(|p| p.raw.clone())
    }
}

/// Count whole seconds spent in `Recording`
fn spawn_ticker(inner: Weak<Inner>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(inner) = inner.upgrade() else {
                break;
            };
            let counted = {
                let mut session = inner.session.lock();
                if session.phase == SessionPhase::Recording {
                    session.state.duration += 1;
                    true
                } else {
                    false
                }
            };
            if counted {
                inner.notify_state();
            }
        }
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::recorder::transport::ChunkSender;
    use crate::transcode::{TranscodeError, TranscodeResult, VideoMetadata};
    use async_trait::async_trait;
    use std::path::Path;
    use tempfile::tempdir;

    /// Capture host driven by the test through the chunk sink it was given
    #[derive(Default)]
    pub struct ScriptedHost {
        pub fail_start: bool,
        pub sink: Mutex<Option<ChunkSender>>,
        pub calls: Mutex<Vec<&'static str>>,
    }

    impl ScriptedHost {
        pub fn send(&self, bytes: Vec<u8>) {
            if let Some(sink) = self.sink.lock().as_ref() {
                sink.send(bytes);
            }
        }
    }

    #[async_trait]
    impl CaptureHost for ScriptedHost {
        async fn start(&self, _request: CaptureRequest, sink: ChunkSender) -> RecordingResult<()> {
            self.calls.lock().push("start");
            if self.fail_start {
                return Err(RecordingError::DeviceUnavailable("screen:0".into()));
            }
            *self.sink.lock() = Some(sink);
            Ok(())
        }

        async fn pause(&self) -> RecordingResult<()> {
            self.calls.lock().push("pause");
            Ok(())
        }

        async fn resume(&self) -> RecordingResult<()> {
            self.calls.lock().push("resume");
            Ok(())
        }

        async fn stop(&self) -> RecordingResult<()> {
            self.calls.lock().push("stop");
            self.sink.lock().take();
            Ok(())
        }
    }

    /// Transcoder that copies the raw file, or fails on request
    #[derive(Default)]
    pub struct CopyTranscoder {
        pub fail: bool,
    }

    #[async_trait]
    impl TranscodeStage for CopyTranscoder {
        async fn validate(&self, path: &Path) -> TranscodeResult<VideoMetadata> {
            crate::transcode::check_raw_file(path).await?;
            Ok(VideoMetadata::default())
        }

        async fn transcode(
            &self,
            raw: &Path,
            output: &Path,
            _settings: &RecordingSettings,
            _progress: Option<ProgressCallback>,
        ) -> TranscodeResult<()> {
            if self.fail {
                return Err(TranscodeError::Failed("encoder missing".into()));
            }
            tokio::fs::copy(raw, output).await?;
            Ok(())
        }
    }

    fn coordinator(host: Arc<ScriptedHost>, transcoder: CopyTranscoder) -> RecordingCoordinator {
        RecordingCoordinator::new(host, Arc::new(transcoder))
    }

    fn settings_in(dir: &Path) -> RecordingSettings {
        RecordingSettings {
            output_path: dir.join("out"),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_guards() {
        let dir = tempdir().unwrap();
        let host = Arc::new(ScriptedHost::default());
        let controller = coordinator(host.clone(), CopyTranscoder::default());

        assert!(matches!(
            controller.stop_recording().await,
            Err(RecordingError::NoActiveRecording)
        ));
        assert!(matches!(
            controller.pause_recording().await,
            Err(RecordingError::NoActiveRecording)
        ));

        controller
            .start_recording("screen:0", settings_in(dir.path()), None)
            .await
            .unwrap();
        assert!(dir.path().join("out").is_dir());
        assert!(matches!(
            controller
                .start_recording("screen:0", settings_in(dir.path()), None)
                .await,
            Err(RecordingError::AlreadyRecording)
        ));
        assert_eq!(*host.calls.lock(), vec!["start"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_then_resume_keeps_duration() {
        let dir = tempdir().unwrap();
        let host = Arc::new(ScriptedHost::default());
        let controller = coordinator(host.clone(), CopyTranscoder::default());

        controller
            .start_recording("screen:0", settings_in(dir.path()), None)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(controller.state().duration, 2);

        controller.pause_recording().await.unwrap();
        controller.pause_recording().await.unwrap();
        assert!(controller.state().is_paused);
        controller.resume_recording().await.unwrap();
        assert_eq!(controller.state().duration, 2);
        assert!(!controller.state().is_paused);

        controller.pause_recording().await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(controller.state().duration, 2);

        assert_eq!(*host.calls.lock(), vec!["start", "pause", "resume", "pause"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_recording_is_fatal_and_resets() {
        let dir = tempdir().unwrap();
        let host = Arc::new(ScriptedHost::default());
        let controller = coordinator(host, CopyTranscoder::default());
        let mut events = controller.events().subscribe();

        controller
            .start_recording("screen:0", settings_in(dir.path()), None)
            .await
            .unwrap();
        let result = controller.stop_recording().await;

        assert!(matches!(result, Err(RecordingError::EmptyRecording)));
        assert_eq!(controller.phase(), SessionPhase::Idle);
        assert_eq!(controller.state(), RecordingState::default());

        let mut codes = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let RecordingEvent::Error { code, .. } = event {
                codes.push(code);
            }
        }
        assert_eq!(codes, vec!["EMPTY_RECORDING"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_small_recording_is_corrupt() {
        let dir = tempdir().unwrap();
        let host = Arc::new(ScriptedHost::default());
        let controller = coordinator(host.clone(), CopyTranscoder::default());

        controller
            .start_recording("screen:0", settings_in(dir.path()), None)
            .await
            .unwrap();
        host.send(vec![0x1a; 500]);

        let result = controller.stop_recording().await;
        assert!(matches!(result, Err(RecordingError::CorruptRecording(500))));
        assert_eq!(controller.phase(), SessionPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_start_tears_down() {
        let dir = tempdir().unwrap();
        let host = Arc::new(ScriptedHost {
            fail_start: true,
            ..Default::default()
        });
        let controller = coordinator(host, CopyTranscoder::default());

        let result = controller
            .start_recording("screen:0", settings_in(dir.path()), None)
            .await;
        assert!(matches!(result, Err(RecordingError::DeviceUnavailable(_))));
        assert_eq!(controller.phase(), SessionPhase::Idle);
        assert!(controller.raw_file().is_none());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(controller.state().duration, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunk_after_stop_is_discarded() {
        let dir = tempdir().unwrap();
        let host = Arc::new(ScriptedHost::default());
        let controller = coordinator(host.clone(), CopyTranscoder::default());

        controller
            .start_recording("screen:0", settings_in(dir.path()), None)
            .await
            .unwrap();
        host.send(vec![0x1a; 800]);
        host.send(vec![0x45; 800]);

        let finished = controller.stop_recording().await.unwrap();
        assert!(finished.transcoded);
        let size = std::fs::metadata(&finished.raw_file).unwrap().len();
        assert_eq!(size, 1600);

        controller.handle_recording_chunk(vec![0xff; 400]);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(controller.phase(), SessionPhase::Idle);
        assert_eq!(std::fs::metadata(&finished.raw_file).unwrap().len(), size);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_write_failure_is_reported_once() {
        let dir = tempdir().unwrap();
        let host = Arc::new(ScriptedHost::default());
        let controller = coordinator(host.clone(), CopyTranscoder::default());
        let mut events = controller.events().subscribe();

        controller
            .start_recording("screen:0", settings_in(dir.path()), None)
            .await
            .unwrap();

        // Every write to /dev/full fails with ENOSPC
        let failing = ChunkWriter::create(Path::new("/dev/full")).await.unwrap();
        let previous = controller.inner.session.lock().writer.replace(failing);
        if let Some(previous) = previous {
            previous.close().await.unwrap();
        }

        let mut codes = Vec::new();
        for _ in 0..50 {
            controller.handle_recording_chunk(vec![0x1a; 64]);
            tokio::time::sleep(Duration::from_millis(20)).await;
            while let Ok(event) = events.try_recv() {
                if let RecordingEvent::Error { code, .. } = event {
                    codes.push(code);
                }
            }
            if !codes.is_empty() {
                break;
            }
        }
        for _ in 0..3 {
            controller.handle_recording_chunk(vec![0x1a; 64]);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        while let Ok(event) = events.try_recv() {
            if let RecordingEvent::Error { code, .. } = event {
                codes.push(code);
            }
        }

        assert_eq!(codes, vec!["IO_ERROR"]);
        assert_eq!(controller.phase(), SessionPhase::Recording);
    }

    #[tokio::test]
    async fn test_chunk_without_session_is_discarded() {
        let host = Arc::new(ScriptedHost::default());
        let controller = coordinator(host, CopyTranscoder::default());
        controller.handle_recording_chunk(vec![1, 2, 3]);
        assert_eq!(controller.phase(), SessionPhase::Idle);
    }
}
