//! Live media tracks
//!
//! A track is a live handle to one capture source. The component that opened
//! the device holds the owning half ([`OwnedVideoTrack`] / [`OwnedAudioTrack`])
//! and is the only one able to release it. Everyone else works with cloneable
//! borrowed handles ([`VideoTrack`] / [`AudioTrack`]) that can read media and
//! compare identity but never stop the device.
//!
//! Video tracks publish the latest frame through a `watch` channel, so slow
//! readers skip frames instead of queueing them. Audio tracks publish every
//! buffer through a `broadcast` channel.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

/// Audio buffers kept for slow subscribers before they start lagging
const AUDIO_CHANNEL_CAPACITY: usize = 256;

/// A single RGBA video frame
#[derive(Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA, `width * height * 4` bytes
    pub data: Vec<u8>,
    /// Milliseconds since the track started
    pub timestamp_ms: u64,
}

impl VideoFrame {
    pub fn new(width: u32, height: u32, data: Vec<u8>, timestamp_ms: u64) -> Self {
        Self {
            width,
            height,
            data,
            timestamp_ms,
        }
    }

    /// Frame filled with a single colour
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let data = rgba
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();
        Self::new(width, height, data, 0)
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = ((y * self.width + x) * 4) as usize;
        [self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]]
    }
}

impl fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .field("timestamp_ms", &self.timestamp_ms)
            .finish()
    }
}

/// Interleaved f32 PCM
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl AudioBuffer {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }
}

type ReleaseHook = Box<dyn FnOnce() + Send>;

/// Identity, lifecycle and device release shared by both track kinds
struct TrackCore {
    id: Uuid,
    label: String,
    ended: AtomicBool,
    release: Mutex<Option<ReleaseHook>>,
}

impl TrackCore {
    fn new(label: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            label,
            ended: AtomicBool::new(false),
            release: Mutex::new(None),
        }
    }

    fn mark_ended(&self) -> bool {
        !self.ended.swap(true, Ordering::SeqCst)
    }

    fn release(&self) {
        if let Some(hook) = self.release.lock().take() {
            tracing::debug!("Releasing device for track {}", self.label);
            hook();
        }
    }
}

struct VideoInner {
    core: TrackCore,
    tx: Mutex<Option<watch::Sender<Option<Arc<VideoFrame>>>>>,
}

impl VideoInner {
    fn close(&self) {
        if self.core.mark_ended() {
            self.tx.lock().take();
        }
    }
}

struct AudioInner {
    core: TrackCore,
    sample_rate: u32,
    channels: u16,
    tx: Mutex<Option<broadcast::Sender<Arc<AudioBuffer>>>>,
}

impl AudioInner {
    fn close(&self) {
        if self.core.mark_ended() {
            self.tx.lock().take();
        }
    }
}

/// Create a video track. The owning half goes to whoever opened the device,
/// the feed to the thread producing frames.
pub fn video_track(label: impl Into<String>) -> (OwnedVideoTrack, VideoFeed) {
    let (tx, _) = watch::channel(None);
    let inner = Arc::new(VideoInner {
        core: TrackCore::new(label.into()),
        tx: Mutex::new(Some(tx)),
    });
    (
        OwnedVideoTrack {
            track: VideoTrack {
                inner: inner.clone(),
            },
        },
        VideoFeed { inner },
    )
}

/// Create an audio track with a fixed native format
pub fn audio_track(
    label: impl Into<String>,
    sample_rate: u32,
    channels: u16,
) -> (OwnedAudioTrack, AudioFeed) {
    let (tx, _) = broadcast::channel(AUDIO_CHANNEL_CAPACITY);
    let inner = Arc::new(AudioInner {
        core: TrackCore::new(label.into()),
        sample_rate,
        channels,
        tx: Mutex::new(Some(tx)),
    });
    (
        OwnedAudioTrack {
            track: AudioTrack {
                inner: inner.clone(),
            },
        },
        AudioFeed { inner },
    )
}

/// Borrowed handle to a video track
#[derive(Clone)]
pub struct VideoTrack {
    inner: Arc<VideoInner>,
}

impl VideoTrack {
    pub fn id(&self) -> Uuid {
        self.inner.core.id
    }

    pub fn label(&self) -> &str {
        &self.inner.core.label
    }

    /// Both handles refer to the same underlying track
    pub fn same_track(&self, other: &VideoTrack) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn is_ended(&self) -> bool {
        self.inner.core.ended.load(Ordering::SeqCst)
    }

    /// Receiver of the latest frame; `None` once the track has ended
    pub fn subscribe(&self) -> Option<watch::Receiver<Option<Arc<VideoFrame>>>> {
        self.inner.tx.lock().as_ref().map(|tx| tx.subscribe())
    }

    /// Most recently published frame
    pub fn latest(&self) -> Option<Arc<VideoFrame>> {
        self.inner
            .tx
            .lock()
            .as_ref()
            .and_then(|tx| tx.borrow().clone())
    }
}

impl fmt::Debug for VideoTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoTrack")
            .field("id", &self.id())
            .field("label", &self.label())
            .field("ended", &self.is_ended())
            .finish()
    }
}

/// Owning half of a video track; releases the device on `stop` or drop
pub struct OwnedVideoTrack {
    track: VideoTrack,
}

impl OwnedVideoTrack {
    /// Register the action that frees the underlying device
    pub fn on_release(&self, hook: impl FnOnce() + Send + 'static) {
        *self.track.inner.core.release.lock() = Some(Box::new(hook));
    }

    pub fn handle(&self) -> VideoTrack {
        self.track.clone()
    }

    /// End the track and release the device. Safe to call more than once.
    pub fn stop(&self) {
        self.track.inner.close();
        self.track.inner.core.release();
    }
}

impl std::ops::Deref for OwnedVideoTrack {
    type Target = VideoTrack;

    fn deref(&self) -> &VideoTrack {
        &self.track
    }
}

impl Drop for OwnedVideoTrack {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Producer side of a video track
pub struct VideoFeed {
    inner: Arc<VideoInner>,
}

impl VideoFeed {
    /// Publish a frame. Returns false once the track has ended.
    pub fn push(&self, frame: VideoFrame) -> bool {
        match self.inner.tx.lock().as_ref() {
            Some(tx) => {
                tx.send_replace(Some(Arc::new(frame)));
                true
            }
            None => false,
        }
    }

    pub fn is_ended(&self) -> bool {
        self.inner.core.ended.load(Ordering::SeqCst)
    }

    /// Source went away; readers see the track end
    pub fn end(&self) {
        self.inner.close();
    }
}

/// Borrowed handle to an audio track
#[derive(Clone)]
pub struct AudioTrack {
    inner: Arc<AudioInner>,
}

impl AudioTrack {
    pub fn id(&self) -> Uuid {
        self.inner.core.id
    }

    pub fn label(&self) -> &str {
        &self.inner.core.label
    }

    pub fn same_track(&self, other: &AudioTrack) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn is_ended(&self) -> bool {
        self.inner.core.ended.load(Ordering::SeqCst)
    }

    pub fn sample_rate(&self) -> u32 {
        self.inner.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.inner.channels
    }

    /// Receiver of every buffer published from now on; `None` once ended
    pub fn subscribe(&self) -> Option<broadcast::Receiver<Arc<AudioBuffer>>> {
        self.inner.tx.lock().as_ref().map(|tx| tx.subscribe())
    }
}

impl fmt::Debug for AudioTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioTrack")
            .field("id", &self.id())
            .field("label", &self.label())
            .field("sample_rate", &self.sample_rate())
            .field("channels", &self.channels())
            .finish()
    }
}

/// Owning half of an audio track
pub struct OwnedAudioTrack {
    track: AudioTrack,
}

impl OwnedAudioTrack {
    pub fn on_release(&self, hook: impl FnOnce() + Send + 'static) {
        *self.track.inner.core.release.lock() = Some(Box::new(hook));
    }

    pub fn handle(&self) -> AudioTrack {
        self.track.clone()
    }

    pub fn stop(&self) {
        self.track.inner.close();
        self.track.inner.core.release();
    }
}

impl std::ops::Deref for OwnedAudioTrack {
    type Target = AudioTrack;

    fn deref(&self) -> &AudioTrack {
        &self.track
    }
}

impl Drop for OwnedAudioTrack {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Producer side of an audio track
pub struct AudioFeed {
    inner: Arc<AudioInner>,
}

impl AudioFeed {
    pub fn sample_rate(&self) -> u32 {
        self.inner.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.inner.channels
    }

    /// Publish interleaved samples in the track's native format.
    /// Returns false once the track has ended.
    pub fn push(&self, samples: Vec<f32>) -> bool {
        match self.inner.tx.lock().as_ref() {
            Some(tx) => {
                // No subscribers is not an error; the buffer is simply dropped
                let _ = tx.send(Arc::new(AudioBuffer {
                    sample_rate: self.inner.sample_rate,
                    channels: self.inner.channels,
                    samples,
                }));
                true
            }
            None => false,
        }
    }

    pub fn is_ended(&self) -> bool {
        self.inner.core.ended.load(Ordering::SeqCst)
    }

    pub fn end(&self) {
        self.inner.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_borrowed_handles_share_identity() {
        let (owned, _feed) = video_track("screen");
        let a = owned.handle();
        let b = a.clone();
        assert!(a.same_track(&b));

        let (other, _other_feed) = video_track("screen");
        assert!(!a.same_track(&other.handle()));
    }

    #[test]
    fn test_stop_releases_once() {
        let released = Arc::new(AtomicUsize::new(0));
        let (owned, feed) = audio_track("mic", 48_000, 2);
        let counter = released.clone();
        owned.on_release(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let handle = owned.handle();
        owned.stop();
        owned.stop();
        drop(owned);

        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(handle.is_ended());
        assert!(handle.subscribe().is_none());
        assert!(!feed.push(vec![0.0; 4]));
    }

    #[tokio::test]
    async fn test_video_feed_publishes_latest_frame() {
        let (owned, feed) = video_track("screen");
        let mut rx = owned.subscribe().unwrap();

        feed.push(VideoFrame::solid(2, 2, [1, 2, 3, 255]));
        rx.changed().await.unwrap();
        let frame = rx.borrow_and_update().clone().unwrap();
        assert_eq!(frame.pixel(1, 1), [1, 2, 3, 255]);

        feed.end();
        assert!(rx.changed().await.is_err());
        assert!(owned.is_ended());
    }
}
