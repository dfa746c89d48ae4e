//! Audio mixer
//!
//! Merges any number of audio tracks into one. A single input is passed
//! through as-is; two or more are summed in real time by a mixing context
//! that runs until it is closed.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::capture::{audio_track, AudioBuffer, AudioFeed, AudioTrack, OwnedAudioTrack};
use crate::utils::CancelToken;

pub const MIX_SAMPLE_RATE: u32 = 48_000;
pub const MIX_CHANNELS: u16 = 2;
pub const MIX_QUANTUM: Duration = Duration::from_millis(20);

const QUANTUM_FRAMES: usize = (MIX_SAMPLE_RATE as usize) / 50;
/// Buffered audio per input before the oldest samples are dropped
const MAX_QUEUED_SAMPLES: usize = MIX_SAMPLE_RATE as usize * MIX_CHANNELS as usize;

type InputQueue = Arc<Mutex<VecDeque<f32>>>;

/// Output of [`AudioMixer::mix`]
pub struct MixedAudio {
    pub track: AudioTrack,
    context: Option<MixingContext>,
}

impl MixedAudio {
    /// Whether a mixing context is running
    pub fn is_mixed(&self) -> bool {
        self.context.is_some()
    }

    /// Shut down the mixing context, if any. Inputs are left untouched.
    pub async fn close(self) {
        if let Some(context) = self.context {
            context.close().await;
        }
    }
}

/// Live mixing of two or more inputs into one track
struct MixingContext {
    cancel: CancelToken,
    mixer: JoinHandle<()>,
    inputs: Vec<JoinHandle<()>>,
    track: OwnedAudioTrack,
}

impl MixingContext {
    async fn close(self) {
        self.cancel.cancel();
        for input in &self.inputs {
            input.abort();
        }
        if let Err(e) = self.mixer.await {
            tracing::warn!("Audio mixer ended abnormally: {}", e);
        }
        self.track.stop();
        tracing::debug!("Audio mixing context closed");
    }
}

pub struct AudioMixer;

impl AudioMixer {
    /// 0 inputs: nothing. 1 input: that track. 2+: a new summed track.
    pub fn mix(tracks: &[AudioTrack]) -> Option<MixedAudio> {
        match tracks {
            [] => None,
            [single] => Some(MixedAudio {
                track: single.clone(),
                context: None,
            }),
            many => Some(Self::start_context(many)),
        }
    }

    fn start_context(tracks: &[AudioTrack]) -> MixedAudio {
        let (track, feed) = audio_track("mix", MIX_SAMPLE_RATE, MIX_CHANNELS);
        let cancel = CancelToken::new();
        let mut queues = Vec::with_capacity(tracks.len());
        let mut inputs = Vec::with_capacity(tracks.len());

        for input in tracks {
            let queue: InputQueue = Arc::new(Mutex::new(VecDeque::new()));
            match input.subscribe() {
                Some(rx) => {
                    inputs.push(tokio::spawn(forward_input(
                        input.label().to_string(),
                        rx,
                        queue.clone(),
                    )));
                    queues.push(queue);
                }
                None => tracing::warn!("Skipping ended audio track {}", input.label()),
            }
        }

        tracing::info!("Mixing {} audio tracks", queues.len());

        let mixer = tokio::spawn(mix_loop(queues, feed, cancel.clone()));
        MixedAudio {
            track: track.handle(),
            context: Some(MixingContext {
                cancel,
                mixer,
                inputs,
                track,
            }),
        }
    }
}

async fn forward_input(
    label: String,
    mut rx: tokio::sync::broadcast::Receiver<Arc<AudioBuffer>>,
    queue: InputQueue,
) {
    let mut converter = MixFormatConverter::new();
    loop {
        match rx.recv().await {
            Ok(buffer) => {
                let samples = converter.convert(&buffer);
                let mut queue = queue.lock();
                queue.extend(samples);
                let excess = queue.len().saturating_sub(MAX_QUEUED_SAMPLES);
                if excess > 0 {
                    queue.drain(..excess);
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("Mixer input {} lagged, {} buffers skipped", label, skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
}

async fn mix_loop(queues: Vec<InputQueue>, feed: AudioFeed, cancel: CancelToken) {
    let mut ticker = tokio::time::interval(MIX_QUANTUM);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let quantum_samples = QUANTUM_FRAMES * MIX_CHANNELS as usize;

    loop {
        ticker.tick().await;
        if cancel.is_cancelled() {
            break;
        }

        let mut out = vec![0.0f32; quantum_samples];
        for queue in &queues {
            let mut queue = queue.lock();
            let take = queue.len().min(quantum_samples);
            for (slot, sample) in out.iter_mut().zip(queue.drain(..take)) {
                *slot += sample;
            }
        }
        for sample in &mut out {
            *sample = sample.clamp(-1.0, 1.0);
        }

        if !feed.push(out) {
            break;
        }
    }

    feed.end();
}

/// Converts one input stream to interleaved 48 kHz stereo.
/// Keeps the resampling phase between buffers so a continuous stream stays in step.
#[derive(Debug, Default)]
pub struct MixFormatConverter {
    resampler: Option<StereoResampler>,
}

impl MixFormatConverter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn convert(&mut self, buffer: &AudioBuffer) -> Vec<f32> {
        let channels = buffer.channels as usize;
        if channels == 0 || buffer.samples.is_empty() {
            return Vec::new();
        }

        let stereo: Vec<f32> = match channels {
            1 => buffer.samples.iter().flat_map(|&s| [s, s]).collect(),
            2 => buffer.samples.clone(),
            n => buffer
                .samples
                .chunks_exact(n)
                .flat_map(|frame| [frame[0], frame[1]])
                .collect(),
        };

        if buffer.sample_rate == MIX_SAMPLE_RATE || buffer.sample_rate == 0 {
            self.resampler = None;
            return stereo;
        }

        if self.resampler.as_ref().map(|r| r.from) != Some(buffer.sample_rate) {
            self.resampler = Some(StereoResampler::new(buffer.sample_rate, MIX_SAMPLE_RATE));
        }
        match self.resampler.as_mut() {
            Some(resampler) => resampler.process(&stereo),
            None => stereo,
        }
    }
}

/// Streaming linear interpolation resampler for interleaved stereo
#[derive(Debug)]
struct StereoResampler {
    from: u32,
    step: f64,
    /// Read position in input frames; -1 is the last frame of the previous buffer
    pos: f64,
    prev: [f32; 2],
}

impl StereoResampler {
    fn new(from: u32, to: u32) -> Self {
        Self {
            from,
            step: from as f64 / to as f64,
            pos: 0.0,
            prev: [0.0; 2],
        }
    }

    fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let in_frames = samples.len() / 2;
        if in_frames == 0 {
            return Vec::new();
        }

        let frame = |i: isize| -> [f32; 2] {
            if i < 0 {
                self.prev
            } else {
                let i = i as usize;
                [samples[i * 2], samples[i * 2 + 1]]
            }
        };

        let last = (in_frames - 1) as f64;
        let mut out = Vec::with_capacity(((in_frames as f64 / self.step) as usize + 1) * 2);
        let mut pos = self.pos;
        while pos < last {
            let idx = pos.floor();
            let frac = (pos - idx) as f32;
            let a = frame(idx as isize);
            let b = frame(idx as isize + 1);
            for c in 0..2 {
                out.push(a[c] + (b[c] - a[c]) * frac);
            }
            pos += self.step;
        }

        self.pos = pos - in_frames as f64;
        self.prev = frame(in_frames as isize - 1);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn next_non_silent(rx: &mut tokio::sync::broadcast::Receiver<Arc<AudioBuffer>>) -> Arc<AudioBuffer> {
        for _ in 0..20 {
            let buffer = rx.recv().await.unwrap();
            if buffer.samples.iter().any(|&s| s != 0.0) {
                return buffer;
            }
        }
        panic!("mixer produced only silence");
    }

    #[test]
    fn test_mix_none_and_single() {
        assert!(AudioMixer::mix(&[]).is_none());

        let (mic, _feed) = audio_track("mic", 48_000, 1);
        let mixed = AudioMixer::mix(&[mic.handle()]).unwrap();
        assert!(mixed.track.same_track(&mic.handle()));
        assert!(!mixed.is_mixed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_mix_two_tracks_sums_and_clamps() {
        let (system, system_feed) = audio_track("system", 48_000, 2);
        let (mic, mic_feed) = audio_track("mic", 48_000, 2);

        let mixed = AudioMixer::mix(&[system.handle(), mic.handle()]).unwrap();
        assert!(mixed.is_mixed());
        assert!(!mixed.track.same_track(&system.handle()));
        assert!(!mixed.track.same_track(&mic.handle()));
        assert_eq!(mixed.track.sample_rate(), MIX_SAMPLE_RATE);

        let mut rx = mixed.track.subscribe().unwrap();
        system_feed.push(vec![0.25; QUANTUM_FRAMES * 2]);
        mic_feed.push(vec![0.5; QUANTUM_FRAMES * 2]);

        let buffer = next_non_silent(&mut rx).await;
        assert!((buffer.samples[0] - 0.75).abs() < 1e-6);

        system_feed.push(vec![0.9; QUANTUM_FRAMES * 2]);
        mic_feed.push(vec![0.9; QUANTUM_FRAMES * 2]);
        let buffer = next_non_silent(&mut rx).await;
        assert_eq!(buffer.samples[0], 1.0);

        let out = mixed.track.clone();
        mixed.close().await;
        assert!(out.is_ended());
        assert!(!system.is_ended());
    }

    #[test]
    fn test_convert_mono_upsamples_to_stereo() {
        let buffer = AudioBuffer {
            sample_rate: 24_000,
            channels: 1,
            samples: vec![0.5; 240],
        };
        let mut converter = MixFormatConverter::new();
        let first = converter.convert(&buffer);
        let second = converter.convert(&buffer);
        // The last input frame is held back until the next buffer arrives
        assert_eq!(first.len(), 478 * 2);
        assert_eq!(second.len(), 480 * 2);
        assert!(first.iter().chain(&second).all(|&s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_convert_drops_extra_channels() {
        let buffer = AudioBuffer {
            sample_rate: 48_000,
            channels: 4,
            samples: vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8],
        };
        assert_eq!(MixFormatConverter::new().convert(&buffer), vec![0.1, 0.2, 0.5, 0.6]);
    }

    #[test]
    fn test_resampling_does_not_drift_across_buffers() {
        // 441 frames at 44.1 kHz is exactly 480 frames at 48 kHz, but no
        // single 100-frame buffer maps onto a whole number of output frames
        let mut converter = MixFormatConverter::new();
        let mut produced = 0;
        let mut ramp = Vec::new();
        for block in 0..441 {
            let samples: Vec<f32> = (0..100)
                .flat_map(|i| {
                    let t = (block * 100 + i) as f32 / 44_100.0;
                    [t, t]
                })
                .collect();
            let out = converter.convert(&AudioBuffer {
                sample_rate: 44_100,
                channels: 2,
                samples,
            });
            produced += out.len() / 2;
            ramp.extend(out.into_iter().step_by(2));
        }

        // One second of input yields one second of output, give or take a frame
        assert!((47_999..=48_000).contains(&produced), "produced {}", produced);
        // The phase carries over buffer boundaries: output stays on the input ramp
        for (i, &value) in ramp.iter().enumerate() {
            let expected = i as f32 / 48_000.0;
            assert!((value - expected).abs() < 1e-4, "frame {}: {} vs {}", i, value, expected);
        }
    }
}
