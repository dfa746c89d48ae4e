//! Media processing between capture and encoding
//!
//! - Audio mixer merging microphone and system audio
//! - Compositor overlaying the webcam on the screen

pub mod canvas;
pub mod compositor;
pub mod mixer;

pub use compositor::{compose, CompositeOutput, DrawLoop};
pub use mixer::{AudioMixer, MixedAudio};
