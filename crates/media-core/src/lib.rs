//! # Media-Core: audio processing for the riax softphone core
//!
//! This crate owns everything that happens to PCM between the audio device
//! and the codec layer:
//!
//! - [`processing::Preprocessor`] — per-frame-size-class voice activity
//!   detection and gain control with an internal loudness estimate
//! - [`processing::Normalizer`] — smoothed-peak loudness normalization with
//!   soft clipping on the transmit path
//! - [`processing::LevelMeter`] — input/output level metering for UI
//!   callbacks
//! - [`audio::AudioBackend`] — the audio-I/O capability the engine drives,
//!   plus a ring-buffer-backed mock for tests
//!
//! The DSP here is deliberately time-domain and allocation-free in the per
//! frame paths; it runs inside the engine's locked service cycle and must
//! never block.

pub mod audio;
pub mod error;
pub mod processing;

pub use audio::{AudioBackend, AudioDeviceInfo, MockAudioBackend, MockAudioHandle, Sound};
pub use error::{MediaError, MediaResult};
pub use processing::{
    detect_onset, vol_to_db, Filters, FrameSizeClass, LevelMeter, LevelReporter, Normalizer,
    NormalizerConfig, OnsetConfig, Preprocessor, PreprocessorBank, PreprocessorConfig, SILENCE_DB,
};
