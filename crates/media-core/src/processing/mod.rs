//! Frame-level audio processing stages
//!
//! The transmit pipeline runs these in order: [`Normalizer`] on the raw
//! frame, then the frame-class [`Preprocessor`] for the voice-activity
//! decision, with [`detect_onset`] as an override so the first phoneme of an
//! utterance never gets clipped.

mod level;
mod normalizer;
mod preprocessor;

pub use level::{vol_to_db, LevelMeter, LevelReporter, SILENCE_DB};
pub use normalizer::{detect_onset, soft_clip, Normalizer, NormalizerConfig, OnsetConfig};
pub use preprocessor::{
    FrameSizeClass, Preprocessor, PreprocessorBank, PreprocessorConfig, SMALL_FRAME_LIMIT,
};

use serde::{Deserialize, Serialize};

/// The set of audio filters the pipeline applies.
///
/// These are runtime-togglable; flipping one reconfigures the live
/// preprocessor instances without recreating them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filters {
    /// Digital automatic gain control inside the preprocessor
    pub agc: bool,
    /// Noise suppression of non-speech frames
    pub denoise: bool,
    /// Slow analog-gain feedback from the preprocessor's loudness estimate
    /// to the input device level
    pub analog_agc: bool,
    /// Send a comfort-noise indication on silence onset instead of going
    /// quiet abruptly
    pub comfort_noise: bool,
    /// Echo cancellation (reserved; no DSP behind it yet)
    pub echo_cancel: bool,
}

impl Default for Filters {
    fn default() -> Self {
        Self {
            agc: true,
            denoise: true,
            analog_agc: true,
            comfort_noise: true,
            echo_cancel: false,
        }
    }
}

impl Filters {
    /// All filters off, as used by the push-to-talk capture path
    pub fn none() -> Self {
        Self {
            agc: false,
            denoise: false,
            analog_agc: false,
            comfort_noise: false,
            echo_cancel: false,
        }
    }
}
