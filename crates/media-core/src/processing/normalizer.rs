//! Transmit-side loudness normalization and voice-onset detection
//!
//! The normalizer keeps transmitted speech at a consistent level: a smoothed
//! peak detector, a smoothed gain toward a target level, and a soft clipper
//! so pushed-up peaks degrade gracefully instead of wrapping.

use serde::{Deserialize, Serialize};

/// Normalizer tuning. All values are named, overridable defaults.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizerConfig {
    /// Target level as a fraction of full scale (about -3 dB)
    pub target_level: f32,
    /// Smoothing factor for the peak detector
    pub level_smoothing: f32,
    /// Smoothing factor for gain changes
    pub gain_smoothing: f32,
    /// Gain ceiling, limits noise amplification on quiet input
    pub max_gain: f32,
    /// Peak level below which gain is left alone (no signal present)
    pub min_signal: f32,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            target_level: 0.7,
            level_smoothing: 0.95,
            gain_smoothing: 0.98,
            max_gain: 4.0,
            min_signal: 0.01,
        }
    }
}

/// Loudness normalizer for the transmit path
#[derive(Debug)]
pub struct Normalizer {
    config: NormalizerConfig,
    peak: f32,
    gain: f32,
}

impl Normalizer {
    /// Create a normalizer at unity gain
    pub fn new(config: NormalizerConfig) -> Self {
        Self {
            config,
            peak: 0.0,
            gain: 1.0,
        }
    }

    /// Normalize one frame in place
    pub fn process(&mut self, buffer: &mut [i16]) {
        let mut max_level = 0.0f32;
        for &sample in buffer.iter() {
            let abs_sample = (f32::from(sample) / 32768.0).abs();
            if abs_sample > max_level {
                max_level = abs_sample;
            }
        }

        self.peak =
            self.config.level_smoothing * self.peak + (1.0 - self.config.level_smoothing) * max_level;

        // Only adjust gain when signal is present
        if self.peak > self.config.min_signal {
            let target_gain = (self.config.target_level / self.peak).min(self.config.max_gain);
            self.gain = self.config.gain_smoothing * self.gain
                + (1.0 - self.config.gain_smoothing) * target_gain;
        }

        for sample in buffer.iter_mut() {
            *sample = soft_clip(f32::from(*sample) * self.gain);
        }
    }

    /// Current smoothed gain
    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Current smoothed peak level (fraction of full scale)
    pub fn peak(&self) -> f32 {
        self.peak
    }

    /// Reset gain tracking, e.g. after a tuning change
    pub fn reset(&mut self) {
        self.gain = 1.0;
        self.peak = 0.1;
    }
}

/// Soft-clip one sample to the i16 range.
///
/// Samples beyond ±32000 are compressed with an exponential knee toward
/// ±32768, then hard-limited so the result always fits.
pub fn soft_clip(sample: f32) -> i16 {
    let mut sample = sample;
    if sample > 32000.0 {
        let excess = sample - 32000.0;
        sample = 32000.0 + (1.0 - (-0.1 * excess / 768.0).exp()) * 768.0;
    } else if sample < -32000.0 {
        let excess = -sample - 32000.0;
        sample = -32000.0 - (1.0 - (-0.1 * excess / 768.0).exp()) * 768.0;
    }

    sample.clamp(-32768.0, 32767.0) as i16
}

/// Voice-onset detector tuning. Empirically tuned; override rather than
/// re-derive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OnsetConfig {
    /// How many leading samples to scan
    pub window: usize,
    /// Absolute sample value that alone indicates an onset
    pub peak_threshold: i32,
    /// Sample-to-sample delta that counts as a transient
    pub transient_delta: i32,
    /// Number of transients that together indicate an onset
    pub transient_count: usize,
}

impl Default for OnsetConfig {
    fn default() -> Self {
        Self {
            window: 30,
            peak_threshold: 2000,
            transient_delta: 300,
            transient_count: 3,
        }
    }
}

/// Scan the head of a frame for voice-onset markers (a sharp peak or
/// repeated transients). Used to override a "silent" VAD verdict so the
/// first phoneme of an utterance is not clipped.
pub fn detect_onset(config: &OnsetConfig, frame: &[i16]) -> bool {
    let mut max_sample = 0i32;
    let mut transient_count = 0usize;
    let mut prev_sample = 0i32;

    for &sample in frame.iter().take(config.window) {
        let value = i32::from(sample);
        let abs_value = value.abs();
        if abs_value > max_sample {
            max_sample = abs_value;
        }
        if (value - prev_sample).abs() > config.transient_delta {
            transient_count += 1;
        }
        prev_sample = value;
    }

    max_sample > config.peak_threshold || transient_count >= config.transient_count
}
