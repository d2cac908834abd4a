//! Voice-activity detection and gain control
//!
//! Capture frames arrive in two size classes depending on the codec and the
//! driver (roughly 85-sample and 160-sample buffers). Adaptive state like
//! the noise floor is frame-size dependent, so each class gets its own
//! long-lived [`Preprocessor`] instance, created on the first frame of its
//! class and only ever reconfigured afterwards. [`PreprocessorBank`] owns
//! the pair.

use serde::{Deserialize, Serialize};

use super::Filters;

/// Frames shorter than this many samples use the small instance
pub const SMALL_FRAME_LIMIT: usize = 100;

/// Frame-size class selecting one of the two preprocessor instances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameSizeClass {
    /// Short capture buffers (< 100 samples)
    Small,
    /// Standard 20 ms and larger buffers
    Large,
}

impl FrameSizeClass {
    /// Classify a frame by sample count
    pub fn classify(samples: usize) -> Self {
        if samples < SMALL_FRAME_LIMIT {
            Self::Small
        } else {
            Self::Large
        }
    }
}

/// Tuning for one preprocessor instance.
///
/// The probabilities are percentages: speech starts when the per-frame
/// speech probability reaches `prob_start` and is sustained while it stays
/// at or above `prob_continue`. Continuing speech is easier to sustain than
/// to trigger, which avoids clipping word endings. All values are
/// empirically tuned defaults; override them rather than re-deriving.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PreprocessorConfig {
    /// Always make a VAD decision
    pub vad: bool,
    /// Digital automatic gain control
    pub agc: bool,
    /// Attenuate frames classified as noise
    pub denoise: bool,
    /// Dereverberation decay factor
    pub dereverb_decay: f32,
    /// Dereverberation level
    pub dereverb_level: f32,
    /// Speech probability (percent) needed to start speech
    pub prob_start: u8,
    /// Speech probability (percent) needed to continue speech
    pub prob_continue: u8,
    /// AGC loudness target in sample-amplitude units
    pub agc_target: f32,
    /// Maximum AGC gain factor
    pub agc_max_gain: f32,
}

impl Default for PreprocessorConfig {
    fn default() -> Self {
        Self {
            vad: true,
            agc: true,
            denoise: true,
            dereverb_decay: 0.5,
            dereverb_level: 0.35,
            prob_start: 30,
            prob_continue: 25,
            agc_target: 12000.0,
            agc_max_gain: 25.0,
        }
    }
}

impl PreprocessorConfig {
    /// Derive a config from the active filter set, VAD always on
    pub fn from_filters(filters: &Filters) -> Self {
        Self {
            agc: filters.agc,
            denoise: filters.denoise,
            ..Self::default()
        }
    }
}

/// One voice-activity / gain-control instance
///
/// State persists for the process lifetime: the noise floor and loudness
/// estimates take dozens of frames to converge and must survive filter
/// toggles and call boundaries.
#[derive(Debug)]
pub struct Preprocessor {
    frame_size: usize,
    sample_rate: u32,
    config: PreprocessorConfig,
    noise_floor: f32,
    loudness: f32,
    agc_gain: f32,
    speaking: bool,
}

/// Attenuation applied to noise frames when denoise is on
const DENOISE_ATTENUATION: f32 = 0.1;

impl Preprocessor {
    /// Create an instance for one frame-size class
    pub fn new(frame_size: usize, sample_rate: u32, config: PreprocessorConfig) -> Self {
        tracing::debug!(
            frame_size,
            sample_rate,
            "created {:?}-frame preprocessor",
            FrameSizeClass::classify(frame_size)
        );
        Self {
            frame_size,
            sample_rate,
            config,
            noise_floor: 0.0,
            loudness: 0.0,
            agc_gain: 1.0,
            speaking: false,
        }
    }

    /// Update filter flags without touching adaptive state
    pub fn reconfigure(&mut self, config: PreprocessorConfig) {
        self.config = config;
    }

    /// The frame size this instance was created for
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// The sample rate this instance was created for
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Smoothed loudness estimate in sample-amplitude units, fed to the
    /// analog-gain feedback loop
    pub fn loudness(&self) -> f32 {
        self.loudness
    }

    /// Process one frame in place.
    ///
    /// Returns `true` when the frame is speech. Applies AGC and denoise per
    /// the active config before the decision is returned.
    pub fn process(&mut self, frame: &mut [i16]) -> bool {
        let (rms, peak) = frame_energy(frame);

        self.track_noise_floor(rms);
        let speech = self.vad_decision(rms);

        if speech || !self.config.vad {
            // Loudness follows the signal only while someone is talking;
            // silence must not drag the estimate down between words.
            self.loudness = 0.95 * self.loudness + 0.05 * peak;
        }

        if self.config.agc {
            self.apply_agc(frame, peak);
        }

        if self.config.denoise && !speech {
            for sample in frame.iter_mut() {
                *sample = (f32::from(*sample) * DENOISE_ATTENUATION) as i16;
            }
        }

        speech
    }

    /// Adaptive minimum tracking: fall quickly onto quieter frames, drift
    /// upward slowly so a changed noise environment is re-learned.
    fn track_noise_floor(&mut self, rms: f32) {
        if self.noise_floor == 0.0 {
            self.noise_floor = rms.max(1.0);
        } else if rms < self.noise_floor {
            self.noise_floor = 0.8 * self.noise_floor + 0.2 * rms;
        } else {
            self.noise_floor = (self.noise_floor * 1.008) + 1.0;
        }
        self.noise_floor = self.noise_floor.max(1.0);
    }

    fn vad_decision(&mut self, rms: f32) -> bool {
        if !self.config.vad {
            return true;
        }

        // Probability rises from 0 at the noise floor toward 100 as the
        // frame dominates it.
        let probability = if rms <= self.noise_floor {
            0.0
        } else {
            100.0 * (1.0 - self.noise_floor / rms)
        };

        let threshold = if self.speaking {
            f32::from(self.config.prob_continue)
        } else {
            f32::from(self.config.prob_start)
        };

        self.speaking = probability >= threshold;
        self.speaking
    }

    fn apply_agc(&mut self, frame: &mut [i16], peak: f32) {
        if self.loudness > 1.0 {
            let desired = (self.config.agc_target / self.loudness)
                .clamp(1.0 / self.config.agc_max_gain, self.config.agc_max_gain);
            self.agc_gain = 0.98 * self.agc_gain + 0.02 * desired;
        }

        // Never push the frame itself into clipping
        let mut gain = self.agc_gain;
        if peak * gain > 32767.0 {
            gain = 32767.0 / peak;
        }
        if (gain - 1.0).abs() < f32::EPSILON {
            return;
        }
        for sample in frame.iter_mut() {
            *sample = (f32::from(*sample) * gain).clamp(-32768.0, 32767.0) as i16;
        }
    }
}

fn frame_energy(frame: &[i16]) -> (f32, f32) {
    if frame.is_empty() {
        return (0.0, 0.0);
    }
    let mut sum_sq = 0.0f64;
    let mut peak = 0.0f32;
    for &sample in frame {
        let s = f32::from(sample).abs();
        if s > peak {
            peak = s;
        }
        sum_sq += f64::from(s) * f64::from(s);
    }
    ((sum_sq / frame.len() as f64).sqrt() as f32, peak)
}

/// The two long-lived preprocessor instances, keyed by frame-size class
#[derive(Debug)]
pub struct PreprocessorBank {
    config: PreprocessorConfig,
    small: Option<Preprocessor>,
    large: Option<Preprocessor>,
}

impl PreprocessorBank {
    /// Create an empty bank; instances appear lazily
    pub fn new(config: PreprocessorConfig) -> Self {
        Self {
            config,
            small: None,
            large: None,
        }
    }

    /// Process a frame through the instance for its size class, creating it
    /// on first use. Returns `true` for speech.
    pub fn process(&mut self, frame: &mut [i16], sample_rate: u32) -> bool {
        let class = FrameSizeClass::classify(frame.len());
        let config = self.config;
        let slot = match class {
            FrameSizeClass::Small => &mut self.small,
            FrameSizeClass::Large => &mut self.large,
        };
        let instance =
            slot.get_or_insert_with(|| Preprocessor::new(frame.len(), sample_rate, config));
        instance.process(frame)
    }

    /// Reconfigure both live instances (and future ones) on a filter change
    pub fn reconfigure(&mut self, config: PreprocessorConfig) {
        self.config = config;
        if let Some(instance) = self.small.as_mut() {
            instance.reconfigure(config);
        }
        if let Some(instance) = self.large.as_mut() {
            instance.reconfigure(config);
        }
    }

    /// Update just the filter flags, keeping probability and AGC tuning
    pub fn set_filters(&mut self, filters: &Filters) {
        let mut config = self.config;
        config.agc = filters.agc;
        config.denoise = filters.denoise;
        self.reconfigure(config);
    }

    /// Loudness estimate of the instance for a class, if it exists yet
    pub fn loudness(&self, class: FrameSizeClass) -> Option<f32> {
        let slot = match class {
            FrameSizeClass::Small => &self.small,
            FrameSizeClass::Large => &self.large,
        };
        slot.as_ref().map(Preprocessor::loudness)
    }

    /// Whether the instance for a class has been created
    pub fn has_instance(&self, class: FrameSizeClass) -> bool {
        match class {
            FrameSizeClass::Small => self.small.is_some(),
            FrameSizeClass::Large => self.large.is_some(),
        }
    }
}
