//! Input/output level metering
//!
//! Levels feed the application's VU meters. The meter itself is a cheap
//! running peak tracker; [`LevelReporter`] paces the callbacks and decays a
//! direction to silence once it has been idle for a second.

use std::time::{Duration, Instant};

/// dB value reported for a fully silent (or idle) direction
pub const SILENCE_DB: f32 = -99.0;

/// Minimum spacing between level callbacks
const REPORT_INTERVAL: Duration = Duration::from_millis(100);

/// A direction is considered idle after this long without audio
const IDLE_AFTER: Duration = Duration::from_secs(1);

/// Convert a normalized level (0..1) to dB, with a floor for silence
///
/// Avoids calling log10 on zero, which yields -inf, or on negatives, which
/// yield NaN.
pub fn vol_to_db(level: f32) -> f32 {
    if level <= 0.0 {
        SILENCE_DB
    } else {
        level.log10() * 20.0
    }
}

/// Running peak-level tracker for one audio direction
#[derive(Debug, Clone, Default)]
pub struct LevelMeter {
    level: f32,
}

impl LevelMeter {
    /// Create a meter at silence
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one frame into the running level and return the updated value
    pub fn update(&mut self, samples: &[i16]) -> f32 {
        let mut big_sample = 0i32;
        for &sample in samples {
            let sample = i32::from(sample).abs();
            if sample > big_sample {
                big_sample = sample;
            }
        }
        self.level += (big_sample as f32 / 32767.0 - self.level) / 5.0;
        self.level
    }

    /// Current normalized level
    pub fn level(&self) -> f32 {
        self.level
    }

    /// Current level in dB
    pub fn db(&self) -> f32 {
        vol_to_db(self.level)
    }

    /// Force the meter to silence (used when VAD declares a frame silent)
    pub fn set_silent(&mut self) {
        self.level = 0.0;
    }
}

/// Paces level callbacks and tracks per-direction activity
#[derive(Debug)]
pub struct LevelReporter {
    last_report: Option<Instant>,
    last_input: Option<Instant>,
    last_output: Option<Instant>,
}

impl LevelReporter {
    /// Create a reporter with no activity recorded
    pub fn new() -> Self {
        Self {
            last_report: None,
            last_input: None,
            last_output: None,
        }
    }

    /// Record that input audio was just processed
    pub fn note_input(&mut self) {
        self.last_input = Some(Instant::now());
    }

    /// Record that output audio was just processed
    pub fn note_output(&mut self) {
        self.last_output = Some(Instant::now());
    }

    /// Ask for a level report; returns `(input_db, output_db)` when one is
    /// due, at most every 100 ms. Idle directions report [`SILENCE_DB`].
    pub fn poll(&mut self, input: &LevelMeter, output: &LevelMeter) -> Option<(f32, f32)> {
        self.poll_at(Instant::now(), input, output)
    }

    /// [`LevelReporter::poll`] with an explicit clock, for tests
    pub fn poll_at(
        &mut self,
        now: Instant,
        input: &LevelMeter,
        output: &LevelMeter,
    ) -> Option<(f32, f32)> {
        if let Some(last) = self.last_report {
            if now.duration_since(last) < REPORT_INTERVAL {
                return None;
            }
        }
        self.last_report = Some(now);

        let active = |mark: Option<Instant>| {
            mark.map(|t| now.duration_since(t) < IDLE_AFTER)
                .unwrap_or(false)
        };

        let input_db = if active(self.last_input) {
            input.db()
        } else {
            SILENCE_DB
        };
        let output_db = if active(self.last_output) {
            output.db()
        } else {
            SILENCE_DB
        };

        Some((input_db, output_db))
    }
}

impl Default for LevelReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vol_to_db_floor() {
        assert_eq!(vol_to_db(0.0), SILENCE_DB);
        assert_eq!(vol_to_db(-0.5), SILENCE_DB);
        assert!((vol_to_db(1.0) - 0.0).abs() < 1e-6);
        assert!((vol_to_db(0.1) - -20.0).abs() < 1e-4);
    }

    #[test]
    fn test_meter_converges_to_peak() {
        let mut meter = LevelMeter::new();
        let frame = vec![16384i16; 160];
        for _ in 0..100 {
            meter.update(&frame);
        }
        // 16384/32767 ~ 0.5 within 1%
        assert!((meter.level() - 0.5).abs() < 0.005, "{}", meter.level());
    }

    #[test]
    fn test_meter_set_silent() {
        let mut meter = LevelMeter::new();
        meter.update(&[32000; 10]);
        assert!(meter.level() > 0.0);
        meter.set_silent();
        assert_eq!(meter.db(), SILENCE_DB);
    }

    #[test]
    fn test_reporter_rate_limits() {
        let mut reporter = LevelReporter::new();
        let input = LevelMeter::new();
        let output = LevelMeter::new();
        let t0 = Instant::now();
        assert!(reporter.poll_at(t0, &input, &output).is_some());
        assert!(reporter
            .poll_at(t0 + Duration::from_millis(50), &input, &output)
            .is_none());
        assert!(reporter
            .poll_at(t0 + Duration::from_millis(150), &input, &output)
            .is_some());
    }

    #[test]
    fn test_reporter_idle_decays_to_silence() {
        let mut reporter = LevelReporter::new();
        let mut input = LevelMeter::new();
        input.update(&[32000; 10]);
        let output = LevelMeter::new();

        reporter.note_input();
        let t0 = Instant::now();
        let (input_db, output_db) = reporter.poll_at(t0, &input, &output).unwrap();
        assert!(input_db > SILENCE_DB);
        assert_eq!(output_db, SILENCE_DB);

        // No activity for over a second: input decays to silence too
        let (input_db, _) = reporter
            .poll_at(t0 + Duration::from_secs(2), &input, &output)
            .unwrap();
        assert_eq!(input_db, SILENCE_DB);
    }
}
