//! Ring-buffer-backed mock audio backend
//!
//! Models the production arrangement: a real-time callback context on one
//! side of two lock-free SPSC rings, the engine on the other. Tests (or a
//! simulated device) hold the [`MockAudioHandle`] and push capture audio /
//! pull playback audio; the engine sees a normal [`AudioBackend`].

use parking_lot::Mutex;
use ringbuf::{HeapConsumer, HeapProducer, HeapRb};
use std::sync::Arc;

use super::{AudioBackend, AudioDeviceInfo, Sound};
use crate::error::{MediaError, MediaResult};

/// Ring capacity: one second of audio at 8 kHz
const RING_CAPACITY: usize = 8000;

#[derive(Debug, Default)]
struct MockControl {
    started: bool,
    start_count: u32,
    stop_count: u32,
    playing_sounds: Vec<u32>,
}

/// The engine-facing side of the mock
pub struct MockAudioBackend {
    capture_rx: HeapConsumer<i16>,
    playback_tx: HeapProducer<i16>,
    control: Arc<Mutex<MockControl>>,
    input_level: f32,
    output_level: f32,
    next_sound_id: u32,
    devices: Vec<AudioDeviceInfo>,
    selected: (usize, usize, usize),
}

/// The "hardware" side of the mock, held by tests
pub struct MockAudioHandle {
    /// Push captured samples here; the engine reads them via `input`
    pub capture_tx: HeapProducer<i16>,
    /// Pop played samples here; the engine writes them via `output`
    pub playback_rx: HeapConsumer<i16>,
    control: Arc<Mutex<MockControl>>,
}

impl MockAudioHandle {
    /// Whether the engine currently has the streams started
    pub fn is_started(&self) -> bool {
        self.control.lock().started
    }

    /// How many times `start` was called
    pub fn start_count(&self) -> u32 {
        self.control.lock().start_count
    }

    /// How many times `stop` was called
    pub fn stop_count(&self) -> u32 {
        self.control.lock().stop_count
    }

    /// Ids of sounds currently playing
    pub fn playing_sounds(&self) -> Vec<u32> {
        self.control.lock().playing_sounds.clone()
    }
}

impl MockAudioBackend {
    /// Create the backend and its hardware-side handle
    pub fn new() -> (Self, MockAudioHandle) {
        let (capture_tx, capture_rx) = HeapRb::<i16>::new(RING_CAPACITY).split();
        let (playback_tx, playback_rx) = HeapRb::<i16>::new(RING_CAPACITY).split();
        let control = Arc::new(Mutex::new(MockControl::default()));

        let backend = Self {
            capture_rx,
            playback_tx,
            control: control.clone(),
            input_level: 0.5,
            output_level: 0.5,
            next_sound_id: 1,
            devices: vec![
                AudioDeviceInfo {
                    index: 0,
                    name: "mock input".into(),
                    can_input: true,
                    can_output: false,
                    can_ring: false,
                    is_default: true,
                },
                AudioDeviceInfo {
                    index: 1,
                    name: "mock output".into(),
                    can_input: false,
                    can_output: true,
                    can_ring: true,
                    is_default: true,
                },
            ],
            selected: (0, 1, 1),
        };

        let handle = MockAudioHandle {
            capture_tx,
            playback_rx,
            control,
        };

        (backend, handle)
    }
}

impl AudioBackend for MockAudioBackend {
    fn start(&mut self) -> MediaResult<()> {
        let mut control = self.control.lock();
        if !control.started {
            control.started = true;
            control.start_count += 1;
        }
        Ok(())
    }

    fn stop(&mut self) -> MediaResult<()> {
        let mut control = self.control.lock();
        if control.started {
            control.started = false;
            control.stop_count += 1;
        }
        Ok(())
    }

    fn input(&mut self, buf: &mut [i16]) -> MediaResult<usize> {
        if !self.control.lock().started {
            return Ok(0);
        }
        // All-or-nothing, like the portaudio path: a partial frame stays
        // buffered until the rest of it has been captured.
        if self.capture_rx.len() < buf.len() {
            return Ok(0);
        }
        Ok(self.capture_rx.pop_slice(buf))
    }

    fn output(&mut self, samples: &[i16]) -> MediaResult<()> {
        let written = self.playback_tx.push_slice(samples);
        if written < samples.len() {
            tracing::debug!(
                dropped = samples.len() - written,
                "playback ring full, dropping samples"
            );
        }
        Ok(())
    }

    fn input_level(&self) -> f32 {
        self.input_level
    }

    fn set_input_level(&mut self, level: f32) -> MediaResult<()> {
        if !(0.0..=1.0).contains(&level) {
            return Err(MediaError::InvalidLevel { level });
        }
        self.input_level = level;
        Ok(())
    }

    fn output_level(&self) -> f32 {
        self.output_level
    }

    fn set_output_level(&mut self, level: f32) -> MediaResult<()> {
        if !(0.0..=1.0).contains(&level) {
            return Err(MediaError::InvalidLevel { level });
        }
        self.output_level = level;
        Ok(())
    }

    fn play_sound(&mut self, _sound: &Sound, _ring: bool) -> MediaResult<u32> {
        let id = self.next_sound_id;
        self.next_sound_id += 1;
        self.control.lock().playing_sounds.push(id);
        Ok(id)
    }

    fn stop_sound(&mut self, id: u32) -> MediaResult<()> {
        let mut control = self.control.lock();
        let before = control.playing_sounds.len();
        control.playing_sounds.retain(|&s| s != id);
        if control.playing_sounds.len() == before {
            return Err(MediaError::NoSuchSound { id });
        }
        Ok(())
    }

    fn devices(&self) -> Vec<AudioDeviceInfo> {
        self.devices.clone()
    }

    fn select_devices(&mut self, input: usize, output: usize, ring: usize) -> MediaResult<()> {
        for index in [input, output, ring] {
            if !self.devices.iter().any(|d| d.index == index) {
                return Err(MediaError::NoSuchDevice { index });
            }
        }
        self.selected = (input, output, ring);
        Ok(())
    }

    fn selected_devices(&self) -> (usize, usize, usize) {
        self.selected
    }
}
