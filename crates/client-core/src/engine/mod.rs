//! The client engine: one lock, one loop
//!
//! All mutable state (the call table, registrations, preprocessor
//! instances, tuning knobs) lives in [`EngineState`] behind a single
//! `parking_lot::Mutex`. The main loop takes the lock, drains network
//! events, services audio, refreshes registrations about once a second,
//! releases the lock, then delivers whatever events were queued while it
//! was held. Public entry points follow the same discipline, so an
//! application callback never runs against a half-updated call table.

mod audio;
mod calls;
mod dispatch;
#[cfg(test)]
mod tests;

pub use calls::CallInfo;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use riax_codec_core::{FormatId, FormatSet};
use riax_media_core::{
    AudioBackend, Filters, LevelMeter, LevelReporter, Normalizer, NormalizerConfig, OnsetConfig,
    PreprocessorBank, PreprocessorConfig,
};

use crate::call::{Call, CallId};
use crate::events::{Event, EventAction, EventHandler, NullEventHandler, TextSeverity};
use crate::registration::Registration;
use crate::session::SessionEndpoint;
use crate::{ClientError, ClientResult};

/// Main loop cadence
const LOOP_SLEEP: Duration = Duration::from_millis(5);

/// Check registration refresh about once a second
const REFRESH_CHECK_ITERATIONS: u32 = 200;

/// Hard cap on one audio service read
pub(crate) const MAX_FRAME_SAMPLES: usize = 4096;

/// Comfort-noise level sent on silence onset
pub(crate) const COMFORT_NOISE_LEVEL: u8 = 10;

/// Mirrored-audio preferences and the send kill-switch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioPrefs {
    /// Mirror locally captured raw PCM to the application
    pub recv_local_raw: bool,
    /// Mirror locally encoded frames to the application
    pub recv_local_encoded: bool,
    /// Mirror received raw PCM to the application
    pub recv_remote_raw: bool,
    /// Mirror received encoded frames to the application
    pub recv_remote_encoded: bool,
    /// Never transmit audio, regardless of call state
    pub send_disable: bool,
}

/// Tuning for the slow analog-gain feedback loop.
///
/// Every `interval`-th voiced frame the preprocessor's loudness estimate is
/// compared against these thresholds and the input device level nudged with
/// plenty of hysteresis. The thresholds are empirically tuned; override
/// rather than re-derive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GainFeedbackConfig {
    /// Run the adjustment every this many voiced frames
    pub interval: u64,
    /// Loudness above which the level drops quickly
    pub hot_loudness: f32,
    /// Quick drop amount
    pub hot_step: f32,
    /// Level must exceed this for the quick drop
    pub hot_min_level: f32,
    /// Loudness above which the level drops slowly
    pub warm_loudness: f32,
    /// Slow drop amount
    pub warm_step: f32,
    /// Level must be at least this for the slow drop
    pub warm_min_level: f32,
    /// Loudness below which the level rises slowly
    pub cold_loudness: f32,
    /// Slow rise amount
    pub cold_step: f32,
    /// Level must not exceed this for the rise
    pub cold_max_level: f32,
}

impl Default for GainFeedbackConfig {
    fn default() -> Self {
        Self {
            interval: 64,
            hot_loudness: 16000.0,
            hot_step: 0.2,
            hot_min_level: 0.5,
            warm_loudness: 8000.0,
            warm_step: 0.1,
            warm_min_level: 0.15,
            cold_loudness: 4000.0,
            cold_step: 0.1,
            cold_max_level: 0.9,
        }
    }
}

/// Compute the next input device level from the loudness estimate, or
/// `None` when no adjustment is warranted. The result stays within
/// `[0, 1]`.
pub fn adjust_input_level(
    config: &GainFeedbackConfig,
    loudness: f32,
    level: f32,
) -> Option<f32> {
    let new_level = if loudness > config.hot_loudness && level > config.hot_min_level {
        // lower quickly if we're really too hot
        level - config.hot_step
    } else if loudness > config.warm_loudness && level >= config.warm_min_level {
        // lower less quickly if we're a bit too hot
        level - config.warm_step
    } else if loudness < config.cold_loudness && level <= config.cold_max_level {
        // raise slowly if we're cold
        level + config.cold_step
    } else {
        return None;
    };
    Some(new_level.clamp(0.0, 1.0))
}

/// Engine configuration
#[derive(Clone)]
pub struct ClientConfig {
    /// Number of call appearances (at least 1)
    pub max_calls: usize,
    /// Audio formats we can encode/decode or at least negotiate
    pub capability: FormatSet,
    /// The format(s) we prefer
    pub preferred: FormatSet,
    /// Active audio filters
    pub filters: Filters,
    /// Silence threshold: above zero the preprocessor VAD gates
    /// transmission; at or below zero a plain level-in-dB comparison
    /// against this value is used instead
    pub silence_threshold_db: f32,
    /// Smallest outgoing frame in samples (20 ms at 8 kHz by default)
    pub min_outgoing_framesize: usize,
    /// Mirrored-audio preferences
    pub audio_prefs: AudioPrefs,
    /// Preprocessor tuning
    pub preprocessor: PreprocessorConfig,
    /// Normalizer tuning
    pub normalizer: NormalizerConfig,
    /// Voice-onset detector tuning
    pub onset: OnsetConfig,
    /// Analog-gain feedback tuning
    pub gain_feedback: GainFeedbackConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        // Only advertise formats the codec factory can actually build;
        // capability is what negotiation may land on.
        let mut capability = FormatSet::EMPTY;
        capability.insert(FormatId::Ulaw);
        capability.insert(FormatId::Alaw);
        capability.insert(FormatId::Slinear);
        Self {
            max_calls: 4,
            capability,
            preferred: FormatSet::from(FormatId::Ulaw),
            filters: Filters::default(),
            silence_threshold_db: 1.0,
            min_outgoing_framesize: 160,
            audio_prefs: AudioPrefs::default(),
            preprocessor: PreprocessorConfig::default(),
            normalizer: NormalizerConfig::default(),
            onset: OnsetConfig::default(),
            gain_feedback: GainFeedbackConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Create the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of call appearances
    pub fn with_max_calls(mut self, max_calls: usize) -> Self {
        self.max_calls = max_calls.max(1);
        self
    }

    /// Set capability and preference
    pub fn with_formats(mut self, preferred: FormatSet, capability: FormatSet) -> Self {
        self.preferred = preferred;
        self.capability = capability;
        self
    }

    /// Set the active filters
    pub fn with_filters(mut self, filters: Filters) -> Self {
        self.filters = filters;
        self
    }

    /// Set the mirrored-audio preferences
    pub fn with_audio_prefs(mut self, prefs: AudioPrefs) -> Self {
        self.audio_prefs = prefs;
        self
    }
}

/// Everything behind the engine lock
pub(crate) struct EngineState {
    pub(crate) calls: Vec<Call>,
    pub(crate) selected: Option<CallId>,
    pub(crate) registrations: Vec<Registration>,
    pub(crate) next_registration_id: u32,
    pub(crate) endpoint: Box<dyn SessionEndpoint>,
    pub(crate) audio: Box<dyn AudioBackend>,
    pub(crate) capability: FormatSet,
    pub(crate) preferred: FormatSet,
    pub(crate) filters: Filters,
    pub(crate) silence_threshold_db: f32,
    pub(crate) min_outgoing_framesize: usize,
    pub(crate) audio_prefs: AudioPrefs,
    pub(crate) output_suppressed: bool,
    pub(crate) ptt: Option<CallId>,
    pub(crate) preprocessors: PreprocessorBank,
    pub(crate) normalizer: Normalizer,
    pub(crate) onset: OnsetConfig,
    pub(crate) gain_feedback: GainFeedbackConfig,
    pub(crate) voiced_frames: u64,
    pub(crate) input_meter: LevelMeter,
    pub(crate) output_meter: LevelMeter,
    pub(crate) level_reporter: LevelReporter,
    pub(crate) idle_level_tick: u32,
    pub(crate) scratch: Vec<i16>,
    pub(crate) pending_events: VecDeque<Event>,
}

impl EngineState {
    fn new(
        config: ClientConfig,
        endpoint: Box<dyn SessionEndpoint>,
        audio: Box<dyn AudioBackend>,
    ) -> Self {
        let max_calls = config.max_calls.max(1);
        let mut preprocessor = config.preprocessor;
        preprocessor.agc = config.filters.agc;
        preprocessor.denoise = config.filters.denoise;
        Self {
            calls: (0..max_calls).map(|_| Call::new()).collect(),
            selected: None,
            registrations: Vec::new(),
            next_registration_id: 0,
            endpoint,
            audio,
            capability: config.capability,
            preferred: config.preferred,
            filters: config.filters,
            silence_threshold_db: config.silence_threshold_db,
            min_outgoing_framesize: config.min_outgoing_framesize,
            audio_prefs: config.audio_prefs,
            output_suppressed: false,
            ptt: None,
            preprocessors: PreprocessorBank::new(preprocessor),
            normalizer: Normalizer::new(config.normalizer),
            onset: config.onset,
            gain_feedback: config.gain_feedback,
            voiced_frames: 0,
            input_meter: LevelMeter::new(),
            output_meter: LevelMeter::new(),
            level_reporter: LevelReporter::new(),
            idle_level_tick: 0,
            scratch: Vec::new(),
            pending_events: VecDeque::new(),
        }
    }

    /// Queue a text event for the application
    pub(crate) fn usermsg(&mut self, severity: TextSeverity, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!("{:?}: {}", severity, message);
        self.pending_events.push_back(Event::Text {
            severity,
            call: None,
            message,
        });
    }

    /// Queue a state snapshot for one appearance
    pub(crate) fn state_event(&mut self, call_no: CallId) {
        let Some(call) = self.calls.get(call_no) else {
            return;
        };
        let event = Event::State {
            call: call_no,
            state: call.state,
            format: call.format,
            vformat: call.vformat,
            remote: call.remote.clone(),
            remote_name: call.remote_name.clone(),
            local: call.local.clone(),
            local_context: call.local_context.clone(),
        };
        self.pending_events.push_back(event);
    }

    /// First FREE appearance, if any
    pub(crate) fn first_free_call(&self) -> Option<CallId> {
        self.calls.iter().position(|c| c.state.is_free())
    }

    /// Resolve a session id against the call table
    pub(crate) fn find_call_by_session(
        &self,
        session: crate::session::SessionId,
    ) -> Option<CallId> {
        self.calls
            .iter()
            .position(|c| c.session.as_ref().map(|s| s.id()) == Some(session))
    }

    /// Return an appearance to FREE and tell the application
    pub(crate) fn clear_call(&mut self, call_no: CallId) {
        if let Some(call) = self.calls.get_mut(call_no) {
            call.clear();
        }
        self.state_event(call_no);
    }

    /// Refresh registrations that are close to expiry. Each refresh runs on
    /// a brand-new session.
    pub(crate) fn refresh_registrations(&mut self) {
        let now = Instant::now();
        for reg in self.registrations.iter_mut() {
            if !reg.due_for_refresh(now) {
                continue;
            }
            reg.session = None;
            match self.endpoint.create_session() {
                Ok(mut session) => {
                    if let Err(e) =
                        session.register(&reg.host, &reg.user, &reg.pass, reg.refresh_secs)
                    {
                        tracing::warn!(id = reg.id, "registration refresh failed: {}", e);
                    }
                    reg.session = Some(session);
                    reg.last = now;
                }
                Err(e) => {
                    tracing::error!("can't make new registration session: {}", e);
                    self.pending_events.push_back(Event::Text {
                        severity: TextSeverity::Error,
                        call: None,
                        message: "Can't make new registration session".into(),
                    });
                    return;
                }
            }
        }
    }
}

struct Shared {
    state: Mutex<EngineState>,
    handler: RwLock<Arc<dyn EventHandler>>,
    stop: AtomicBool,
}

/// The client engine
///
/// See the crate docs for the overall model. Construction wires together
/// the protocol endpoint and the audio backend; nothing runs until
/// [`ClientEngine::start_processing_thread`].
pub struct ClientEngine {
    shared: Arc<Shared>,
    thread: Option<thread::JoinHandle<()>>,
}

impl ClientEngine {
    /// Create an engine over a protocol endpoint and an audio backend
    pub fn new(
        config: ClientConfig,
        endpoint: Box<dyn SessionEndpoint>,
        audio: Box<dyn AudioBackend>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(EngineState::new(config, endpoint, audio)),
                handler: RwLock::new(Arc::new(NullEventHandler)),
                stop: AtomicBool::new(false),
            }),
            thread: None,
        }
    }

    /// Install the application's event handler
    pub fn set_event_handler(&self, handler: Arc<dyn EventHandler>) {
        *self.shared.handler.write() = handler;
    }

    /// Run `f` under the engine lock, then deliver any events it queued.
    ///
    /// Delivery happens strictly after the lock is released.
    pub(crate) fn with_lock<R>(&self, f: impl FnOnce(&mut EngineState) -> R) -> R {
        let (result, pending) = {
            let mut state = self.shared.state.lock();
            let result = f(&mut state);
            (result, std::mem::take(&mut state.pending_events))
        };
        deliver_events(&self.shared, pending);
        result
    }

    /// Start the cooperative main loop thread
    pub fn start_processing_thread(&mut self) -> ClientResult<()> {
        if self.thread.is_some() {
            return Ok(());
        }
        self.shared.stop.store(false, Ordering::Relaxed);
        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name("riax-main-loop".into())
            .spawn(move || main_loop(shared))
            .map_err(|e| ClientError::internal(format!("failed to spawn main loop: {e}")))?;
        self.thread = Some(handle);
        Ok(())
    }

    /// Ask the main loop to stop and wait for it
    pub fn stop_processing_thread(&mut self) {
        self.shared.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }

    /// Whether the main loop is running
    pub fn is_running(&self) -> bool {
        self.thread.is_some() && !self.shared.stop.load(Ordering::Relaxed)
    }

    /// Hang up everything, stop the loop, stop the audio backend
    pub fn shutdown(&mut self) {
        self.hangup_all();
        self.stop_processing_thread();
        self.with_lock(|state| {
            if let Err(e) = state.audio.stop() {
                tracing::warn!("audio stop on shutdown failed: {}", e);
            }
        });
    }
}

impl Drop for ClientEngine {
    fn drop(&mut self) {
        self.stop_processing_thread();
    }
}

fn deliver_events(shared: &Shared, events: VecDeque<Event>) {
    if events.is_empty() {
        return;
    }
    let handler = shared.handler.read().clone();
    for event in events {
        let action = handler.on_event(event);
        if action == EventAction::Ignored {
            tracing::trace!("event ignored by application handler");
        }
    }
}

fn main_loop(shared: Arc<Shared>) {
    tracing::debug!("main loop starting");
    let mut refresh_tick = 0u32;

    while !shared.stop.load(Ordering::Relaxed) {
        let pending = {
            let mut state = shared.state.lock();
            state.service_network();
            state.service_audio();

            refresh_tick += 1;
            if refresh_tick >= REFRESH_CHECK_ITERATIONS {
                state.refresh_registrations();
                refresh_tick = 0;
            }

            std::mem::take(&mut state.pending_events)
        };

        deliver_events(&shared, pending);
        thread::sleep(LOOP_SLEEP);
    }
    tracing::debug!("main loop stopped");
}
