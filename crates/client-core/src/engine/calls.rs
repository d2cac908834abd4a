//! Call operations and the rest of the public engine API
//!
//! Every entry point takes the engine lock, mutates, and lets
//! [`super::ClientEngine::with_lock`] deliver queued events once the lock
//! is gone. Session failures inside a call operation are surfaced as error
//! text events, never as panics; the call table always stays consistent.

use std::time::Instant;

use riax_codec_core::FormatSet;
use riax_media_core::{AudioDeviceInfo, Filters, Sound};

use crate::call::{CallId, CallState};
use crate::events::TextSeverity;
use crate::registration::Registration;
use crate::session::{DialOptions, NetStats};
use crate::{ClientError, ClientResult};

use super::{ClientEngine, EngineState};

/// Snapshot of one call appearance
#[derive(Debug, Clone)]
pub struct CallInfo {
    /// The appearance index
    pub call: CallId,
    /// State flags
    pub state: CallState,
    /// Negotiated audio format
    pub format: Option<riax_codec_core::FormatId>,
    /// Negotiated video format
    pub vformat: Option<riax_codec_core::FormatId>,
    /// Remote number
    pub remote: String,
    /// Remote display name
    pub remote_name: String,
    /// Local identity
    pub local: String,
    /// Local dialplan context
    pub local_context: String,
}

impl EngineState {
    /// Place an outgoing call. Returns the appearance used.
    pub(crate) fn place_call(&mut self, number: &str) -> ClientResult<CallId> {
        // Reuse the selected appearance when it is idle, otherwise find a
        // free one.
        let call_no = match self.selected {
            Some(selected) if !self.calls[selected].state.active => Some(selected),
            _ => self.first_free_call(),
        };
        let Some(call_no) = call_no else {
            self.usermsg(TextSeverity::Status, "No free call appearances");
            return Err(ClientError::NoFreeCallAppearance);
        };

        let session = match self.endpoint.create_session() {
            Ok(session) => session,
            Err(e) => {
                self.usermsg(TextSeverity::Error, "Can't make new session");
                return Err(e.into());
            }
        };

        let preferred = self.preferred;
        let capability = self.capability;
        let call = &mut self.calls[call_no];
        call.session = Some(session);
        call.destroy_codecs();

        // "name/extension" destinations split into display name and number
        call.remote_name = number.to_string();
        call.remote = match number.split_once('/') {
            Some((_, extension)) => extension.to_string(),
            None => String::new(),
        };
        call.local = call.callerid_name.clone();
        call.local_context = "default".to_string();

        call.state = CallState {
            active: true,
            outgoing: true,
            ..CallState::default()
        };
        call.note_activity();
        call.last_ping = call.last_activity;

        let options = DialOptions {
            number: number.to_string(),
            callerid_name: call.callerid_name.clone(),
            callerid_number: call.callerid_number.clone(),
            preferred,
            capability,
        };
        if let Some(session) = call.session.as_mut() {
            if let Err(e) = session.dial(&options) {
                self.usermsg(TextSeverity::Error, format!("Failed to place call: {e}"));
            }
        }

        // Selecting also emits the state event
        self.select_call(Some(call_no))?;
        Ok(call_no)
    }

    /// Select an appearance (or none). The selected call is the one bridged
    /// to the local audio device; selecting a ringing inbound call answers
    /// it, selecting `None` puts everything on hold.
    pub(crate) fn select_call(&mut self, target: Option<CallId>) -> ClientResult<()> {
        let Some(call_no) = target else {
            if let Some(previous) = self.selected {
                self.calls[previous].state.selected = false;
            }
            self.selected = None;
            return Ok(());
        };

        if call_no >= self.calls.len() {
            self.usermsg(
                TextSeverity::Error,
                format!("Error: tried to select out of range call {call_no}"),
            );
            return Err(ClientError::InvalidCall { call: call_no });
        }

        // De-select and notify the old call if it is a different one
        if self.selected != Some(call_no) {
            if let Some(previous) = self.selected {
                if self.calls[previous].state.selected {
                    self.calls[previous].state.selected = false;
                    self.state_event(previous);
                }
            }
            self.selected = Some(call_no);
        }
        self.calls[call_no].state.selected = true;

        // A ringing inbound selection is answered; otherwise just notify
        // (answering does that for us)
        let state = self.calls[call_no].state;
        if !state.outgoing && state.ringing {
            self.answer_call(call_no)
        } else {
            self.state_event(call_no);
            Ok(())
        }
    }

    /// Answer an inbound call
    pub(crate) fn answer_call(&mut self, call_no: CallId) -> ClientResult<()> {
        if call_no >= self.calls.len() {
            return Err(ClientError::InvalidCall { call: call_no });
        }
        let call = &mut self.calls[call_no];
        call.state.complete = true;
        call.state.ringing = false;
        if let Some(session) = call.session.as_mut() {
            if let Err(e) = session.answer() {
                tracing::warn!(call = call_no, "answer failed: {}", e);
            }
        }
        self.state_event(call_no);
        Ok(())
    }

    /// Reject a call and free the appearance
    pub(crate) fn reject_call(&mut self, call_no: CallId) -> ClientResult<()> {
        if call_no >= self.calls.len() {
            return Err(ClientError::InvalidCall { call: call_no });
        }
        if let Some(session) = self.calls[call_no].session.as_mut() {
            if let Err(e) = session.reject("Call rejected manually.") {
                tracing::warn!(call = call_no, "reject failed: {}", e);
            }
        }
        self.clear_call(call_no);
        Ok(())
    }

    /// Hang up one appearance if it is not already FREE
    pub(crate) fn hangup_call(&mut self, call_no: CallId) -> ClientResult<()> {
        if call_no >= self.calls.len() {
            return Err(ClientError::InvalidCall { call: call_no });
        }
        if self.calls[call_no].state.is_free() {
            return Ok(());
        }
        if let Some(session) = self.calls[call_no].session.as_mut() {
            if let Err(e) = session.hangup("Dumped Call") {
                tracing::warn!(call = call_no, "hangup failed: {}", e);
            }
        }
        self.usermsg(TextSeverity::Status, format!("Hanging up call {call_no}"));
        self.clear_call(call_no);
        Ok(())
    }

    fn snapshot(&self, call_no: CallId) -> ClientResult<CallInfo> {
        let call = self
            .calls
            .get(call_no)
            .ok_or(ClientError::InvalidCall { call: call_no })?;
        Ok(CallInfo {
            call: call_no,
            state: call.state,
            format: call.format,
            vformat: call.vformat,
            remote: call.remote.clone(),
            remote_name: call.remote_name.clone(),
            local: call.local.clone(),
            local_context: call.local_context.clone(),
        })
    }
}

impl ClientEngine {
    /// Place an outgoing call; returns the appearance used
    pub fn place_call(&self, number: &str) -> ClientResult<CallId> {
        self.with_lock(|state| state.place_call(number))
    }

    /// Answer an inbound call
    pub fn answer(&self, call: CallId) -> ClientResult<()> {
        self.with_lock(|state| state.answer_call(call))
    }

    /// Reject a call and free its appearance
    pub fn reject(&self, call: CallId) -> ClientResult<()> {
        self.with_lock(|state| state.reject_call(call))
    }

    /// Hang up one call
    pub fn hangup(&self, call: CallId) -> ClientResult<()> {
        self.with_lock(|state| state.hangup_call(call))
    }

    /// Hang up every appearance
    pub fn hangup_all(&self) {
        self.with_lock(|state| {
            for call_no in 0..state.calls.len() {
                let _ = state.hangup_call(call_no);
            }
        });
    }

    /// Select an appearance, or `None` to hold everything
    pub fn select(&self, call: Option<CallId>) -> ClientResult<()> {
        self.with_lock(|state| state.select_call(call))
    }

    /// The currently selected appearance
    pub fn selected_call(&self) -> Option<CallId> {
        self.with_lock(|state| state.selected)
    }

    /// Snapshot one appearance
    pub fn call_info(&self, call: CallId) -> ClientResult<CallInfo> {
        self.with_lock(|state| state.snapshot(call))
    }

    /// Send a DTMF digit on the selected call
    pub fn send_dtmf(&self, digit: char) -> ClientResult<()> {
        self.with_lock(|state| {
            let Some(selected) = state.selected else {
                return Ok(());
            };
            if !state.calls[selected].state.active {
                return Ok(());
            }
            if let Some(session) = state.calls[selected].session.as_mut() {
                session.send_dtmf(digit)?;
            }
            Ok(())
        })
    }

    /// Send a text message on the selected call
    pub fn send_text(&self, text: &str) -> ClientResult<()> {
        self.with_lock(|state| {
            let Some(selected) = state.selected else {
                return Ok(());
            };
            if !state.calls[selected].state.active {
                return Ok(());
            }
            if let Some(session) = state.calls[selected].session.as_mut() {
                session.send_text(text)?;
            }
            Ok(())
        })
    }

    /// Push a URL on the selected call
    pub fn send_url(&self, url: &str, link: bool) -> ClientResult<()> {
        self.with_lock(|state| {
            let Some(selected) = state.selected else {
                return Ok(());
            };
            if !state.calls[selected].state.active {
                return Ok(());
            }
            if let Some(session) = state.calls[selected].session.as_mut() {
                session.send_url(url, link)?;
            }
            Ok(())
        })
    }

    /// Blind-transfer an active call to a destination extension
    pub fn transfer(&self, call: CallId, destination: &str) -> ClientResult<()> {
        self.with_lock(|state| {
            if call >= state.calls.len() || !state.calls[call].state.active {
                return Err(ClientError::InvalidCall { call });
            }
            if let Some(session) = state.calls[call].session.as_mut() {
                session.transfer(destination)?;
            }
            Ok(())
        })
    }

    /// Hold: stop sending media on a call, optionally with music-on-hold
    pub fn quelch(&self, call: CallId, music_on_hold: bool) -> ClientResult<()> {
        self.with_lock(|state| {
            let session = state
                .calls
                .get_mut(call)
                .and_then(|c| c.session.as_mut())
                .ok_or(ClientError::InvalidCall { call })?;
            session.quelch(music_on_hold)?;
            Ok(())
        })
    }

    /// Resume sending media on a held call
    pub fn unquelch(&self, call: CallId) -> ClientResult<()> {
        self.with_lock(|state| {
            let session = state
                .calls
                .get_mut(call)
                .and_then(|c| c.session.as_mut())
                .ok_or(ClientError::InvalidCall { call })?;
            session.unquelch()?;
            Ok(())
        })
    }

    /// Register with a server; returns the registration id
    pub fn register(
        &self,
        host: &str,
        user: &str,
        pass: &str,
        refresh_secs: u64,
    ) -> ClientResult<u32> {
        self.with_lock(|state| {
            let mut session = match state.endpoint.create_session() {
                Ok(session) => session,
                Err(e) => {
                    state.usermsg(TextSeverity::Error, "Can't make new registration session");
                    return Err(e.into());
                }
            };
            session.register(host, user, pass, refresh_secs)?;

            state.next_registration_id += 1;
            let id = state.next_registration_id;
            state.registrations.push(Registration {
                id,
                session: Some(session),
                host: host.to_string(),
                user: user.to_string(),
                pass: pass.to_string(),
                refresh_secs,
                last: Instant::now(),
            });
            Ok(id)
        })
    }

    /// Remove a registration; its session is destroyed
    pub fn unregister(&self, id: u32) -> ClientResult<()> {
        self.with_lock(|state| {
            let before = state.registrations.len();
            state.registrations.retain(|r| r.id != id);
            if state.registrations.len() == before {
                return Err(ClientError::UnknownRegistration { id });
            }
            Ok(())
        })
    }

    /// Replace the format preference and capability
    pub fn set_formats(&self, preferred: FormatSet, capability: FormatSet) {
        self.with_lock(|state| {
            state.preferred = preferred;
            state.capability = capability;
        });
    }

    /// The active filter set
    pub fn filters(&self) -> Filters {
        self.with_lock(|state| state.filters)
    }

    /// Change the active filters; live preprocessor instances are
    /// reconfigured, not recreated
    pub fn set_filters(&self, filters: Filters) {
        self.with_lock(|state| {
            state.filters = filters;
            state.preprocessors.set_filters(&filters);
        });
    }

    /// Set the silence threshold: above zero the VAD verdict gates
    /// transmission, at or below zero a plain dB comparison is used
    pub fn set_silence_threshold(&self, threshold_db: f32) {
        self.with_lock(|state| {
            state.silence_threshold_db = threshold_db;
        });
    }

    /// Set the smallest outgoing frame in samples
    pub fn set_min_outgoing_framesize(&self, samples: usize) {
        self.with_lock(|state| {
            state.min_outgoing_framesize = samples.max(1);
        });
    }

    /// Set the caller id presented on every appearance
    pub fn set_callerid(&self, name: &str, number: &str) {
        self.with_lock(|state| {
            for call in state.calls.iter_mut() {
                call.callerid_name = name.to_string();
                call.callerid_number = number.to_string();
            }
        });
    }

    /// Replace the mirrored-audio preferences
    pub fn set_audio_prefs(&self, prefs: super::AudioPrefs) {
        self.with_lock(|state| {
            state.audio_prefs = prefs;
        });
    }

    /// Suppress (or restore) speaker output; metering continues either way
    pub fn set_audio_output(&self, suppressed: bool) {
        self.with_lock(|state| {
            state.output_suppressed = suppressed;
        });
    }

    /// Push-to-talk bypass: while set, voice-activity gating is skipped for
    /// the given call
    pub fn set_ptt(&self, call: Option<CallId>) {
        self.with_lock(|state| {
            state.ptt = call;
        });
    }

    /// Key the radio on a call; enables the PTT bypass
    pub fn key_radio(&self, call: CallId) -> ClientResult<()> {
        self.with_lock(|state| {
            let session = state
                .calls
                .get_mut(call)
                .and_then(|c| c.session.as_mut())
                .ok_or(ClientError::InvalidCall { call })?;
            session.key_radio()?;
            state.ptt = Some(call);
            Ok(())
        })
    }

    /// Unkey the radio on a call; disables the PTT bypass
    pub fn unkey_radio(&self, call: CallId) -> ClientResult<()> {
        self.with_lock(|state| {
            let session = state
                .calls
                .get_mut(call)
                .and_then(|c| c.session.as_mut())
                .ok_or(ClientError::InvalidCall { call })?;
            session.unkey_radio()?;
            state.ptt = None;
            Ok(())
        })
    }

    /// Send pre-encoded audio on the selected call, bypassing the pipeline.
    /// Honors the send-disable preference.
    pub fn push_audio(&self, data: &[u8], samples: usize) -> ClientResult<()> {
        self.with_lock(|state| {
            let Some(selected) = state.selected else {
                return Err(ClientError::NoCallSelected);
            };
            if state.audio_prefs.send_disable {
                return Ok(());
            }
            let format = state.calls[selected]
                .format
                .ok_or(ClientError::NoNegotiatedFormat { call: selected })?;
            if let Some(session) = state.calls[selected].session.as_mut() {
                session.send_voice(format, data, samples)?;
            }
            Ok(())
        })
    }

    /// Latest network statistics for a call
    pub fn netstats(&self, call: CallId) -> Option<NetStats> {
        self.with_lock(|state| {
            state
                .calls
                .get(call)
                .and_then(|c| c.session.as_ref())
                .and_then(|s| s.netstats())
        })
    }

    /// Input device level
    pub fn input_level(&self) -> f32 {
        self.with_lock(|state| state.audio.input_level())
    }

    /// Set the input device level
    pub fn set_input_level(&self, level: f32) -> ClientResult<()> {
        self.with_lock(|state| Ok(state.audio.set_input_level(level)?))
    }

    /// Output device level
    pub fn output_level(&self) -> f32 {
        self.with_lock(|state| state.audio.output_level())
    }

    /// Set the output device level
    pub fn set_output_level(&self, level: f32) -> ClientResult<()> {
        self.with_lock(|state| Ok(state.audio.set_output_level(level)?))
    }

    /// Enumerate audio devices
    pub fn audio_devices(&self) -> Vec<AudioDeviceInfo> {
        self.with_lock(|state| state.audio.devices())
    }

    /// Select audio devices by index
    pub fn select_audio_devices(
        &self,
        input: usize,
        output: usize,
        ring: usize,
    ) -> ClientResult<()> {
        self.with_lock(|state| Ok(state.audio.select_devices(input, output, ring)?))
    }

    /// Currently selected (input, output, ring) devices
    pub fn selected_audio_devices(&self) -> (usize, usize, usize) {
        self.with_lock(|state| state.audio.selected_devices())
    }

    /// Play a local sound; returns an id for stopping it
    pub fn play_sound(&self, sound: &Sound, ring: bool) -> ClientResult<u32> {
        self.with_lock(|state| Ok(state.audio.play_sound(sound, ring)?))
    }

    /// Stop a playing sound
    pub fn stop_sound(&self, id: u32) -> ClientResult<()> {
        self.with_lock(|state| Ok(state.audio.stop_sound(id)?))
    }
}
