//! The transmit and receive audio pipeline
//!
//! Runs inside the engine lock, once per main-loop iteration. The transmit
//! side pulls capture frames, normalizes, gates on voice activity (unless
//! push-to-talk is authoritative), signals comfort noise on silence onset,
//! and encodes through the call's lazily created encoder. The receive side
//! decodes inbound chunks for the selected call and hands PCM to the
//! backend.

use bytes::Bytes;

use riax_codec_core::CodecFactory;
use riax_media_core::{detect_onset, FrameSizeClass, SILENCE_DB};

use crate::call::CallId;
use crate::events::{AudioSource, Event, TextSeverity};

use super::{adjust_input_level, EngineState, COMFORT_NOISE_LEVEL, MAX_FRAME_SAMPLES};

/// Telephony rate of the capture path
const CAPTURE_RATE: u32 = 8000;

/// Emit an idle Levels event every this many idle service passes
const IDLE_LEVEL_INTERVAL: u32 = 50;

impl EngineState {
    /// One audio service pass: feed the transmit pipeline while a selected
    /// call wants audio, otherwise keep the device stopped and the VU
    /// meters ticking at silence.
    pub(crate) fn service_audio(&mut self) {
        let want_send = match self.selected {
            Some(selected) => {
                let state = self.calls[selected].state;
                (state.outgoing || state.complete) && !self.audio_prefs.send_disable
            }
            None => false,
        };
        let want_local = self.audio_prefs.recv_local_raw || self.audio_prefs.recv_local_encoded;

        if !(want_send || want_local) {
            if let Err(e) = self.audio.stop() {
                tracing::warn!("audio stop failed: {}", e);
            }
            // Keep sending silent level events so VU meters need no reset
            // when a call ends.
            self.idle_level_tick = self.idle_level_tick.wrapping_add(1);
            if self.idle_level_tick % IDLE_LEVEL_INTERVAL == 1 {
                self.pending_events.push_back(Event::Levels {
                    input_db: SILENCE_DB,
                    output_db: SILENCE_DB,
                });
            }
            return;
        }

        loop {
            if let Err(e) = self.audio.start() {
                self.usermsg(TextSeverity::Error, format!("ERROR starting audio: {e}"));
                return;
            }

            // Read at least the configured minimum, rounded up to a whole
            // number of codec frames.
            let codec_min = match self.selected {
                Some(selected) if want_send => self.calls[selected]
                    .encoder
                    .as_ref()
                    .map(|enc| enc.minimum_frame_size().max(1))
                    .unwrap_or(1),
                _ => 1,
            };
            let mut to_read = codec_min.max(self.min_outgoing_framesize);
            if to_read % codec_min != 0 {
                to_read += codec_min - (to_read % codec_min);
            }
            if to_read > MAX_FRAME_SAMPLES {
                tracing::error!(to_read, "outgoing frame larger than service buffer");
                to_read = MAX_FRAME_SAMPLES - (MAX_FRAME_SAMPLES % codec_min);
            }

            let mut buf = std::mem::take(&mut self.scratch);
            buf.resize(to_read, 0);

            let read = match self.audio.input(&mut buf[..to_read]) {
                Ok(read) => read,
                Err(e) => {
                    self.scratch = buf;
                    self.usermsg(TextSeverity::Error, format!("ERROR reading audio: {e}"));
                    return;
                }
            };

            // Frame not yet available
            if read == 0 {
                self.scratch = buf;
                break;
            }

            if self.audio_prefs.recv_local_raw {
                self.pending_events.push_back(Event::Audio {
                    call: self.selected.unwrap_or(0),
                    source: AudioSource::Local,
                    encoded: false,
                    format: None,
                    timestamp: 0,
                    data: pcm_bytes(&buf[..read]),
                });
            }

            // The frame stays in the scratch buffer; send_encoded_audio
            // works on it there so the call table can be borrowed alongside.
            self.scratch = buf;
            if want_send {
                if let Some(selected) = self.selected {
                    self.send_encoded_audio(selected, read);
                }
            }
        }
    }

    /// Transmit one captured frame for a call.
    ///
    /// The frame is the first `samples` entries of the scratch buffer;
    /// keeping it there avoids aliasing the call table while the pipeline
    /// borrows both.
    pub(crate) fn send_encoded_audio(&mut self, call_no: CallId, samples: usize) {
        let mut frame = std::mem::take(&mut self.scratch);
        let silent = self.transmit_gate(&mut frame[..samples]);
        self.poll_levels();

        if silent {
            let comfort_noise = self.filters.comfort_noise;
            let call = &mut self.calls[call_no];
            if !call.tx_silent {
                // Exactly one comfort-noise signal per silence onset
                call.tx_silent = true;
                if comfort_noise {
                    if let Some(session) = call.session.as_mut() {
                        if let Err(e) = session.send_comfort_noise(COMFORT_NOISE_LEVEL) {
                            tracing::warn!(call = call_no, "comfort noise send failed: {}", e);
                        }
                    }
                }
            }
            self.scratch = frame;
            return;
        }

        // We're going to send voice now
        let call = &mut self.calls[call_no];
        call.tx_silent = false;

        // Destroy the encoder if it no longer matches the negotiated format
        if let (Some(encoder), format) = (&call.encoder, call.format) {
            if format != Some(encoder.format()) {
                call.encoder = None;
            }
        }

        // No format negotiated yet: this happens for the first couple of
        // frames of new calls
        let Some(format) = call.format else {
            self.scratch = frame;
            return;
        };

        if call.encoder.is_none() {
            match CodecFactory::create(format) {
                Ok(encoder) => call.encoder = Some(encoder),
                Err(e) => {
                    self.scratch = frame;
                    self.usermsg(
                        TextSeverity::Error,
                        format!("Codec could not be created: {format} ({e})"),
                    );
                    return;
                }
            }
        }
        let Some(encoder) = call.encoder.as_mut() else {
            self.scratch = frame;
            return;
        };

        let encoded = match encoder.encode(&frame[..samples]) {
            Ok(encoded) => encoded,
            Err(e) => {
                self.scratch = frame;
                self.usermsg(TextSeverity::Error, format!("encode error: {format} ({e})"));
                return;
            }
        };

        if self.audio_prefs.recv_local_encoded {
            self.pending_events.push_back(Event::Audio {
                call: call_no,
                source: AudioSource::Local,
                encoded: true,
                format: Some(format),
                timestamp: 0,
                data: encoded.clone(),
            });
        }

        let call = &mut self.calls[call_no];
        if let Some(session) = call.session.as_mut() {
            if let Err(e) = session.send_voice(format, &encoded, samples) {
                self.pending_events.push_back(Event::Text {
                    severity: TextSeverity::Error,
                    call: Some(call_no),
                    message: format!("Failed to send voice: {e}"),
                });
            }
        }
        self.scratch = frame;
    }

    /// Normalize the frame and decide whether it is silent. Runs the
    /// preprocessor, the onset override, and the analog-gain feedback.
    fn transmit_gate(&mut self, frame: &mut [i16]) -> bool {
        self.level_reporter.note_input();
        self.normalizer.process(frame);

        // In PTT mode the key/unkey signal is authoritative; voice-activity
        // gating is skipped entirely.
        if self.ptt.is_some() {
            self.input_meter.update(frame);
            return false;
        }

        // Scan for voice-onset markers before the preprocessor's AGC can
        // reshape the frame.
        let onset = detect_onset(&self.onset, frame);

        self.input_meter.update(frame);
        let speech = self.preprocessors.process(frame, CAPTURE_RATE);
        let mut silent = !speech;

        // Analog AGC: bring the preprocessor gain out to the mixer, with
        // lots of hysteresis. Runs on voiced frames only.
        if !silent
            && self.silence_threshold_db != 0.0
            && self.filters.agc
            && self.filters.analog_agc
        {
            self.voiced_frames = self.voiced_frames.wrapping_add(1);
            if self.voiced_frames % self.gain_feedback.interval == 0 {
                let class = FrameSizeClass::classify(frame.len());
                if let Some(loudness) = self.preprocessors.loudness(class) {
                    let level = self.audio.input_level();
                    if let Some(new_level) =
                        adjust_input_level(&self.gain_feedback, loudness, level)
                    {
                        tracing::debug!(loudness, level, new_level, "analog gain feedback");
                        if let Err(e) = self.audio.set_input_level(new_level) {
                            tracing::warn!("input level set failed: {}", e);
                        }
                    }
                }
            }
        }

        // Don't report a level for frames the VAD called silent
        if self.silence_threshold_db > 0.0 && silent {
            self.input_meter.set_silent();
        }

        // Voice onset overrides a silent verdict so the first phoneme of an
        // utterance is not clipped.
        if silent && onset {
            silent = false;
        }

        if self.silence_threshold_db > 0.0 {
            silent
        } else {
            // VAD gating disabled: fall back to a plain level comparison
            self.input_meter.db() < self.silence_threshold_db
        }
    }

    /// Receive one encoded chunk for a call
    pub(crate) fn handle_voice(&mut self, call_no: CallId, data: &Bytes, timestamp: u32) {
        // Audio for unselected calls is dropped
        if self.selected != Some(call_no) {
            return;
        }

        self.level_reporter.note_output();

        let call = &mut self.calls[call_no];
        let Some(format) = call.format else {
            self.usermsg(
                TextSeverity::Status,
                "Voice packet before format negotiation. Dropping",
            );
            return;
        };

        // Destroy the decoder if it is the wrong type
        if let Some(decoder) = &call.decoder {
            if decoder.format() != format {
                call.decoder = None;
            }
        }
        if call.decoder.is_none() {
            match CodecFactory::create(format) {
                Ok(decoder) => call.decoder = Some(decoder),
                Err(e) => {
                    self.usermsg(
                        TextSeverity::Error,
                        format!("Codec could not be created: {format} ({e})"),
                    );
                    return;
                }
            }
        }
        let Some(decoder) = call.decoder.as_mut() else {
            return;
        };

        // One network packet may carry several codec frames; decode takes
        // them all.
        let decoded = match decoder.decode(data) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::debug!(call = call_no, "decode failed: {}", e);
                self.usermsg(
                    TextSeverity::Status,
                    "Bad or incomplete voice packet. Unable to decode. dropping",
                );
                return;
            }
        };

        if self.audio_prefs.recv_remote_encoded {
            self.pending_events.push_back(Event::Audio {
                call: call_no,
                source: AudioSource::Remote,
                encoded: true,
                format: Some(format),
                timestamp,
                data: data.clone(),
            });
        }

        self.output_meter.update(&decoded);
        self.poll_levels();

        if self.audio_prefs.recv_remote_raw {
            self.pending_events.push_back(Event::Audio {
                call: call_no,
                source: AudioSource::Remote,
                encoded: false,
                format: None,
                timestamp,
                data: pcm_bytes(&decoded),
            });
        }

        if !self.output_suppressed {
            if let Err(e) = self.audio.output(&decoded) {
                tracing::warn!("audio output failed: {}", e);
            }
        }
    }

    /// Queue a Levels event when one is due
    pub(crate) fn poll_levels(&mut self) {
        if let Some((input_db, output_db)) =
            self.level_reporter.poll(&self.input_meter, &self.output_meter)
        {
            self.pending_events.push_back(Event::Levels {
                input_db,
                output_db,
            });
        }
    }
}

/// Raw PCM as little-endian bytes for mirroring to the application
fn pcm_bytes(samples: &[i16]) -> Bytes {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    Bytes::from(out)
}
