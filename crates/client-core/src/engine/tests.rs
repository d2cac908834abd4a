//! Engine integration tests over mock session and audio capabilities

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;

use riax_codec_core::{FormatId, FormatSet};
use riax_media_core::{MockAudioBackend, MockAudioHandle};

use crate::call::{CallId, CallState};
use crate::events::{Event, EventAction, EventHandler, TextSeverity};
use crate::session::{
    ConnectOffer, DialOptions, NetStats, Session, SessionEndpoint, SessionEvent, SessionEventKind,
    SessionId, SessionResult,
};
use crate::{ClientConfig, ClientEngine, ClientError};

use super::{adjust_input_level, EngineState, GainFeedbackConfig};

// ===== Mock session layer =====

#[derive(Default)]
struct SessionLog {
    dialed: Vec<String>,
    accepted: Vec<FormatSet>,
    answered: u32,
    ring_announced: u32,
    rejected: Vec<String>,
    hungup: Vec<String>,
    busied: u32,
    transferred: Vec<String>,
    voice: Vec<(FormatId, usize, usize)>,
    comfort_noise: u32,
    dtmf: Vec<char>,
    texts: Vec<String>,
    urls: Vec<String>,
    auth_replies: Vec<String>,
    registered: Vec<(String, String, u64)>,
    keyed: u32,
    unkeyed: u32,
}

type SharedLog = Arc<Mutex<SessionLog>>;

struct MockSession {
    id: SessionId,
    log: SharedLog,
}

impl MockSession {
    fn new(id: u64) -> (Self, SharedLog) {
        let log = Arc::new(Mutex::new(SessionLog::default()));
        (
            Self {
                id: SessionId(id),
                log: log.clone(),
            },
            log,
        )
    }
}

impl Session for MockSession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn dial(&mut self, options: &DialOptions) -> SessionResult<()> {
        self.log.lock().dialed.push(options.number.clone());
        Ok(())
    }

    fn accept(&mut self, format: FormatSet) -> SessionResult<()> {
        self.log.lock().accepted.push(format);
        Ok(())
    }

    fn answer(&mut self) -> SessionResult<()> {
        self.log.lock().answered += 1;
        Ok(())
    }

    fn ring_announce(&mut self) -> SessionResult<()> {
        self.log.lock().ring_announced += 1;
        Ok(())
    }

    fn reject(&mut self, reason: &str) -> SessionResult<()> {
        self.log.lock().rejected.push(reason.to_string());
        Ok(())
    }

    fn hangup(&mut self, reason: &str) -> SessionResult<()> {
        self.log.lock().hungup.push(reason.to_string());
        Ok(())
    }

    fn busy(&mut self) -> SessionResult<()> {
        self.log.lock().busied += 1;
        Ok(())
    }

    fn transfer(&mut self, destination: &str) -> SessionResult<()> {
        self.log.lock().transferred.push(destination.to_string());
        Ok(())
    }

    fn send_voice(&mut self, format: FormatId, data: &[u8], samples: usize) -> SessionResult<()> {
        self.log.lock().voice.push((format, data.len(), samples));
        Ok(())
    }

    fn send_comfort_noise(&mut self, _level: u8) -> SessionResult<()> {
        self.log.lock().comfort_noise += 1;
        Ok(())
    }

    fn send_dtmf(&mut self, digit: char) -> SessionResult<()> {
        self.log.lock().dtmf.push(digit);
        Ok(())
    }

    fn send_text(&mut self, text: &str) -> SessionResult<()> {
        self.log.lock().texts.push(text.to_string());
        Ok(())
    }

    fn send_url(&mut self, url: &str, _link: bool) -> SessionResult<()> {
        self.log.lock().urls.push(url.to_string());
        Ok(())
    }

    fn auth_reply(&mut self, password: &str, _challenge: &str) -> SessionResult<()> {
        self.log.lock().auth_replies.push(password.to_string());
        Ok(())
    }

    fn register(
        &mut self,
        host: &str,
        user: &str,
        _password: &str,
        refresh_secs: u64,
    ) -> SessionResult<()> {
        self.log
            .lock()
            .registered
            .push((host.to_string(), user.to_string(), refresh_secs));
        Ok(())
    }

    fn netstats(&self) -> Option<NetStats> {
        Some(NetStats::default())
    }

    fn quelch(&mut self, _music_on_hold: bool) -> SessionResult<()> {
        Ok(())
    }

    fn unquelch(&mut self) -> SessionResult<()> {
        Ok(())
    }

    fn key_radio(&mut self) -> SessionResult<()> {
        self.log.lock().keyed += 1;
        Ok(())
    }

    fn unkey_radio(&mut self) -> SessionResult<()> {
        self.log.lock().unkeyed += 1;
        Ok(())
    }
}

#[derive(Default)]
struct EndpointShared {
    next_id: u64,
    session_logs: Vec<SharedLog>,
    events: VecDeque<SessionEvent>,
}

#[derive(Clone, Default)]
struct MockEndpoint {
    shared: Arc<Mutex<EndpointShared>>,
}

impl MockEndpoint {
    fn push_event(&self, session: SessionId, kind: SessionEventKind) {
        self.shared
            .lock()
            .events
            .push_back(SessionEvent { session, kind });
    }

    fn session_log(&self, index: usize) -> SharedLog {
        self.shared.lock().session_logs[index].clone()
    }

    fn session_count(&self) -> usize {
        self.shared.lock().session_logs.len()
    }

    /// Build a remote-originated session, as carried by a Connect event
    fn remote_session(&self) -> (Box<dyn Session>, SessionId, SharedLog) {
        let mut shared = self.shared.lock();
        shared.next_id += 1;
        let (session, log) = MockSession::new(shared.next_id);
        let id = session.id();
        shared.session_logs.push(log.clone());
        (Box::new(session), id, log)
    }
}

impl SessionEndpoint for MockEndpoint {
    fn create_session(&mut self) -> SessionResult<Box<dyn Session>> {
        let mut shared = self.shared.lock();
        shared.next_id += 1;
        let (session, log) = MockSession::new(shared.next_id);
        shared.session_logs.push(log);
        Ok(Box::new(session))
    }

    fn poll_event(&mut self) -> Option<SessionEvent> {
        self.shared.lock().events.pop_front()
    }
}

// ===== Event capture =====

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    fn state_events(&self) -> Vec<(CallId, CallState)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::State { call, state, .. } => Some((*call, *state)),
                _ => None,
            })
            .collect()
    }
}

impl EventHandler for Recorder {
    fn on_event(&self, event: Event) -> EventAction {
        self.events.lock().push(event);
        EventAction::Handled
    }
}

// ===== Helpers =====

fn ulaw_speex_config() -> ClientConfig {
    let mut capability = FormatSet::EMPTY;
    capability.insert(FormatId::Ulaw);
    capability.insert(FormatId::Speex);
    ClientConfig::default()
        .with_max_calls(3)
        .with_formats(FormatSet::from(FormatId::Speex), capability)
}

fn engine_with_mocks() -> (ClientEngine, MockEndpoint, MockAudioHandle, Arc<Recorder>) {
    let endpoint = MockEndpoint::default();
    let (backend, handle) = MockAudioBackend::new();
    let engine = ClientEngine::new(
        ulaw_speex_config(),
        Box::new(endpoint.clone()),
        Box::new(backend),
    );
    let recorder = Arc::new(Recorder::default());
    engine.set_event_handler(recorder.clone());
    (engine, endpoint, handle, recorder)
}

fn default_offer() -> ConnectOffer {
    let mut capability = FormatSet::EMPTY;
    capability.insert(FormatId::Ulaw);
    capability.insert(FormatId::Gsm);
    ConnectOffer {
        format: FormatSet::from(FormatId::Ulaw),
        capability,
        calling_number: Some("5551000".into()),
        calling_name: Some("Alice".into()),
        called_number: Some("2001".into()),
        called_context: Some("default".into()),
    }
}

fn tone_frame(len: usize, amplitude: f32) -> Vec<i16> {
    (0..len)
        .map(|i| (amplitude * (i as f32 * 0.3).sin()) as i16)
        .collect()
}

fn feed_tx_frame(state: &mut EngineState, call: CallId, frame: &[i16]) {
    state.scratch = frame.to_vec();
    state.send_encoded_audio(call, frame.len());
}

/// Deliver an inbound connect and return (call id, session id, session log)
fn connect_inbound(
    engine: &ClientEngine,
    endpoint: &MockEndpoint,
) -> (CallId, SessionId, SharedLog) {
    let (session, id, log) = endpoint.remote_session();
    endpoint.push_event(
        id,
        SessionEventKind::Connect {
            offer: default_offer(),
            session,
        },
    );
    engine.with_lock(|state| state.service_network());
    let call = engine
        .with_lock(|state| state.find_call_by_session(id))
        .expect("connect should allocate an appearance");
    (call, id, log)
}

// ===== Call placement and selection =====

#[test]
fn test_place_call_sets_active_outgoing_selected() {
    let (engine, endpoint, _audio, _rec) = engine_with_mocks();

    let call = engine.place_call("guest@remote/2002").unwrap();
    let info = engine.call_info(call).unwrap();
    assert!(info.state.active);
    assert!(info.state.outgoing);
    assert!(info.state.selected);
    assert!(!info.state.complete);
    assert_eq!(info.remote, "2002");
    assert_eq!(engine.selected_call(), Some(call));

    let log = endpoint.session_log(0);
    assert_eq!(log.lock().dialed, vec!["guest@remote/2002".to_string()]);
}

#[test]
fn test_place_call_exhaustion_mutates_nothing() {
    let (engine, _endpoint, _audio, _rec) = engine_with_mocks();

    for _ in 0..3 {
        engine.place_call("2002").unwrap();
    }
    let before: Vec<_> = (0..3).map(|i| engine.call_info(i).unwrap().state).collect();

    let result = engine.place_call("2003");
    assert!(matches!(result, Err(ClientError::NoFreeCallAppearance)));

    let after: Vec<_> = (0..3).map(|i| engine.call_info(i).unwrap().state).collect();
    assert_eq!(before, after);
}

#[test]
fn test_at_most_one_selected() {
    let (engine, _endpoint, _audio, _rec) = engine_with_mocks();

    let first = engine.place_call("2002").unwrap();
    let second = engine.place_call("2003").unwrap();
    assert_ne!(first, second);

    let selected: Vec<_> = (0..3)
        .filter(|&i| engine.call_info(i).unwrap().state.selected)
        .collect();
    assert_eq!(selected, vec![second]);

    engine.select(Some(first)).unwrap();
    let selected: Vec<_> = (0..3)
        .filter(|&i| engine.call_info(i).unwrap().state.selected)
        .collect();
    assert_eq!(selected, vec![first]);
}

#[test]
fn test_select_none_clears_everywhere() {
    let (engine, _endpoint, _audio, _rec) = engine_with_mocks();

    engine.place_call("2002").unwrap();
    engine.select(None).unwrap();
    assert_eq!(engine.selected_call(), None);
    for i in 0..3 {
        assert!(!engine.call_info(i).unwrap().state.selected);
    }
}

#[test]
fn test_select_out_of_range_fails() {
    let (engine, _endpoint, _audio, _rec) = engine_with_mocks();
    assert!(matches!(
        engine.select(Some(99)),
        Err(ClientError::InvalidCall { call: 99 })
    ));
}

#[test]
fn test_selecting_ringing_inbound_answers() {
    let (engine, endpoint, _audio, _rec) = engine_with_mocks();

    let (call, _id, log) = connect_inbound(&engine, &endpoint);
    let info = engine.call_info(call).unwrap();
    assert!(info.state.active);
    assert!(info.state.ringing);
    assert!(!info.state.outgoing);

    engine.select(Some(call)).unwrap();
    let info = engine.call_info(call).unwrap();
    assert!(info.state.complete);
    assert!(!info.state.ringing);
    assert_eq!(log.lock().answered, 1);
}

// ===== Inbound connect and negotiation =====

#[test]
fn test_connect_negotiates_their_format() {
    let (engine, endpoint, _audio, _rec) = engine_with_mocks();

    // local={ULAW,SPEEX} pref=SPEEX, remote format=ULAW cap={ULAW,GSM}
    let (call, _id, log) = connect_inbound(&engine, &endpoint);
    let info = engine.call_info(call).unwrap();
    assert_eq!(info.format, Some(FormatId::Ulaw));
    assert_eq!(info.remote, "5551000");
    assert_eq!(info.remote_name, "Alice");

    let log = log.lock();
    assert_eq!(log.accepted.len(), 1);
    assert!(log.accepted[0].contains(FormatId::Ulaw));
    assert_eq!(log.ring_announced, 1);
}

#[test]
fn test_connect_no_common_codec_rejects() {
    let (engine, endpoint, _audio, _rec) = engine_with_mocks();

    let (session, id, log) = endpoint.remote_session();
    let offer = ConnectOffer {
        format: FormatSet::EMPTY,
        capability: FormatSet::from(FormatId::Gsm),
        ..Default::default()
    };
    endpoint.push_event(id, SessionEventKind::Connect { offer, session });
    engine.with_lock(|state| state.service_network());

    assert_eq!(
        log.lock().rejected,
        vec!["Could not negotiate common codec".to_string()]
    );
    // No appearance was taken
    for i in 0..3 {
        assert!(engine.call_info(i).unwrap().state.is_free());
    }
}

#[test]
fn test_connect_exhaustion_accepts_then_busies() {
    let (engine, endpoint, _audio, _rec) = engine_with_mocks();

    for _ in 0..3 {
        engine.place_call("2002").unwrap();
    }
    let (session, id, log) = endpoint.remote_session();
    endpoint.push_event(
        id,
        SessionEventKind::Connect {
            offer: default_offer(),
            session,
        },
    );
    engine.with_lock(|state| state.service_network());

    let log = log.lock();
    assert_eq!(log.accepted.len(), 1);
    assert_eq!(log.busied, 1);
    assert!(log.rejected.is_empty());
}

// ===== State transitions from network events =====

#[test]
fn test_hangup_frees_call_with_one_state_event() {
    let (engine, endpoint, _audio, recorder) = engine_with_mocks();

    let call = engine.place_call("2002").unwrap();
    let id = engine.with_lock(|state| {
        state.calls[call].session.as_ref().map(|s| s.id()).unwrap()
    });

    // Bring the call up first
    endpoint.push_event(id, SessionEventKind::Answer);
    engine.with_lock(|state| state.service_network());
    assert!(engine.call_info(call).unwrap().state.complete);

    recorder.events.lock().clear();
    endpoint.push_event(id, SessionEventKind::Hangup);
    engine.with_lock(|state| state.service_network());

    assert!(engine.call_info(call).unwrap().state.is_free());
    let free_events: Vec<_> = recorder
        .state_events()
        .into_iter()
        .filter(|(c, s)| *c == call && s.is_free())
        .collect();
    assert_eq!(free_events.len(), 1, "exactly one STATE event with FREE");
}

#[test]
fn test_busy_clears_ringing_sets_busy() {
    let (engine, endpoint, _audio, _rec) = engine_with_mocks();

    let call = engine.place_call("2002").unwrap();
    let id = engine.with_lock(|state| {
        state.calls[call].session.as_ref().map(|s| s.id()).unwrap()
    });
    endpoint.push_event(id, SessionEventKind::Ringing);
    endpoint.push_event(id, SessionEventKind::Busy);
    engine.with_lock(|state| state.service_network());

    let state = engine.call_info(call).unwrap().state;
    assert!(state.busy);
    assert!(!state.ringing);
}

#[test]
fn test_first_voice_while_outgoing_ringing_completes() {
    let (engine, endpoint, _audio, _rec) = engine_with_mocks();

    let call = engine.place_call("2002").unwrap();
    let id = engine.with_lock(|state| {
        state.calls[call].session.as_ref().map(|s| s.id()).unwrap()
    });
    // Negotiate a format so the decoder can exist
    engine.with_lock(|state| state.calls[call].format = Some(FormatId::Ulaw));

    endpoint.push_event(id, SessionEventKind::Ringing);
    engine.with_lock(|state| state.service_network());
    assert!(engine.call_info(call).unwrap().state.ringing);

    endpoint.push_event(
        id,
        SessionEventKind::Voice {
            data: Bytes::from(vec![0xFFu8; 160]),
            timestamp: 0,
        },
    );
    engine.with_lock(|state| state.service_network());

    let state = engine.call_info(call).unwrap().state;
    assert!(state.complete);
    assert!(!state.ringing);
}

#[test]
fn test_timeout_hangs_up_and_frees() {
    let (engine, endpoint, _audio, _rec) = engine_with_mocks();

    let call = engine.place_call("2002").unwrap();
    let id = engine.with_lock(|state| {
        state.calls[call].session.as_ref().map(|s| s.id()).unwrap()
    });
    let log = endpoint.session_log(0);

    endpoint.push_event(id, SessionEventKind::Timeout);
    engine.with_lock(|state| state.service_network());

    assert!(engine.call_info(call).unwrap().state.is_free());
    assert_eq!(log.lock().hungup, vec!["Call timed out".to_string()]);
}

#[test]
fn test_accept_records_negotiated_format() {
    let (engine, endpoint, _audio, _rec) = engine_with_mocks();

    let call = engine.place_call("2002").unwrap();
    let id = engine.with_lock(|state| {
        state.calls[call].session.as_ref().map(|s| s.id()).unwrap()
    });
    endpoint.push_event(
        id,
        SessionEventKind::Accept {
            format: FormatSet::from(FormatId::Ulaw),
        },
    );
    engine.with_lock(|state| state.service_network());
    assert_eq!(engine.call_info(call).unwrap().format, Some(FormatId::Ulaw));
}

#[test]
fn test_event_for_unknown_session_is_dropped_with_diagnostic() {
    let (engine, endpoint, _audio, recorder) = engine_with_mocks();

    endpoint.push_event(SessionId(999), SessionEventKind::Hangup);
    engine.with_lock(|state| state.service_network());

    let texts: Vec<_> = recorder
        .events
        .lock()
        .iter()
        .filter_map(|e| match e {
            Event::Text { severity, message, .. } => Some((*severity, message.clone())),
            _ => None,
        })
        .collect();
    assert!(texts
        .iter()
        .any(|(s, m)| *s == TextSeverity::Error && m.contains("non-existent session")));
}

// ===== Transmit pipeline =====

#[test]
fn test_comfort_noise_once_per_silence_onset() {
    let (engine, endpoint, _audio, _rec) = engine_with_mocks();

    let call = engine.place_call("2002").unwrap();
    engine.with_lock(|state| state.calls[call].format = Some(FormatId::Ulaw));
    let log = endpoint.session_log(0);

    let silence = vec![0i16; 160];
    let voice = tone_frame(160, 12000.0);

    engine.with_lock(|state| {
        // Silence onset: exactly one comfort-noise frame
        feed_tx_frame(state, call, &silence);
        feed_tx_frame(state, call, &silence);
        feed_tx_frame(state, call, &silence);
    });
    assert_eq!(log.lock().comfort_noise, 1);
    assert!(log.lock().voice.is_empty());

    engine.with_lock(|state| {
        // Voice resumes (loud onset overrides VAD warmup), then silence
        // again: a second onset, a second comfort-noise frame
        feed_tx_frame(state, call, &voice);
        feed_tx_frame(state, call, &silence);
        feed_tx_frame(state, call, &silence);
    });
    let log = log.lock();
    assert_eq!(log.comfort_noise, 2);
    assert!(!log.voice.is_empty());
}

#[test]
fn test_no_comfort_noise_with_ptt_bypass() {
    let (engine, endpoint, _audio, _rec) = engine_with_mocks();

    let call = engine.place_call("2002").unwrap();
    engine.with_lock(|state| state.calls[call].format = Some(FormatId::Ulaw));
    engine.set_ptt(Some(call));
    let log = endpoint.session_log(0);

    let silence = vec![0i16; 160];
    engine.with_lock(|state| {
        feed_tx_frame(state, call, &silence);
        feed_tx_frame(state, call, &silence);
    });

    // The key/unkey signal is authoritative: silence still goes out as
    // voice, never as comfort noise
    let log = log.lock();
    assert_eq!(log.comfort_noise, 0);
    assert_eq!(log.voice.len(), 2);
}

#[test]
fn test_pre_negotiation_frames_dropped() {
    let (engine, endpoint, _audio, _rec) = engine_with_mocks();

    let call = engine.place_call("2002").unwrap();
    let log = endpoint.session_log(0);

    let voice = tone_frame(160, 12000.0);
    engine.with_lock(|state| feed_tx_frame(state, call, &voice));

    // No format negotiated yet: nothing on the wire, no encoder created
    assert!(log.lock().voice.is_empty());
    engine.with_lock(|state| assert!(state.calls[call].encoder.is_none()));
}

#[test]
fn test_encoder_recreated_on_format_change() {
    let (engine, _endpoint, _audio, _rec) = engine_with_mocks();

    let call = engine.place_call("2002").unwrap();
    let voice = tone_frame(160, 12000.0);

    engine.with_lock(|state| {
        state.calls[call].format = Some(FormatId::Ulaw);
        feed_tx_frame(state, call, &voice);
        assert_eq!(
            state.calls[call].encoder.as_ref().map(|e| e.format()),
            Some(FormatId::Ulaw)
        );

        state.calls[call].format = Some(FormatId::Alaw);
        feed_tx_frame(state, call, &voice);
        assert_eq!(
            state.calls[call].encoder.as_ref().map(|e| e.format()),
            Some(FormatId::Alaw)
        );
    });
}

#[test]
fn test_unsupported_format_surfaces_error_and_drops() {
    let (engine, endpoint, _audio, recorder) = engine_with_mocks();

    let call = engine.place_call("2002").unwrap();
    engine.with_lock(|state| state.calls[call].format = Some(FormatId::Gsm));
    let log = endpoint.session_log(0);

    let voice = tone_frame(160, 12000.0);
    engine.with_lock(|state| feed_tx_frame(state, call, &voice));

    assert!(log.lock().voice.is_empty());
    assert!(recorder.events.lock().iter().any(|e| matches!(
        e,
        Event::Text { severity: TextSeverity::Error, .. }
    )));
    // The call survives the codec failure
    assert!(engine.call_info(call).unwrap().state.active);
}

#[test]
fn test_service_audio_pulls_and_sends() {
    let (engine, endpoint, mut audio, _rec) = engine_with_mocks();

    let call = engine.place_call("2002").unwrap();
    engine.with_lock(|state| state.calls[call].format = Some(FormatId::Ulaw));
    let log = endpoint.session_log(0);

    // Two 20 ms frames of loud tone into the capture ring
    let tone = tone_frame(320, 12000.0);
    audio.capture_tx.push_slice(&tone);

    engine.with_lock(|state| state.service_audio());

    let log = log.lock();
    assert_eq!(log.voice.len(), 2);
    assert_eq!(log.voice[0].0, FormatId::Ulaw);
    assert_eq!(log.voice[0].2, 160);
    assert!(audio.is_started());
}

#[test]
fn test_service_audio_stops_backend_when_idle() {
    let (engine, _endpoint, audio, _rec) = engine_with_mocks();

    engine.with_lock(|state| state.service_audio());
    assert!(!audio.is_started());
}

#[test]
fn test_send_disable_suppresses_transmission() {
    let (engine, endpoint, mut audio, _rec) = engine_with_mocks();

    let call = engine.place_call("2002").unwrap();
    engine.with_lock(|state| state.calls[call].format = Some(FormatId::Ulaw));
    let mut prefs = crate::AudioPrefs::default();
    prefs.send_disable = true;
    engine.set_audio_prefs(prefs);

    audio.capture_tx.push_slice(&tone_frame(160, 12000.0));
    engine.with_lock(|state| state.service_audio());

    assert!(endpoint.session_log(0).lock().voice.is_empty());
}

// ===== Receive pipeline =====

#[test]
fn test_rx_decodes_to_backend() {
    let (engine, endpoint, mut audio, _rec) = engine_with_mocks();

    let (call, id, _log) = connect_inbound(&engine, &endpoint);
    engine.select(Some(call)).unwrap();

    endpoint.push_event(
        id,
        SessionEventKind::Voice {
            data: Bytes::from(vec![0x55u8; 160]),
            timestamp: 10,
        },
    );
    engine.with_lock(|state| state.service_network());

    let mut buf = [0i16; 160];
    assert_eq!(audio.playback_rx.pop_slice(&mut buf), 160);
}

#[test]
fn test_rx_drops_unselected_call_audio() {
    let (engine, endpoint, mut audio, _rec) = engine_with_mocks();

    let (call, id, _log) = connect_inbound(&engine, &endpoint);
    // Selected is elsewhere
    engine.select(None).unwrap();
    assert!(engine.call_info(call).unwrap().state.ringing);

    endpoint.push_event(
        id,
        SessionEventKind::Voice {
            data: Bytes::from(vec![0x55u8; 160]),
            timestamp: 0,
        },
    );
    engine.with_lock(|state| state.service_network());

    let mut buf = [0i16; 160];
    assert_eq!(audio.playback_rx.pop_slice(&mut buf), 0);
    engine.with_lock(|state| assert!(state.calls[call].decoder.is_none()));
}

#[test]
fn test_rx_suppressed_output_skips_backend() {
    let (engine, endpoint, mut audio, _rec) = engine_with_mocks();

    let (call, id, _log) = connect_inbound(&engine, &endpoint);
    engine.select(Some(call)).unwrap();
    engine.set_audio_output(true);

    endpoint.push_event(
        id,
        SessionEventKind::Voice {
            data: Bytes::from(vec![0x55u8; 160]),
            timestamp: 0,
        },
    );
    engine.with_lock(|state| state.service_network());

    let mut buf = [0i16; 160];
    assert_eq!(audio.playback_rx.pop_slice(&mut buf), 0);
    // The decoder still ran
    engine.with_lock(|state| assert!(state.calls[call].decoder.is_some()));
}

// ===== Gain feedback =====

#[test]
fn test_gain_feedback_thresholds() {
    let config = GainFeedbackConfig::default();

    // loudness=20000, level=0.8: hot, drop quickly to 0.6
    let adjusted = adjust_input_level(&config, 20000.0, 0.8).unwrap();
    assert!((adjusted - 0.6).abs() < 1e-6);

    // loudness=3000, level=0.4: cold, raise to 0.5
    let adjusted = adjust_input_level(&config, 3000.0, 0.4).unwrap();
    assert!((adjusted - 0.5).abs() < 1e-6);

    // Comfortable loudness: no adjustment
    assert!(adjust_input_level(&config, 6000.0, 0.5).is_none());

    // Warm but level already low: no adjustment
    assert!(adjust_input_level(&config, 9000.0, 0.1).is_none());
}

#[test]
fn test_gain_feedback_level_stays_in_range() {
    let config = GainFeedbackConfig::default();
    if let Some(level) = adjust_input_level(&config, 20000.0, 0.55) {
        assert!((0.0..=1.0).contains(&level));
    }
    if let Some(level) = adjust_input_level(&config, 1000.0, 0.9) {
        assert!((0.0..=1.0).contains(&level));
    }
}

// ===== Registration =====

#[test]
fn test_register_sends_initial_request() {
    let (engine, endpoint, _audio, _rec) = engine_with_mocks();

    let id = engine.register("iax.example.com", "alice", "secret", 60).unwrap();
    assert_eq!(id, 1);

    let log = endpoint.session_log(0);
    assert_eq!(
        log.lock().registered,
        vec![("iax.example.com".to_string(), "alice".to_string(), 60)]
    );
}

#[test]
fn test_refresh_recreates_session_and_reregisters() {
    let (engine, endpoint, _audio, _rec) = engine_with_mocks();

    engine.register("iax.example.com", "alice", "secret", 60).unwrap();
    assert_eq!(endpoint.session_count(), 1);

    // Not due yet: nothing happens
    engine.with_lock(|state| state.refresh_registrations());
    assert_eq!(endpoint.session_count(), 1);

    // Age the registration to within the refresh margin
    engine.with_lock(|state| {
        state.registrations[0].last = Instant::now() - Duration::from_secs(58);
    });
    engine.with_lock(|state| state.refresh_registrations());

    assert_eq!(endpoint.session_count(), 2);
    let log = endpoint.session_log(1);
    assert_eq!(log.lock().registered.len(), 1);
}

#[test]
fn test_reg_reject_removes_registration() {
    let (engine, endpoint, _audio, recorder) = engine_with_mocks();

    engine.register("iax.example.com", "alice", "secret", 60).unwrap();
    let reg_session = engine.with_lock(|state| {
        state.registrations[0].session.as_ref().map(|s| s.id()).unwrap()
    });

    endpoint.push_event(reg_session, SessionEventKind::RegReject);
    engine.with_lock(|state| state.service_network());

    assert!(recorder.events.lock().iter().any(|e| matches!(
        e,
        Event::Registration {
            reply: crate::RegistrationReply::Rejected,
            ..
        }
    )));
    engine.with_lock(|state| assert!(state.registrations.is_empty()));
}

#[test]
fn test_reg_ack_confirms_and_destroys_session() {
    let (engine, endpoint, _audio, recorder) = engine_with_mocks();

    engine.register("iax.example.com", "alice", "secret", 60).unwrap();
    let reg_session = engine.with_lock(|state| {
        state.registrations[0].session.as_ref().map(|s| s.id()).unwrap()
    });

    endpoint.push_event(reg_session, SessionEventKind::RegAck { msg_count: 2 });
    engine.with_lock(|state| state.service_network());

    assert!(recorder.events.lock().iter().any(|e| matches!(
        e,
        Event::Registration {
            reply: crate::RegistrationReply::Ack,
            msg_count: 2,
            ..
        }
    )));
    // Session destroyed so the next refresh starts clean
    engine.with_lock(|state| {
        assert_eq!(state.registrations.len(), 1);
        assert!(state.registrations[0].session.is_none());
    });
}

#[test]
fn test_auth_request_without_registration_rejects() {
    let (engine, endpoint, _audio, _rec) = engine_with_mocks();

    let call = engine.place_call("2002").unwrap();
    let id = engine.with_lock(|state| {
        state.calls[call].session.as_ref().map(|s| s.id()).unwrap()
    });
    let log = endpoint.session_log(0);

    endpoint.push_event(
        id,
        SessionEventKind::AuthRequest {
            challenge: "12345".into(),
        },
    );
    engine.with_lock(|state| state.service_network());

    assert_eq!(log.lock().rejected, vec!["No registration found".to_string()]);
}

#[test]
fn test_auth_request_answered_from_registration() {
    let (engine, endpoint, _audio, _rec) = engine_with_mocks();

    engine.register("iax.example.com", "alice", "secret", 60).unwrap();
    let call = engine.place_call("2002").unwrap();
    let id = engine.with_lock(|state| {
        state.calls[call].session.as_ref().map(|s| s.id()).unwrap()
    });
    let log = endpoint.session_log(1);

    endpoint.push_event(
        id,
        SessionEventKind::AuthRequest {
            challenge: "12345".into(),
        },
    );
    engine.with_lock(|state| state.service_network());

    assert_eq!(log.lock().auth_replies, vec!["secret".to_string()]);
}

// ===== Miscellaneous API =====

#[test]
fn test_push_audio_honors_send_disable() {
    let (engine, endpoint, _audio, _rec) = engine_with_mocks();

    let call = engine.place_call("2002").unwrap();
    engine.with_lock(|state| state.calls[call].format = Some(FormatId::Ulaw));

    engine.push_audio(&[0u8; 160], 160).unwrap();
    assert_eq!(endpoint.session_log(0).lock().voice.len(), 1);

    let mut prefs = crate::AudioPrefs::default();
    prefs.send_disable = true;
    engine.set_audio_prefs(prefs);
    engine.push_audio(&[0u8; 160], 160).unwrap();
    assert_eq!(endpoint.session_log(0).lock().voice.len(), 1);
}

#[test]
fn test_dtmf_requires_active_selected_call() {
    let (engine, endpoint, _audio, _rec) = engine_with_mocks();

    // No call: silently ignored, like the original API
    engine.send_dtmf('5').unwrap();

    let _call = engine.place_call("2002").unwrap();
    engine.send_dtmf('5').unwrap();
    assert_eq!(endpoint.session_log(0).lock().dtmf, vec!['5']);
}

#[test]
fn test_key_unkey_radio_toggles_ptt() {
    let (engine, endpoint, _audio, _rec) = engine_with_mocks();

    let call = engine.place_call("2002").unwrap();
    engine.key_radio(call).unwrap();
    engine.with_lock(|state| assert_eq!(state.ptt, Some(call)));
    engine.unkey_radio(call).unwrap();
    engine.with_lock(|state| assert_eq!(state.ptt, None));

    let log = endpoint.session_log(0);
    assert_eq!(log.lock().keyed, 1);
    assert_eq!(log.lock().unkeyed, 1);
}

#[test]
fn test_main_loop_dispatches_events() {
    let (mut engine, endpoint, _audio, recorder) = engine_with_mocks();
    engine.start_processing_thread().unwrap();

    let (session, id, _log) = endpoint.remote_session();
    endpoint.push_event(
        id,
        SessionEventKind::Connect {
            offer: default_offer(),
            session,
        },
    );

    // Give the loop a few iterations to pick the event up
    let deadline = Instant::now() + Duration::from_secs(2);
    let mut seen = false;
    while Instant::now() < deadline {
        if recorder
            .state_events()
            .iter()
            .any(|(_, state)| state.ringing)
        {
            seen = true;
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    engine.stop_processing_thread();
    assert!(seen, "main loop never dispatched the connect");
}
