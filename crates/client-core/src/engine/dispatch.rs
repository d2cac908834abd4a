//! The network event dispatcher
//!
//! Drains the protocol endpoint once per main-loop iteration and maps each
//! event onto a call-state transition, a registration action, or an
//! ancillary application event. Events that resolve to no known session are
//! dropped with a diagnostic.

use riax_codec_core::{choose_preferred, negotiate, FormatSet};

use crate::call::{CallId, CallState};
use crate::events::{Event, TextSeverity};
use crate::registration::RegistrationReply;
use crate::session::{ConnectOffer, Session, SessionEvent, SessionEventKind};

use super::EngineState;

impl EngineState {
    /// Drain and dispatch all pending protocol events
    pub(crate) fn service_network(&mut self) {
        while let Some(event) = self.endpoint.poll_event() {
            let SessionEvent { session, kind } = event;

            if let Some(call_no) = self.find_call_by_session(session) {
                self.handle_network_event(call_no, kind);
            } else if let Some(reg_idx) = self
                .registrations
                .iter()
                .position(|r| r.session.as_ref().map(|s| s.id()) == Some(session))
            {
                self.handle_regreply(reg_idx, kind);
            } else {
                match kind {
                    SessionEventKind::Connect { offer, session } => {
                        self.handle_connect(offer, session)
                    }
                    SessionEventKind::RegAck { .. } | SessionEventKind::RegReject => {
                        self.usermsg(TextSeverity::Error, "Unexpected registration reply");
                    }
                    SessionEventKind::Timeout => {
                        self.usermsg(
                            TextSeverity::Status,
                            "Timeout for a non-existent session. Dropping",
                        );
                    }
                    other => {
                        self.usermsg(
                            TextSeverity::Error,
                            format!(
                                "Event {} for a non-existent session. Dropping",
                                other.name()
                            ),
                        );
                    }
                }
            }
        }
    }

    /// Map one protocol event for a known call onto a state transition
    pub(crate) fn handle_network_event(&mut self, call_no: CallId, kind: SessionEventKind) {
        self.calls[call_no].note_activity();

        match kind {
            SessionEventKind::Hangup => {
                self.usermsg(TextSeverity::Status, "Call disconnected by remote");
                self.clear_call(call_no);
            }

            SessionEventKind::Reject => {
                self.usermsg(TextSeverity::Status, "Call rejected by remote");
                self.clear_call(call_no);
            }

            SessionEventKind::Accept { format } => {
                let call = &mut self.calls[call_no];
                call.format = choose_preferred(format.audio());
                call.vformat = choose_preferred(format.video());
                self.usermsg(TextSeverity::Status, format!("Call {call_no} accepted"));
            }

            SessionEventKind::Answer => {
                let call = &mut self.calls[call_no];
                call.state.ringing = false;
                call.state.complete = true;
                self.state_event(call_no);
            }

            SessionEventKind::Busy => {
                let call = &mut self.calls[call_no];
                call.state.ringing = false;
                call.state.busy = true;
                self.state_event(call_no);
                self.usermsg(TextSeverity::Status, format!("Call {call_no} busy"));
            }

            SessionEventKind::Voice { data, timestamp } => {
                self.handle_voice(call_no, &data, timestamp);
                // First voice on a ringing outgoing call means it's up even
                // if no ANSWER was seen.
                let state = self.calls[call_no].state;
                if state.outgoing && state.ringing {
                    let call = &mut self.calls[call_no];
                    call.state.ringing = false;
                    call.state.complete = true;
                    self.state_event(call_no);
                    self.usermsg(TextSeverity::Status, format!("Call {call_no} progress"));
                }
            }

            SessionEventKind::Text { message } => {
                // Pass up as a notice so the application can show it
                self.pending_events.push_back(Event::Text {
                    severity: TextSeverity::Notice,
                    call: Some(call_no),
                    message,
                });
            }

            SessionEventKind::Ringing => {
                self.calls[call_no].state.ringing = true;
                self.state_event(call_no);
                self.usermsg(TextSeverity::Status, format!("Call {call_no} ringing"));
            }

            SessionEventKind::PingReply => {
                let stats = self.calls[call_no].session.as_ref().and_then(|s| s.netstats());
                if let Some(stats) = stats {
                    self.pending_events.push_back(Event::NetStats {
                        call: call_no,
                        stats,
                    });
                }
            }

            SessionEventKind::Url { kind, url } => {
                self.pending_events.push_back(Event::Url {
                    call: call_no,
                    kind,
                    url,
                });
            }

            SessionEventKind::SilenceIndicator { level } => {
                tracing::debug!(call = call_no, level, "remote went silent");
            }

            SessionEventKind::Timeout => {
                if let Some(session) = self.calls[call_no].session.as_mut() {
                    if let Err(e) = session.hangup("Call timed out") {
                        tracing::debug!(call = call_no, "hangup on timeout failed: {}", e);
                    }
                }
                self.usermsg(TextSeverity::Status, format!("Call {call_no} timed out."));
                self.clear_call(call_no);
            }

            SessionEventKind::TransferReleased => {
                self.calls[call_no].state.transfer = true;
                self.state_event(call_no);
                self.usermsg(
                    TextSeverity::Status,
                    format!("Call {call_no} transfer released"),
                );
            }

            SessionEventKind::Dtmf { digit } => {
                self.pending_events.push_back(Event::Dtmf {
                    call: call_no,
                    digit,
                });
                self.usermsg(TextSeverity::Status, format!("DTMF digit {digit} received"));
            }

            SessionEventKind::AuthRequest { challenge } => {
                // Answer from the registration table; without credentials
                // the call cannot proceed.
                let password = self.registrations.first().map(|r| r.pass.clone());
                if let Some(session) = self.calls[call_no].session.as_mut() {
                    match password {
                        Some(password) => {
                            if let Err(e) = session.auth_reply(&password, &challenge) {
                                tracing::warn!(call = call_no, "auth reply failed: {}", e);
                            }
                        }
                        None => {
                            tracing::warn!(call = call_no, "authentication requested, no registration");
                            let _ = session.reject("No registration found");
                        }
                    }
                }
            }

            SessionEventKind::RegAck { .. } | SessionEventKind::RegReject => {
                self.usermsg(TextSeverity::Error, "Unexpected registration reply");
            }

            SessionEventKind::Connect { .. } => {
                // A connect for a session we already track makes no sense;
                // dropping the carried session ends it.
                self.usermsg(
                    TextSeverity::Error,
                    format!("Connect event for existing call {call_no}. Dropping"),
                );
            }

            SessionEventKind::KeepaliveRequest { timestamp } => {
                // The protocol layer answers these itself
                tracing::debug!(call = call_no, timestamp, "keepalive request");
            }

            SessionEventKind::RadioKey => {
                self.pending_events.push_back(Event::RadioKey);
            }

            SessionEventKind::RadioUnkey => {
                self.pending_events.push_back(Event::RadioUnkey);
            }

            SessionEventKind::Other { code } => {
                self.usermsg(
                    TextSeverity::Status,
                    format!("Unknown event: {code} for call {call_no}"),
                );
            }
        }
    }

    /// An inbound call: find an appearance, negotiate a codec, accept and
    /// announce ringing
    pub(crate) fn handle_connect(&mut self, offer: ConnectOffer, mut session: Box<dyn Session>) {
        let Some(call_no) = self.first_free_call() else {
            self.usermsg(TextSeverity::Status, "Incoming call, but no free call appearances");
            // Accept-then-busy lets the caller hear a busy indication
            // instead of a bare rejection.
            let _ = session.accept(self.preferred.intersect(offer.capability));
            let _ = session.busy();
            return;
        };

        let format = match negotiate(
            self.capability.audio(),
            self.preferred.audio(),
            offer.format.audio(),
            offer.capability.audio(),
        ) {
            Ok(format) => format,
            Err(e) => {
                tracing::info!("inbound call rejected: {}", e);
                let _ = session.reject("Could not negotiate common codec");
                return;
            }
        };

        // Video is best-effort: take their offered format if we carry it,
        // otherwise the call is audio-only.
        let vformat = choose_preferred(
            self.capability
                .video()
                .intersect(offer.format.video().union(offer.capability.video())),
        );

        let remote = offer.calling_number.unwrap_or_else(|| "unknown".into());
        self.usermsg(TextSeverity::Status, format!("Call from ({remote})"));

        let call = &mut self.calls[call_no];
        call.format = Some(format);
        call.vformat = vformat;
        call.local = offer.called_number.unwrap_or_else(|| "unknown".into());
        call.local_context = offer.called_context.unwrap_or_default();
        call.remote = remote;
        call.remote_name = offer.calling_name.unwrap_or_else(|| "unknown".into());
        call.note_activity();
        call.destroy_codecs();

        let mut accept_format = FormatSet::from(format);
        if let Some(vformat) = vformat {
            accept_format.insert(vformat);
        }
        if let Err(e) = session.accept(accept_format) {
            tracing::warn!(call = call_no, "accept failed: {}", e);
        }
        if let Err(e) = session.ring_announce() {
            tracing::debug!(call = call_no, "ring announce failed: {}", e);
        }

        call.session = Some(session);
        call.state = CallState {
            active: true,
            ringing: true,
            ..CallState::default()
        };

        self.state_event(call_no);
        self.usermsg(TextSeverity::Status, format!("Incoming call on line {call_no}"));
    }

    /// A reply on a registration session: confirm to the application, then
    /// tear the session down so the next refresh starts clean
    pub(crate) fn handle_regreply(&mut self, reg_idx: usize, kind: SessionEventKind) {
        let reply = match kind {
            SessionEventKind::RegAck { msg_count } => (RegistrationReply::Ack, msg_count),
            SessionEventKind::RegReject => (RegistrationReply::Rejected, 0),
            SessionEventKind::Timeout => (RegistrationReply::Timeout, 0),
            other => {
                tracing::debug!(
                    "event {} on registration session, ignoring",
                    other.name()
                );
                return;
            }
        };

        let reg = &mut self.registrations[reg_idx];
        let id = reg.id;
        reg.session = None;

        self.pending_events.push_back(Event::Registration {
            id,
            reply: reply.0,
            msg_count: reply.1,
        });

        if reply.0 == RegistrationReply::Rejected {
            self.registrations.remove(reg_idx);
        }
    }
}
