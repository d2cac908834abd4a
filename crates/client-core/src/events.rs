//! Application-facing events
//!
//! Everything the engine wants the application to know arrives as one
//! [`Event`] per delivery. Events are queued while the engine lock is held
//! and delivered strictly after it is released, so a slow or re-entrant
//! handler can never observe (or deadlock against) a half-updated call
//! table.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use riax_codec_core::FormatId;

use crate::call::{CallId, CallState};
use crate::registration::RegistrationReply;
use crate::session::NetStats;

/// Severity tag for text events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextSeverity {
    /// Routine status, e.g. call progress
    Status,
    /// Something the user may want to see
    Notice,
    /// A contained failure
    Error,
    /// A process-wide failure; advisory only, the engine keeps running
    Fatal,
    /// Text received from the remote end
    Remote,
}

/// Where an audio payload came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioSource {
    /// Captured locally
    Local,
    /// Received from the network
    Remote,
}

/// Kind of URL push received from the remote end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UrlKind {
    /// Load this URL
    Url,
    /// Load this URL as a link
    LinkUrl,
    /// Loading complete
    LoadComplete,
    /// Unlink
    Unlink,
    /// Link rejected
    LinkReject,
}

/// One application event
#[derive(Debug, Clone)]
pub enum Event {
    /// Free-form text with a severity tag; `call` is set when the message
    /// concerns one appearance
    Text {
        /// Severity tag
        severity: TextSeverity,
        /// Concerned appearance, if any
        call: Option<CallId>,
        /// The message
        message: String,
    },
    /// A call changed state; carries a full snapshot
    State {
        /// The appearance
        call: CallId,
        /// State flags after the transition
        state: CallState,
        /// Negotiated audio format
        format: Option<FormatId>,
        /// Negotiated video format
        vformat: Option<FormatId>,
        /// Remote number
        remote: String,
        /// Remote display name
        remote_name: String,
        /// Local identity
        local: String,
        /// Local dialplan context
        local_context: String,
    },
    /// Mirrored audio, raw or encoded, per the audio preferences
    Audio {
        /// The appearance
        call: CallId,
        /// Local capture or remote network audio
        source: AudioSource,
        /// Whether `data` is encoded (true) or raw PCM bytes (false)
        encoded: bool,
        /// Wire format for encoded payloads
        format: Option<FormatId>,
        /// Protocol timestamp of the chunk, when known
        timestamp: u32,
        /// The payload
        data: Bytes,
    },
    /// A DTMF digit arrived
    Dtmf {
        /// The appearance
        call: CallId,
        /// The digit
        digit: char,
    },
    /// A registration reply arrived
    Registration {
        /// Registration id
        id: u32,
        /// Ack or rejection
        reply: RegistrationReply,
        /// Messages waiting, per the server
        msg_count: u16,
    },
    /// Network statistics in reply to a ping
    NetStats {
        /// The appearance
        call: CallId,
        /// The statistics
        stats: NetStats,
    },
    /// The remote end keyed its radio
    RadioKey,
    /// The remote end released its radio
    RadioUnkey,
    /// Input/output level report, at most one per 100 ms
    Levels {
        /// Input level in dB
        input_db: f32,
        /// Output level in dB
        output_db: f32,
    },
    /// A URL push from the remote end
    Url {
        /// The appearance
        call: CallId,
        /// Kind of push
        kind: UrlKind,
        /// The URL (empty for control-only pushes)
        url: String,
    },
}

/// What a handler did with an event. Logged, never enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    /// The handler consumed the event
    Handled,
    /// The handler did not care
    Ignored,
}

/// Receives every [`Event`], outside the engine lock
pub trait EventHandler: Send + Sync {
    /// Handle one event. The return value is logged at debug level and has
    /// no effect on the engine.
    fn on_event(&self, event: Event) -> EventAction;
}

/// Handler that drops everything; useful before the application installs
/// its own
pub struct NullEventHandler;

impl EventHandler for NullEventHandler {
    fn on_event(&self, _event: Event) -> EventAction {
        EventAction::Ignored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_event_roundtrips_severity() {
        let event = Event::Text {
            severity: TextSeverity::Error,
            call: Some(2),
            message: "encode error".into(),
        };
        match event {
            Event::Text { severity, call, .. } => {
                assert_eq!(severity, TextSeverity::Error);
                assert_eq!(call, Some(2));
            }
            _ => panic!("wrong variant"),
        }
    }
}
