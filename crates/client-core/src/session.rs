//! Session capability: the seam to the wire protocol
//!
//! The protocol implementation (packet framing, retransmission, jitter
//! buffering) lives outside this crate. The engine sees an opaque
//! [`Session`] per call or registration, and one [`SessionEndpoint`] that
//! creates sessions and yields [`SessionEvent`]s when polled. Events carry
//! the [`SessionId`] they belong to; the dispatcher resolves that against
//! the call table and the registration list.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use riax_codec_core::{FormatId, FormatSet};

/// Result type alias for session operations
pub type SessionResult<T> = std::result::Result<T, SessionError>;

/// Error type for session operations
#[derive(Error, Debug)]
pub enum SessionError {
    /// A new session could not be created
    #[error("Can't make new session: {reason}")]
    CreateFailed {
        /// Why
        reason: String,
    },

    /// A send on an established session failed
    #[error("Failed to send {what}: {reason}")]
    SendFailed {
        /// What was being sent ("voice", "dtmf", ...)
        what: String,
        /// Why
        reason: String,
    },

    /// The protocol layer reported an error
    #[error("Protocol error: {reason}")]
    Protocol {
        /// Why
        reason: String,
    },
}

impl SessionError {
    /// Create a new send failure
    pub fn send_failed(what: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SendFailed {
            what: what.into(),
            reason: reason.into(),
        }
    }
}

/// Opaque identifier of a protocol session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u64);

/// Options for placing an outgoing call
#[derive(Debug, Clone)]
pub struct DialOptions {
    /// Destination, e.g. "guest@host/2001"
    pub number: String,
    /// Caller id name to present
    pub callerid_name: String,
    /// Caller id number to present
    pub callerid_number: String,
    /// Our preferred format(s)
    pub preferred: FormatSet,
    /// Our full capability
    pub capability: FormatSet,
}

/// Network statistics for one direction of a call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkStats {
    /// Interarrival jitter in milliseconds
    pub jitter_ms: u32,
    /// Loss percentage (0..100)
    pub loss_percent: u32,
    /// Absolute count of lost frames
    pub loss_count: u32,
    /// Frames received
    pub packets: u32,
    /// Current playout delay in milliseconds
    pub delay_ms: u32,
    /// Frames dropped by the jitter buffer
    pub dropped: u32,
    /// Frames that arrived out of order
    pub out_of_order: u32,
}

/// Round-trip and per-direction statistics for a call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetStats {
    /// Round-trip time in milliseconds
    pub rtt_ms: i32,
    /// What we measured on received media
    pub local: LinkStats,
    /// What the remote end reported about our media
    pub remote: LinkStats,
}

/// What an inbound connect offers
#[derive(Debug, Clone, Default)]
pub struct ConnectOffer {
    /// The format the remote end wants to use
    pub format: FormatSet,
    /// Everything the remote end can do
    pub capability: FormatSet,
    /// Calling number, if supplied
    pub calling_number: Option<String>,
    /// Calling display name, if supplied
    pub calling_name: Option<String>,
    /// The number they dialed
    pub called_number: Option<String>,
    /// The dialplan context they dialed into
    pub called_context: Option<String>,
}

/// One polled protocol event
pub struct SessionEvent {
    /// Session the event belongs to
    pub session: SessionId,
    /// What happened
    pub kind: SessionEventKind,
}

/// The discriminated protocol event kinds
pub enum SessionEventKind {
    /// Remote hangup
    Hangup,
    /// Remote rejected our call
    Reject,
    /// Remote accepted our call and chose formats
    Accept {
        /// Chosen format word (audio and video bits)
        format: FormatSet,
    },
    /// Remote answered
    Answer,
    /// Remote is busy
    Busy,
    /// An encoded voice chunk
    Voice {
        /// Encoded payload; may contain several codec frames
        data: Bytes,
        /// Protocol timestamp
        timestamp: u32,
    },
    /// A text message
    Text {
        /// The message
        message: String,
    },
    /// Remote is ringing
    Ringing,
    /// Reply to our ping
    PingReply,
    /// A URL push
    Url {
        /// Kind of push
        kind: crate::events::UrlKind,
        /// The URL, empty for control-only pushes
        url: String,
    },
    /// The remote end went silent and will send comfort noise
    SilenceIndicator {
        /// Noise level hint
        level: u8,
    },
    /// The protocol layer gave up on this session
    Timeout,
    /// The call was released to a transfer target
    TransferReleased,
    /// A DTMF digit
    Dtmf {
        /// The digit
        digit: char,
    },
    /// The peer wants authentication
    AuthRequest {
        /// Challenge to reply to
        challenge: String,
    },
    /// Registration accepted
    RegAck {
        /// Messages waiting, per the server
        msg_count: u16,
    },
    /// Registration rejected
    RegReject,
    /// An inbound call
    Connect {
        /// What the caller offers
        offer: ConnectOffer,
        /// The new session for this call; the dispatcher takes ownership
        session: Box<dyn Session>,
    },
    /// The peer requests a keepalive reply (handled by the protocol layer)
    KeepaliveRequest {
        /// Protocol timestamp of the request
        timestamp: u32,
    },
    /// The remote end keyed its radio
    RadioKey,
    /// The remote end released its radio
    RadioUnkey,
    /// A protocol event this core does not understand
    Other {
        /// Raw event type code
        code: u32,
    },
}

impl SessionEventKind {
    /// Short name for diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            Self::Hangup => "HANGUP",
            Self::Reject => "REJECT",
            Self::Accept { .. } => "ACCEPT",
            Self::Answer => "ANSWER",
            Self::Busy => "BUSY",
            Self::Voice { .. } => "VOICE",
            Self::Text { .. } => "TEXT",
            Self::Ringing => "RINGING",
            Self::PingReply => "PING_REPLY",
            Self::Url { .. } => "URL",
            Self::SilenceIndicator { .. } => "SILENCE_INDICATOR",
            Self::Timeout => "TIMEOUT",
            Self::TransferReleased => "TRANSFER",
            Self::Dtmf { .. } => "DTMF",
            Self::AuthRequest { .. } => "AUTH_REQUEST",
            Self::RegAck { .. } => "REG_ACK",
            Self::RegReject => "REG_REJECT",
            Self::Connect { .. } => "CONNECT",
            Self::KeepaliveRequest { .. } => "KEEPALIVE_REQUEST",
            Self::RadioKey => "RADIO_KEY",
            Self::RadioUnkey => "RADIO_UNKEY",
            Self::Other { .. } => "OTHER",
        }
    }
}

/// One protocol session, bound to a call or a registration
pub trait Session: Send {
    /// This session's id; events carry it
    fn id(&self) -> SessionId;

    /// Place an outgoing call on this session
    fn dial(&mut self, options: &DialOptions) -> SessionResult<()>;

    /// Accept an inbound call with the negotiated format word
    fn accept(&mut self, format: FormatSet) -> SessionResult<()>;

    /// Answer an inbound call
    fn answer(&mut self) -> SessionResult<()>;

    /// Announce local ringing to the caller
    fn ring_announce(&mut self) -> SessionResult<()>;

    /// Reject the call
    fn reject(&mut self, reason: &str) -> SessionResult<()>;

    /// Hang the call up
    fn hangup(&mut self, reason: &str) -> SessionResult<()>;

    /// Report busy to the caller
    fn busy(&mut self) -> SessionResult<()>;

    /// Blind-transfer the call to a destination extension
    fn transfer(&mut self, destination: &str) -> SessionResult<()>;

    /// Send one encoded voice chunk
    fn send_voice(&mut self, format: FormatId, data: &[u8], samples: usize) -> SessionResult<()>;

    /// Send a comfort-noise indication at the given level
    fn send_comfort_noise(&mut self, level: u8) -> SessionResult<()>;

    /// Send a DTMF digit
    fn send_dtmf(&mut self, digit: char) -> SessionResult<()>;

    /// Send a text message
    fn send_text(&mut self, text: &str) -> SessionResult<()>;

    /// Push a URL to the remote end
    fn send_url(&mut self, url: &str, link: bool) -> SessionResult<()>;

    /// Reply to an authentication challenge
    fn auth_reply(&mut self, password: &str, challenge: &str) -> SessionResult<()>;

    /// Send a registration request on this session
    fn register(
        &mut self,
        host: &str,
        user: &str,
        password: &str,
        refresh_secs: u64,
    ) -> SessionResult<()>;

    /// Latest network statistics, when the protocol layer has them
    fn netstats(&self) -> Option<NetStats>;

    /// Stop sending media (hold), optionally with music-on-hold
    fn quelch(&mut self, music_on_hold: bool) -> SessionResult<()>;

    /// Resume sending media
    fn unquelch(&mut self) -> SessionResult<()>;

    /// Key the radio on the remote end
    fn key_radio(&mut self) -> SessionResult<()>;

    /// Unkey the radio on the remote end
    fn unkey_radio(&mut self) -> SessionResult<()>;
}

/// Creates sessions and yields polled events
pub trait SessionEndpoint: Send {
    /// Create a fresh session for an outgoing call or a registration
    fn create_session(&mut self) -> SessionResult<Box<dyn Session>>;

    /// Poll the next pending event; returns immediately
    fn poll_event(&mut self) -> Option<SessionEvent>;
}
