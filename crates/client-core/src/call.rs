//! Call appearances and their state
//!
//! A call appearance is one slot in the fixed-size call table. Appearances
//! are addressed by a stable index ([`CallId`]) which is only reused after
//! the appearance has returned to FREE.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use riax_codec_core::{AudioCodec, FormatId};

use crate::session::Session;

/// Stable index of a call appearance in the call table
pub type CallId = usize;

/// Caller id name used until the application sets one
pub const DEFAULT_CALLERID_NAME: &str = "Not Available";
/// Caller id number used until the application sets one
pub const DEFAULT_CALLERID_NUMBER: &str = "7005551212";

/// Call state as a set of orthogonal flags.
///
/// The flags are independent, not mutually exclusive: an established
/// outgoing call is `active + outgoing + complete`, and may also be
/// `selected`. FREE is the absence of every flag. Keeping them separate
/// (rather than a bitmask) makes illegal combinations visible at the use
/// site.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallState {
    /// A session exists for this appearance
    pub active: bool,
    /// We originated the call
    pub outgoing: bool,
    /// Ring-back (outgoing) or ringing locally (inbound)
    pub ringing: bool,
    /// The call has been answered end-to-end
    pub complete: bool,
    /// The remote end reported busy
    pub busy: bool,
    /// The call was released to a transfer target
    pub transfer: bool,
    /// This appearance is bridged to the local audio device
    pub selected: bool,
}

impl CallState {
    /// Whether the appearance is FREE (no flag set)
    pub fn is_free(&self) -> bool {
        *self == CallState::default()
    }
}

/// One call appearance
pub struct Call {
    /// Current state flags
    pub state: CallState,
    /// Protocol session; `Some` iff the appearance is not FREE
    pub session: Option<Box<dyn Session>>,
    /// Negotiated audio format
    pub format: Option<FormatId>,
    /// Negotiated video format
    pub vformat: Option<FormatId>,
    /// Encoder, created lazily on the first voiced frame
    pub encoder: Option<Box<dyn AudioCodec>>,
    /// Decoder, created lazily on the first received chunk
    pub decoder: Option<Box<dyn AudioCodec>>,
    /// True while we are emitting comfort noise instead of voice
    pub tx_silent: bool,
    /// Local identity (called number on inbound, caller id name on outgoing)
    pub local: String,
    /// Local dialplan context
    pub local_context: String,
    /// Remote number
    pub remote: String,
    /// Remote display name
    pub remote_name: String,
    /// Caller id name we present
    pub callerid_name: String,
    /// Caller id number we present
    pub callerid_number: String,
    /// Last time any protocol event touched this call
    pub last_activity: Instant,
    /// Last time we pinged this call
    pub last_ping: Instant,
}

impl Call {
    /// Create a FREE appearance
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            state: CallState::default(),
            session: None,
            format: None,
            vformat: None,
            encoder: None,
            decoder: None,
            tx_silent: false,
            local: String::new(),
            local_context: String::new(),
            remote: String::new(),
            remote_name: String::new(),
            callerid_name: DEFAULT_CALLERID_NAME.to_string(),
            callerid_number: DEFAULT_CALLERID_NUMBER.to_string(),
            last_activity: now,
            last_ping: now,
        }
    }

    /// Record protocol activity
    pub fn note_activity(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Drop the encoder and decoder. Done before an appearance is reused
    /// and whenever the negotiated format goes away.
    pub fn destroy_codecs(&mut self) {
        self.encoder = None;
        self.decoder = None;
    }

    /// Return the appearance to FREE: drop the session reference, destroy
    /// codecs, clear formats. Identity strings survive so late events can
    /// still be attributed in logs.
    pub fn clear(&mut self) {
        self.state = CallState::default();
        self.format = None;
        self.vformat = None;
        self.session = None;
        self.tx_silent = false;
        self.destroy_codecs();
    }
}

impl Default for Call {
    fn default() -> Self {
        Self::new()
    }
}
