//! # Client-Core: call handling for the riax softphone core
//!
//! This crate multiplexes a fixed number of call appearances over an
//! IAX-style signaling layer and drives the per-call audio pipeline. It
//! owns:
//!
//! - the **call table** — a fixed-capacity arena of [`call::Call`] records
//!   addressed by stable index, each owning its codec instances and a
//!   reference to the protocol session
//! - the **network event dispatcher** — maps polled protocol events onto
//!   call-state transitions, registration bookkeeping, and pipeline actions
//! - the **audio TX/RX pipeline** — normalization, voice-activity gating,
//!   comfort-noise signaling, codec lifecycles
//! - the **registration manager** — periodic re-registration independent of
//!   calls
//! - the **main loop** — one cooperative thread alternating event dispatch
//!   and audio service under a single lock
//!
//! The wire protocol itself lives behind the [`session::Session`] and
//! [`session::SessionEndpoint`] traits; audio hardware behind
//! [`riax_media_core::AudioBackend`]. Application code receives
//! [`events::Event`]s through an [`events::EventHandler`], always invoked
//! *after* the engine lock has been released.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use riax_client_core::{ClientConfig, ClientEngine};
//!
//! let mut engine = ClientEngine::new(ClientConfig::default(), endpoint, backend);
//! engine.set_event_handler(handler);
//! engine.start_processing_thread()?;
//! let call = engine.place_call("2001")?;
//! ```

pub mod call;
pub mod engine;
pub mod events;
pub mod registration;
pub mod session;

use thiserror::Error;

pub use call::{Call, CallId, CallState};
pub use engine::{
    adjust_input_level, AudioPrefs, CallInfo, ClientConfig, ClientEngine, GainFeedbackConfig,
};
pub use events::{AudioSource, Event, EventAction, EventHandler, TextSeverity, UrlKind};
pub use registration::{Registration, RegistrationReply};
pub use session::{
    ConnectOffer, DialOptions, LinkStats, NetStats, Session, SessionEndpoint, SessionError,
    SessionEvent, SessionEventKind, SessionId, SessionResult,
};

/// Result type alias for client operations
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Error type for client operations
#[derive(Error, Debug)]
pub enum ClientError {
    /// Every call appearance is in use
    #[error("No free call appearances")]
    NoFreeCallAppearance,

    /// A call index outside the table, or an operation on a FREE appearance
    #[error("Invalid call: {call}")]
    InvalidCall {
        /// The offending call index
        call: usize,
    },

    /// The operation needs a selected call and none is selected
    #[error("No call selected")]
    NoCallSelected,

    /// The operation needs a negotiated format which does not exist yet
    #[error("No negotiated format for call {call}")]
    NoNegotiatedFormat {
        /// The offending call index
        call: usize,
    },

    /// No registration exists with the given id
    #[error("Unknown registration: {id}")]
    UnknownRegistration {
        /// The offending registration id
        id: u32,
    },

    /// Signaling layer failure
    #[error(transparent)]
    Session(#[from] session::SessionError),

    /// Codec layer failure
    #[error(transparent)]
    Codec(#[from] riax_codec_core::CodecError),

    /// Audio backend failure
    #[error(transparent)]
    Media(#[from] riax_media_core::MediaError),

    /// Internal failure (thread spawn and the like)
    #[error("Internal error: {message}")]
    Internal {
        /// Description of what failed
        message: String,
    },
}

impl ClientError {
    /// Create a new internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}
