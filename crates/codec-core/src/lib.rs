//! # Codec-Core: Audio Codec Capability for riax
//!
//! This library provides the codec layer of the riax softphone core: wire
//! format identifiers, capability sets, codec negotiation, and per-call
//! encoder/decoder instances behind a single [`AudioCodec`] trait.
//!
//! ## Features
//!
//! - **G.711 (ULAW/ALAW)**: ITU-T compliant μ-law and A-law with
//!   table-driven decoding
//! - **Signed linear**: 16-bit PCM passthrough in network byte order
//! - **Negotiation**: the three-step capability intersection used by
//!   IAX-style endpoints, with a fixed codec priority order
//!
//! Formats the factory does not implement (GSM, iLBC, Speex, ...) still have
//! first-class [`FormatId`] values so they participate in capability
//! exchange and negotiation; creating a codec for them returns
//! [`CodecError::UnsupportedCodec`].
//!
//! ## Usage
//!
//! ```rust
//! use riax_codec_core::{CodecFactory, FormatId};
//!
//! // Create a G.711 μ-law codec for one call
//! let mut codec = CodecFactory::create(FormatId::Ulaw)?;
//!
//! // Encode audio samples
//! let samples = vec![0i16; 160]; // 20ms at 8kHz
//! let encoded = codec.encode(&samples)?;
//!
//! // Decode back to samples
//! let decoded = codec.decode(&encoded)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod codecs;
pub mod error;
pub mod format;
pub mod types;

// Re-export commonly used types and traits
pub use codecs::CodecFactory;
pub use error::{CodecError, Result};
pub use format::{choose_preferred, negotiate, FormatId, FormatSet, NegotiationError};
pub use types::{AudioCodec, CodecInfo};

/// Version information for the codec library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the codec library
///
/// This function should be called once at program startup to initialize
/// logging and the G.711 lookup tables. It's safe to call multiple times.
pub fn init() {
    // Initialize logging if not already done
    let _ = tracing_subscriber::fmt::try_init();

    codecs::g711::init_tables();

    tracing::info!("riax-codec-core v{} initialized", VERSION);
    tracing::info!(
        "implemented codecs: {:?}",
        CodecFactory::implemented_formats()
    );
}
