//! Codec implementations and factory

use crate::error::{CodecError, Result};
use crate::format::FormatId;
use crate::types::AudioCodec;

pub mod g711;
pub mod slinear;

/// Codec factory for creating codec instances
///
/// Instances are created per call and per direction; there is no pooling.
pub struct CodecFactory;

impl CodecFactory {
    /// Create a codec instance for a wire format
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnsupportedCodec`] for formats that participate
    /// in negotiation but have no implementation here.
    pub fn create(format: FormatId) -> Result<Box<dyn AudioCodec>> {
        match format {
            FormatId::Ulaw => Ok(Box::new(g711::G711Codec::ulaw())),
            FormatId::Alaw => Ok(Box::new(g711::G711Codec::alaw())),
            FormatId::Slinear => Ok(Box::new(slinear::SlinearCodec::new())),
            other => {
                tracing::warn!("no codec implementation for {}", other);
                Err(CodecError::unsupported_codec(other.name()))
            }
        }
    }

    /// The formats [`CodecFactory::create`] can actually build
    pub fn implemented_formats() -> &'static [FormatId] {
        &[FormatId::Ulaw, FormatId::Alaw, FormatId::Slinear]
    }

    /// Check whether a format has an implementation
    pub fn is_implemented(format: FormatId) -> bool {
        Self::implemented_formats().contains(&format)
    }
}
