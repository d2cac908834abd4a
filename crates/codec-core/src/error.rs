//! Error handling for the codec library

#![allow(missing_docs)]

use thiserror::Error;

/// Result type alias for codec operations
pub type Result<T> = std::result::Result<T, CodecError>;

/// Error type for codec operations
#[derive(Error, Debug)]
pub enum CodecError {
    /// Format known to the wire protocol but not implemented by the factory
    #[error("Unsupported codec: {format}")]
    UnsupportedCodec { format: String },

    /// Encoding operation failed
    #[error("Encoding failed: {reason}")]
    EncodingFailed { reason: String },

    /// Decoding operation failed
    #[error("Decoding failed: {reason}")]
    DecodingFailed { reason: String },

    /// Invalid frame size for this codec
    #[error("Invalid frame size: expected multiple of {expected}, got {actual}")]
    InvalidFrameSize { expected: usize, actual: usize },

    /// Invalid payload data
    #[error("Invalid payload: {details}")]
    InvalidPayload { details: String },
}

impl CodecError {
    /// Create a new unsupported codec error
    pub fn unsupported_codec(format: impl Into<String>) -> Self {
        Self::UnsupportedCodec {
            format: format.into(),
        }
    }

    /// Create a new encoding failed error
    pub fn encoding_failed(reason: impl Into<String>) -> Self {
        Self::EncodingFailed {
            reason: reason.into(),
        }
    }

    /// Create a new decoding failed error
    pub fn decoding_failed(reason: impl Into<String>) -> Self {
        Self::DecodingFailed {
            reason: reason.into(),
        }
    }

    /// Create a new invalid payload error
    pub fn invalid_payload(details: impl Into<String>) -> Self {
        Self::InvalidPayload {
            details: details.into(),
        }
    }

    /// Check if this error is recoverable
    ///
    /// Recoverable errors are per-frame: the call continues and the next
    /// frame may well succeed. Unsupported-codec errors are configuration
    /// level and will not go away by retrying.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::UnsupportedCodec { .. })
    }
}
