//! Core types and traits for the codec library

use bytes::Bytes;

use crate::error::Result;
use crate::format::FormatId;

/// Primary trait for audio codecs
///
/// One instance encodes or decodes a single stream; a call owns at most one
/// encoder and one decoder, created lazily and dropped whenever the
/// negotiated format changes.
pub trait AudioCodec: Send {
    /// Encode audio samples to compressed data
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails or the input violates the codec's
    /// frame-size requirements
    fn encode(&mut self, samples: &[i16]) -> Result<Bytes>;

    /// Decode compressed data to audio samples
    ///
    /// # Errors
    ///
    /// Returns an error if decoding fails or data is invalid
    fn decode(&mut self, data: &[u8]) -> Result<Vec<i16>>;

    /// The wire format this instance speaks
    fn format(&self) -> FormatId;

    /// Smallest number of samples the encoder accepts; outgoing frames are
    /// rounded up to a multiple of this
    fn minimum_frame_size(&self) -> usize;

    /// Get codec information
    fn info(&self) -> CodecInfo;

    /// Reset codec state
    ///
    /// Clears internal state after a stream discontinuity. Stateless codecs
    /// treat this as a no-op.
    fn reset(&mut self) {}
}

/// Audio codec information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecInfo {
    /// Codec name (e.g., "ULAW", "SLINEAR")
    pub name: &'static str,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Bitrate in bits per second
    pub bitrate: u32,
    /// Minimum frame size in samples
    pub minimum_frame_size: usize,
    /// Wire format id
    pub format: FormatId,
}
