//! 16-bit signed linear PCM codec
//!
//! No compression; samples travel as big-endian (network byte order) pairs.

use bytes::Bytes;

use crate::error::{CodecError, Result};
use crate::format::FormatId;
use crate::types::{AudioCodec, CodecInfo};

/// Signed linear passthrough codec
pub struct SlinearCodec;

impl SlinearCodec {
    /// Create a new instance
    pub fn new() -> Self {
        Self
    }
}

impl AudioCodec for SlinearCodec {
    fn encode(&mut self, samples: &[i16]) -> Result<Bytes> {
        let mut out = Vec::with_capacity(samples.len() * 2);
        for &sample in samples {
            out.extend_from_slice(&sample.to_be_bytes());
        }
        Ok(Bytes::from(out))
    }

    fn decode(&mut self, data: &[u8]) -> Result<Vec<i16>> {
        if data.len() % 2 != 0 {
            return Err(CodecError::InvalidFrameSize {
                expected: 2,
                actual: data.len(),
            });
        }
        Ok(data
            .chunks_exact(2)
            .map(|pair| i16::from_be_bytes([pair[0], pair[1]]))
            .collect())
    }

    fn format(&self) -> FormatId {
        FormatId::Slinear
    }

    fn minimum_frame_size(&self) -> usize {
        1
    }

    fn info(&self) -> CodecInfo {
        CodecInfo {
            name: FormatId::Slinear.name(),
            sample_rate: 8000,
            bitrate: 128000,
            minimum_frame_size: 1,
            format: FormatId::Slinear,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_byte_order() {
        let mut codec = SlinearCodec::new();
        let encoded = codec.encode(&[0x0102]).unwrap();
        assert_eq!(&encoded[..], &[0x01, 0x02]);
        assert_eq!(codec.decode(&encoded).unwrap(), vec![0x0102]);
    }

    #[test]
    fn test_odd_payload_rejected() {
        let mut codec = SlinearCodec::new();
        let err = codec.decode(&[0x01, 0x02, 0x03]).unwrap_err();
        assert!(matches!(err, CodecError::InvalidFrameSize { .. }));
    }
}
