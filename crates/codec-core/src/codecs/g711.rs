//! G.711 μ-law and A-law codec
//!
//! Compression follows the ITU-T G.711 reference implementation bit for
//! bit. Decoding goes through 256-entry expansion tables built once at
//! startup; encoding stays algorithmic (the segment search is cheap and a
//! 64k-entry table buys nothing at 8kHz).

use bytes::Bytes;
use once_cell::sync::Lazy;

use crate::error::Result;
use crate::format::FormatId;
use crate::types::{AudioCodec, CodecInfo};

/// A-law compression according to ITU-T G.711
///
/// Compresses a 16-bit linear PCM sample to 8-bit A-law encoding. Uses the
/// 13 MSBs of the input, applies 1's complement for negative values, and
/// toggles the even bits (XOR with 0x55).
pub fn alaw_compress(sample: i16) -> u8 {
    let mut ix = if sample < 0 {
        (((!sample) as u16) >> 4) as i16
    } else {
        sample >> 4
    };

    if ix > 15 {
        let mut iexp = 1;
        while ix > 16 + 15 {
            ix >>= 1;
            iexp += 1;
        }
        ix -= 16;
        ix += iexp << 4;
    }

    if sample >= 0 {
        ix |= 0x0080;
    }

    (ix ^ 0x0055) as u8
}

/// A-law expansion according to ITU-T G.711
pub fn alaw_expand(compressed: u8) -> i16 {
    let mut ix = (compressed ^ 0x0055) as i16;

    ix &= 0x007F;
    let iexp = ix >> 4;
    let mut mant = ix & 0x000F;

    if iexp > 0 {
        mant += 16;
    }

    mant = (mant << 4) + 0x0008;

    if iexp > 1 {
        mant <<= iexp - 1;
    }

    if compressed > 127 {
        mant
    } else {
        -mant
    }
}

/// μ-law compression according to ITU-T G.711
///
/// Uses the 14 MSBs of the input with a bias of 33, then encodes segment
/// and mantissa with inversion.
pub fn ulaw_compress(sample: i16) -> u8 {
    let absno = if sample < 0 {
        (((!sample) as u16) >> 2) as i16 + 33
    } else {
        (sample >> 2) + 33
    };

    let absno = if absno > 0x1FFF { 0x1FFF } else { absno };

    let mut i = absno >> 6;
    let mut segno = 1;
    while i != 0 {
        segno += 1;
        i >>= 1;
    }

    let high_nibble = 0x0008 - segno;
    let low_nibble = 0x000F - ((absno >> segno) & 0x000F);
    let mut result = (high_nibble << 4) | low_nibble;

    if sample >= 0 {
        result |= 0x0080;
    }

    result as u8
}

/// μ-law expansion according to ITU-T G.711
pub fn ulaw_expand(compressed: u8) -> i16 {
    let sign: i16 = if compressed < 0x0080 { -1 } else { 1 };
    let inverted = (!compressed) as i16;
    let exponent = (inverted >> 4) & 0x0007;
    let mantissa = inverted & 0x000F;
    let step = 4i16 << (exponent + 1);

    sign * ((0x0080 << exponent) + step * mantissa + step / 2 - 4 * 33)
}

static ULAW_EXPAND_TABLE: Lazy<[i16; 256]> = Lazy::new(|| {
    let mut table = [0i16; 256];
    for (byte, entry) in table.iter_mut().enumerate() {
        *entry = ulaw_expand(byte as u8);
    }
    table
});

static ALAW_EXPAND_TABLE: Lazy<[i16; 256]> = Lazy::new(|| {
    let mut table = [0i16; 256];
    for (byte, entry) in table.iter_mut().enumerate() {
        *entry = alaw_expand(byte as u8);
    }
    table
});

/// Force construction of the expansion tables
pub fn init_tables() {
    Lazy::force(&ULAW_EXPAND_TABLE);
    Lazy::force(&ALAW_EXPAND_TABLE);
}

/// Which G.711 companding law an instance uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Law {
    Ulaw,
    Alaw,
}

/// G.711 codec instance
///
/// Stateless: one byte per sample in either direction, so any frame size is
/// legal and `reset` is a no-op.
pub struct G711Codec {
    law: Law,
}

impl G711Codec {
    /// Create a μ-law instance
    pub fn ulaw() -> Self {
        Self { law: Law::Ulaw }
    }

    /// Create an A-law instance
    pub fn alaw() -> Self {
        Self { law: Law::Alaw }
    }
}

impl AudioCodec for G711Codec {
    fn encode(&mut self, samples: &[i16]) -> Result<Bytes> {
        let compress = match self.law {
            Law::Ulaw => ulaw_compress,
            Law::Alaw => alaw_compress,
        };
        let out: Vec<u8> = samples.iter().map(|&s| compress(s)).collect();
        Ok(Bytes::from(out))
    }

    fn decode(&mut self, data: &[u8]) -> Result<Vec<i16>> {
        let table: &[i16; 256] = match self.law {
            Law::Ulaw => &ULAW_EXPAND_TABLE,
            Law::Alaw => &ALAW_EXPAND_TABLE,
        };
        Ok(data.iter().map(|&b| table[b as usize]).collect())
    }

    fn format(&self) -> FormatId {
        match self.law {
            Law::Ulaw => FormatId::Ulaw,
            Law::Alaw => FormatId::Alaw,
        }
    }

    fn minimum_frame_size(&self) -> usize {
        1
    }

    fn info(&self) -> CodecInfo {
        CodecInfo {
            name: self.format().name(),
            sample_rate: 8000,
            bitrate: 64000,
            minimum_frame_size: 1,
            format: self.format(),
        }
    }
}
