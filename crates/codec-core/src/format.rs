//! Wire format identifiers, capability sets, and codec negotiation
//!
//! Formats are exchanged on the wire as a bitmask, one bit per codec, so a
//! single 32-bit word can carry both a chosen format and a capability set.
//! [`FormatId`] names the individual bits; [`FormatSet`] is the mask with
//! set algebra on top. [`negotiate`] implements the capability intersection
//! an endpoint runs when accepting an inbound call.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bits 0..16 carry audio formats
pub const AUDIO_FORMAT_MASK: u32 = (1 << 16) - 1;
/// Bits 16..25 carry video formats
pub const VIDEO_FORMAT_MASK: u32 = ((1 << 25) - 1) & !((1 << 16) - 1);

/// A single wire format, one bit of the protocol's format word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum FormatId {
    /// G.723.1 low-bitrate
    G723_1 = 1 << 0,
    /// GSM full rate
    Gsm = 1 << 1,
    /// G.711 μ-law
    Ulaw = 1 << 2,
    /// G.711 A-law
    Alaw = 1 << 3,
    /// G.726 ADPCM (32 kbit/s)
    G726 = 1 << 4,
    /// IMA ADPCM
    Adpcm = 1 << 5,
    /// 16-bit signed linear PCM
    Slinear = 1 << 6,
    /// LPC10 vocoder
    Lpc10 = 1 << 7,
    /// G.729A
    G729a = 1 << 8,
    /// Speex, the wideband variable-rate codec
    Speex = 1 << 9,
    /// iLBC
    Ilbc = 1 << 10,
    /// JPEG still video
    Jpeg = 1 << 16,
    /// PNG still video
    Png = 1 << 17,
    /// H.261 video
    H261 = 1 << 18,
    /// H.263 video
    H263 = 1 << 19,
    /// H.263+ video
    H263Plus = 1 << 20,
    /// H.264 video
    H264 = 1 << 21,
    /// MPEG-4 video
    Mpeg4 = 1 << 22,
    /// Theora video
    Theora = 1 << 24,
}

/// Codec priority order used when picking among several shared formats.
///
/// This mirrors what asterisk does: cheapest-to-transcode audio codecs
/// first, video codecs at the end. The order is part of the negotiation
/// contract and must not be rearranged.
pub const PREFERRED_ORDER: &[FormatId] = &[
    FormatId::Ulaw,
    FormatId::Alaw,
    FormatId::Slinear,
    FormatId::G726,
    FormatId::Adpcm,
    FormatId::Gsm,
    FormatId::Ilbc,
    FormatId::Speex,
    FormatId::Lpc10,
    FormatId::G729a,
    FormatId::G723_1,
    FormatId::Jpeg,
    FormatId::Png,
    FormatId::H261,
    FormatId::H263,
    FormatId::H263Plus,
    FormatId::H264,
    FormatId::Mpeg4,
    FormatId::Theora,
];

impl FormatId {
    /// The format's bit in the wire format word
    pub fn bit(self) -> u32 {
        self as u32
    }

    /// Reconstruct a format from a single wire bit
    pub fn from_bit(bit: u32) -> Option<Self> {
        PREFERRED_ORDER.iter().copied().find(|f| f.bit() == bit)
    }

    /// Short protocol name
    pub fn name(self) -> &'static str {
        match self {
            Self::G723_1 => "G723.1",
            Self::Gsm => "GSM",
            Self::Ulaw => "ULAW",
            Self::Alaw => "ALAW",
            Self::G726 => "G726",
            Self::Adpcm => "ADPCM",
            Self::Slinear => "SLINEAR",
            Self::Lpc10 => "LPC10",
            Self::G729a => "G729A",
            Self::Speex => "SPEEX",
            Self::Ilbc => "iLBC",
            Self::Jpeg => "JPEG",
            Self::Png => "PNG",
            Self::H261 => "H261",
            Self::H263 => "H263",
            Self::H263Plus => "H263+",
            Self::H264 => "H264",
            Self::Mpeg4 => "MPEG4",
            Self::Theora => "Theora",
        }
    }

    /// Whether this is an audio format
    pub fn is_audio(self) -> bool {
        self.bit() & AUDIO_FORMAT_MASK != 0
    }

    /// Whether this is a video format
    pub fn is_video(self) -> bool {
        self.bit() & VIDEO_FORMAT_MASK != 0
    }
}

impl fmt::Display for FormatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A set of wire formats, stored as the protocol's format bitmask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FormatSet(u32);

impl FormatSet {
    /// The empty set
    pub const EMPTY: FormatSet = FormatSet(0);

    /// Build a set from a raw wire mask. Unknown bits are preserved so a
    /// remote capability word survives a round trip unchanged.
    pub fn from_bits(bits: u32) -> Self {
        FormatSet(bits)
    }

    /// The raw wire mask
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Whether no format is present
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether `format` is in the set
    pub fn contains(self, format: FormatId) -> bool {
        self.0 & format.bit() != 0
    }

    /// Add a format
    pub fn insert(&mut self, format: FormatId) {
        self.0 |= format.bit();
    }

    /// Remove a format
    pub fn remove(&mut self, format: FormatId) {
        self.0 &= !format.bit();
    }

    /// Set intersection
    pub fn intersect(self, other: FormatSet) -> FormatSet {
        FormatSet(self.0 & other.0)
    }

    /// Set union
    pub fn union(self, other: FormatSet) -> FormatSet {
        FormatSet(self.0 | other.0)
    }

    /// Only the audio formats
    pub fn audio(self) -> FormatSet {
        FormatSet(self.0 & AUDIO_FORMAT_MASK)
    }

    /// Only the video formats
    pub fn video(self) -> FormatSet {
        FormatSet(self.0 & VIDEO_FORMAT_MASK)
    }

    /// Iterate the known formats present, in priority order
    pub fn iter(self) -> impl Iterator<Item = FormatId> {
        PREFERRED_ORDER
            .iter()
            .copied()
            .filter(move |f| self.contains(*f))
    }
}

impl From<FormatId> for FormatSet {
    fn from(format: FormatId) -> Self {
        FormatSet(format.bit())
    }
}

impl FromIterator<FormatId> for FormatSet {
    fn from_iter<I: IntoIterator<Item = FormatId>>(iter: I) -> Self {
        let mut set = FormatSet::EMPTY;
        for f in iter {
            set.insert(f);
        }
        set
    }
}

impl fmt::Display for FormatSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(FormatId::name).collect();
        write!(f, "{{{}}}", names.join(","))
    }
}

/// Negotiation failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    /// No format is shared between the two endpoints
    #[error("Could not negotiate common codec")]
    NoCommonCodec,
}

/// Pick the highest-priority format out of a set, walking
/// [`PREFERRED_ORDER`]. Returns `None` for an empty (or unknown-bits-only)
/// set.
pub fn choose_preferred(formats: FormatSet) -> Option<FormatId> {
    PREFERRED_ORDER
        .iter()
        .copied()
        .find(|f| formats.contains(*f))
}

/// Negotiate the audio format for an inbound call.
///
/// Given our capability and preference plus the remote's chosen format and
/// capability set:
///
/// 1. accept their chosen format if we support it;
/// 2. else use our preferred format if they support it;
/// 3. else pick the highest-priority format both sides support;
/// 4. else fail, and the call should be rejected.
pub fn negotiate(
    local_capability: FormatSet,
    local_preference: FormatSet,
    remote_format: FormatSet,
    remote_capability: FormatSet,
) -> std::result::Result<FormatId, NegotiationError> {
    // First, try _their_ chosen format
    let format = local_capability.intersect(remote_format);
    if let Some(chosen) = choose_preferred(format) {
        return Ok(chosen);
    }

    // Then, try our preferred format
    let format = local_preference.intersect(remote_capability);
    if let Some(chosen) = choose_preferred(format) {
        return Ok(chosen);
    }

    // Finally, see if we have anything in common
    let format = local_capability.intersect(remote_capability);
    choose_preferred(format).ok_or(NegotiationError::NoCommonCodec)
}
