#![forbid(unsafe_code)]

//! ITU-T V.42bis data compression.
//!
//! An LZW variant with explicit control codewords: the [`Compressor`] decides
//! byte by byte whether "transparent" (raw, escaped) or "compressed" (packed
//! codeword) transmission is cheaper, and the [`Decompressor`] tracks the
//! identical dictionary state to invert it. Both sides evolve their dictionary
//! and rolling escape code purely from the data stream; nothing about that
//! state is carried on the wire, so any divergence surfaces as a fatal
//! [`DecodeError`].
//!
//! Codewords are packed LSB first at a width that starts at 9 bits and grows
//! as the dictionary fills (`STEPUP`). The dictionary is a fixed-size arena:
//! once full, the least-recently-allocated leaf is recycled, so memory never
//! grows past `max_codewords` entries.

mod codec;
mod compress;
mod decompress;
mod dict;
mod error;

pub use compress::Compressor;
pub use decompress::Decompressor;
pub use error::DecodeError;

/// Codeword values reserved for the control codes (ETM/FLUSH/STEPUP).
pub const CW_RESERVED: u16 = 3;
/// Number of single-character root entries (N4).
pub const ALPHABET_SIZE: u16 = 256;
/// First dynamically allocated codeword (N5).
pub const CW_FIRST: u16 = CW_RESERVED + ALPHABET_SIZE;
/// Bits per character (N3).
pub const CHAR_SIZE: u32 = 8;

/// Negotiated codec parameters, carried in the LAP-M XID exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct V42bisParams {
    /// Total number of codewords (N2). 512 is the recommendation's minimum.
    pub max_codewords: u16,
    /// Maximum string length in characters (N7).
    pub max_string_length: usize,
}

impl Default for V42bisParams {
    fn default() -> Self {
        Self {
            max_codewords: 512,
            max_string_length: 6,
        }
    }
}
