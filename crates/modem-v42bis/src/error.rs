use thiserror::Error;

/// Fatal V.42bis decoding errors.
///
/// Each of these is a protocol violation by the peer (clause 5.8), not a line
/// condition: the session owner must reset the codec or tear the connection
/// down, there is nothing to retry.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Reserved transparent-mode command code received after an escape.
    #[error("invalid V.42bis command code {0:#04x}")]
    InvalidCommand(u8),

    /// STEPUP would grow the dictionary past the negotiated capacity,
    /// meaning the two sides disagree on `max_codewords`.
    #[error("STEPUP past the negotiated dictionary size")]
    DictionaryLimitExceeded,

    /// Codeword referencing an empty dictionary entry.
    #[error("codeword {0:#05x} references an empty dictionary entry")]
    UnknownCodeword(u16),
}
