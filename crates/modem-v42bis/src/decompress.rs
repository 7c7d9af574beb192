use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::codec::{CodecState, ECM, EID, ESCAPE_CYCLE, ETM, FLUSH, RESET, STEPUP};
use crate::error::DecodeError;
use crate::{V42bisParams, CW_RESERVED};

/// V.42bis decoder. Reconstructs the peer encoder's dictionary, codeword
/// width and escape code from the received octet stream alone.
#[derive(Debug)]
pub struct Decompressor {
    state: CodecState,
    out: VecDeque<u8>,
    /// Transparent mode: the previous octet was the escape code.
    escaped: bool,
    in_bits: u32,
    in_nbits: u32,
    decode_buf: Vec<u8>,
}

impl Decompressor {
    pub fn new(params: V42bisParams) -> Self {
        Self {
            state: CodecState::new(params),
            out: VecDeque::new(),
            escaped: false,
            in_bits: 0,
            in_nbits: 0,
            decode_buf: Vec::with_capacity(params.max_string_length),
        }
    }

    /// Decode one received octet. Any error is fatal for the session; the
    /// codec must be [`reset`](Decompressor::reset) before reuse.
    pub fn write(&mut self, byte: u8) -> Result<(), DecodeError> {
        if self.state.transparent {
            self.write_transparent(byte)
        } else {
            self.write_compressed(byte)
        }
    }

    fn write_transparent(&mut self, byte: u8) -> Result<(), DecodeError> {
        let mut b = byte;
        if self.escaped {
            self.escaped = false;
            match b {
                ECM => {
                    debug!("decompressor: ECM");
                    self.state.transparent = false;
                    self.state.mode_transition = true;
                    return Ok(());
                }
                EID => {
                    debug!("decompressor: EID");
                    // The escape code itself was in the data; process it
                    // normally below.
                    b = self.state.escape_code;
                    self.state.escape_code = self.state.escape_code.wrapping_add(ESCAPE_CYCLE);
                }
                RESET => {
                    debug!("decompressor: RESET");
                    self.reinit();
                    return Ok(());
                }
                other => {
                    // 5.8(a): reserved command codes are an error condition.
                    warn!("invalid V.42bis command code {other:#04x}");
                    return Err(DecodeError::InvalidCommand(other));
                }
            }
        } else if b == self.state.escape_code {
            self.escaped = true;
            return Ok(());
        }
        self.out.push_back(b);
        self.state.accept_char(b, None);
        Ok(())
    }

    fn write_compressed(&mut self, byte: u8) -> Result<(), DecodeError> {
        self.in_bits |= u32::from(byte) << self.in_nbits;
        self.in_nbits += 8;
        if self.in_nbits < self.state.codeword_size {
            return Ok(());
        }
        let code = (self.in_bits & ((1u32 << self.state.codeword_size) - 1)) as u16;
        self.in_nbits -= self.state.codeword_size;
        self.in_bits >>= self.state.codeword_size;

        if code < CW_RESERVED {
            match code {
                ETM => {
                    debug!("decompressor: ETM");
                    self.state.transparent = true;
                    self.state.mode_transition = true;
                    self.in_bits = 0;
                    self.in_nbits = 0;
                }
                FLUSH => {
                    debug!("decompressor: FLUSH");
                    // 7.9(c): discard the zero bits padding out to the octet
                    // boundary.
                    self.in_bits >>= self.in_nbits & 7;
                    self.in_nbits &= !7;
                }
                STEPUP => {
                    debug!("decompressor: STEPUP");
                    self.state.codeword_size += 1;
                    self.state.codeword_threshold *= 2;
                    // 5.8(b): growing C2 past the negotiated capacity is an
                    // error condition.
                    if self.state.codeword_threshold > u32::from(self.state.max_codewords) {
                        return Err(DecodeError::DictionaryLimitExceeded);
                    }
                }
                _ => unreachable!(),
            }
            return Ok(());
        }
        self.state.mode_transition = false;
        // 5.8(c): a codeword for an empty dictionary entry is an error
        // condition.
        if self.state.dict.is_free(code) {
            warn!("unknown codeword {code:#05x}");
            return Err(DecodeError::UnknownCodeword(code));
        }

        // Walk the trie up to the root, then emit the string in order.
        self.decode_buf.clear();
        let mut node = code;
        let first_char = loop {
            let ch = self.state.dict.character(node);
            self.decode_buf.push(ch);
            match self.state.dict.parent_code(node) {
                Some(parent) => node = parent,
                None => break ch,
            }
        };
        self.decode_buf.reverse();
        for &ch in &self.decode_buf {
            self.out.push_back(ch);
            if ch == self.state.escape_code {
                self.state.escape_code = self.state.escape_code.wrapping_add(ESCAPE_CYCLE);
            }
        }

        // 6.4: grow the dictionary exactly as the encoder did.
        let grown = match self.state.cur_code {
            Some(cur)
                if self.state.match_len < self.state.max_string_length
                    && self.state.last_added != Some(cur)
                    && self.state.dict.child(cur, first_char).is_none() =>
            {
                self.state
                    .dict
                    .add_child(self.state.next_codeword, cur, first_char);
                self.state.recover_node();
                true
            }
            _ => false,
        };
        self.state.last_added = grown.then_some(self.state.next_codeword);
        self.state.cur_code = Some(code);
        self.state.match_len = self.decode_buf.len();
        Ok(())
    }

    /// Pop one decoded character.
    pub fn read(&mut self) -> Option<u8> {
        self.out.pop_front()
    }

    /// Decoded characters ready to hand to the application.
    pub fn available(&self) -> usize {
        self.out.len()
    }

    /// Reinitialize the codec, keeping already-decoded output (the RESET
    /// command path).
    fn reinit(&mut self) {
        self.state.reset();
        self.escaped = false;
        self.in_bits = 0;
        self.in_nbits = 0;
    }

    pub fn reset(&mut self) {
        self.reinit();
        self.out.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(d: &mut Decompressor) -> Vec<u8> {
        std::iter::from_fn(|| d.read()).collect()
    }

    #[test]
    fn transparent_bytes_pass_through() {
        let mut d = Decompressor::new(V42bisParams::default());
        for b in b"hello" {
            d.write(*b).unwrap();
        }
        assert_eq!(drain(&mut d), b"hello");
    }

    #[test]
    fn doubled_escape_decodes_to_one_escape() {
        let mut d = Decompressor::new(V42bisParams::default());
        d.write(0x00).unwrap();
        d.write(EID).unwrap();
        assert_eq!(drain(&mut d), [0x00]);
        // The escape advanced to 51, so a bare 0 is now plain data.
        d.write(0x00).unwrap();
        assert_eq!(drain(&mut d), [0x00]);
    }

    #[test]
    fn reserved_command_code_is_an_error() {
        let mut d = Decompressor::new(V42bisParams::default());
        d.write(0x00).unwrap();
        assert_eq!(d.write(0x7f), Err(DecodeError::InvalidCommand(0x7f)));
    }

    #[test]
    fn reset_command_reinitializes_but_keeps_output() {
        let mut d = Decompressor::new(V42bisParams::default());
        for b in b"abc" {
            d.write(*b).unwrap();
        }
        d.write(0x00).unwrap();
        d.write(RESET).unwrap();
        // Output queue survives; the escape code is back to 0 so the escape
        // sequence must be doubled again.
        d.write(0x00).unwrap();
        d.write(EID).unwrap();
        assert_eq!(drain(&mut d), b"abc\x00");
    }

    #[test]
    fn unknown_codeword_is_an_error() {
        let mut d = Decompressor::new(V42bisParams::default());
        // Enter compressed mode, then send codeword 300 (an unallocated
        // dynamic entry) as 9 LSB-first bits padded with zeros.
        d.write(0x00).unwrap();
        d.write(ECM).unwrap();
        d.write((300 & 0xff) as u8).unwrap();
        let err = d.write((300 >> 8) as u8);
        assert_eq!(err, Err(DecodeError::UnknownCodeword(300)));
    }

    #[test]
    fn stepup_past_capacity_is_an_error() {
        let mut d = Decompressor::new(V42bisParams::default());
        d.write(0x00).unwrap();
        d.write(ECM).unwrap();
        // STEPUP (codeword 2, 9 bits). With the default 512-entry dictionary
        // the threshold is already at capacity.
        d.write(0x02).unwrap();
        let err = d.write(0x00);
        assert_eq!(err, Err(DecodeError::DictionaryLimitExceeded));
    }
}
