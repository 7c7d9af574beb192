use std::collections::VecDeque;

use tracing::debug;

use crate::dict::Dictionary;
use crate::{V42bisParams, ALPHABET_SIZE, CHAR_SIZE, CW_FIRST, CW_RESERVED};

/// Amount the escape code advances every time a collision is handled (7.8.3).
pub(crate) const ESCAPE_CYCLE: u8 = 51;

// Control codewords (compressed mode).
pub(crate) const ETM: u16 = 0;
pub(crate) const FLUSH: u16 = 1;
pub(crate) const STEPUP: u16 = 2;

// Command codes (transparent mode, following an escape).
pub(crate) const ECM: u8 = 0;
pub(crate) const EID: u8 = 1;
pub(crate) const RESET: u8 = 2;

/// Dictionary and string-matching state shared by both directions (clauses
/// 6.3–6.5). The compressor and decompressor must evolve this identically
/// from the same character stream.
#[derive(Debug)]
pub(crate) struct CodecState {
    pub dict: Dictionary,
    pub max_codewords: u16,
    pub max_string_length: usize,
    /// C1: next dictionary entry to allocate.
    pub next_codeword: u16,
    /// C2: current codeword width in bits.
    pub codeword_size: u32,
    /// C3: codeword value at which the width must grow.
    pub codeword_threshold: u32,
    pub last_added: Option<u16>,
    pub cur_code: Option<u16>,
    pub match_len: usize,
    pub transparent: bool,
    /// Set across a mode change or flush so the next match cycle does not
    /// re-emit a string that was already transferred.
    pub mode_transition: bool,
    pub escape_code: u8,
}

impl CodecState {
    pub fn new(params: V42bisParams) -> Self {
        let mut state = Self {
            dict: Dictionary::new(params.max_codewords),
            max_codewords: params.max_codewords,
            max_string_length: params.max_string_length,
            next_codeword: CW_FIRST,
            codeword_size: CHAR_SIZE + 1,
            codeword_threshold: 2 * u32::from(ALPHABET_SIZE),
            last_added: None,
            cur_code: None,
            match_len: 0,
            transparent: true,
            mode_transition: false,
            escape_code: 0,
        };
        state.reset();
        state
    }

    pub fn reset(&mut self) {
        self.dict.reset();
        self.next_codeword = CW_FIRST;
        self.codeword_size = CHAR_SIZE + 1;
        self.codeword_threshold = 2 * u32::from(ALPHABET_SIZE);
        self.last_added = None;
        self.cur_code = None;
        self.match_len = 0;
        self.transparent = true;
        self.mode_transition = false;
        self.escape_code = 0;
    }

    /// One step of the string-matching procedure (6.3/6.4). Returns the
    /// codeword ending the previous match, if one ended here.
    ///
    /// `stepup_out` is the compressed-mode output any STEPUP codewords go to
    /// before a new entry is allocated past the threshold; the decompressor
    /// passes `None` and instead grows its width when STEPUP arrives.
    pub fn accept_char(&mut self, octet: u8, stepup_out: Option<&mut BitPacker>) -> Option<u16> {
        let Some(cur) = self.cur_code else {
            self.cur_code = Some(u16::from(octet) + CW_RESERVED);
            self.match_len = 1;
            self.mode_transition = false;
            return None;
        };
        self.match_len += 1;
        let child = self.dict.child(cur, octet);
        if let Some(code) = child {
            // 6.3(b): extend the match, unless this entry is the one created
            // by the previous invocation.
            if !self.mode_transition && Some(code) != self.last_added {
                self.cur_code = Some(code);
                return None;
            }
        }
        // 6.4: add the new string, within the length bound.
        if child.is_none() && self.match_len <= self.max_string_length {
            if let Some(out) = stepup_out {
                self.step_up(out);
            }
            self.dict.add_child(self.next_codeword, cur, octet);
            self.last_added = Some(self.next_codeword);
            self.recover_node();
        } else {
            self.last_added = None;
        }
        // Across a mode transition the pending string was already transferred.
        let emit = if self.mode_transition { None } else { Some(cur) };
        self.mode_transition = false;
        self.cur_code = Some(u16::from(octet) + CW_RESERVED);
        self.match_len = 1;
        emit
    }

    /// 7.4: announce and apply codeword-width growth before allocating past
    /// the current threshold. No-op in transparent mode.
    fn step_up(&mut self, out: &mut BitPacker) {
        if self.transparent {
            return;
        }
        while u32::from(self.next_codeword) >= self.codeword_threshold
            && self.codeword_threshold <= u32::from(self.max_codewords)
        {
            debug!(
                "compressor: STEPUP to {} bit codewords",
                self.codeword_size + 1
            );
            out.push_code(STEPUP, self.codeword_size);
            self.codeword_size += 1;
            self.codeword_threshold *= 2;
        }
    }

    /// 6.5 dictionary-entry recovery: advance `next_codeword` round-robin to
    /// the next free or reusable leaf, detaching the leaf if still attached.
    pub fn recover_node(&mut self) {
        loop {
            self.next_codeword += 1;
            if self.next_codeword >= self.max_codewords {
                self.next_codeword = CW_FIRST;
            }
            if !self.dict.is_leaf(self.next_codeword) {
                continue;
            }
            if !self.dict.is_free(self.next_codeword) {
                self.dict.detach(self.next_codeword);
            }
            break;
        }
    }
}

/// LSB-first bit packer for variable-width codewords (7.1), doubling as the
/// compressor's byte output queue.
#[derive(Debug, Default)]
pub(crate) struct BitPacker {
    bits: u32,
    nbits: u32,
    out: VecDeque<u8>,
}

impl BitPacker {
    /// Queue a whole octet. Only valid while octet-aligned (transparent mode
    /// or right after [`BitPacker::align`]).
    pub fn push_byte(&mut self, byte: u8) {
        self.out.push_back(byte);
    }

    pub fn push_code(&mut self, code: u16, width: u32) {
        self.bits |= u32::from(code) << self.nbits;
        self.nbits += width;
        while self.nbits >= 8 {
            self.out.push_back((self.bits & 0xff) as u8);
            self.bits >>= 8;
            self.nbits -= 8;
        }
    }

    pub fn aligned(&self) -> bool {
        self.nbits % 8 == 0
    }

    /// Pad with zero bits out to the next octet boundary (7.8.2d / 7.9c).
    pub fn align(&mut self) {
        while self.nbits > 0 {
            self.out.push_back((self.bits & 0xff) as u8);
            self.bits >>= 8;
            self.nbits = self.nbits.saturating_sub(8);
        }
        self.bits = 0;
    }

    pub fn read(&mut self) -> Option<u8> {
        self.out.pop_front()
    }

    pub fn available(&self) -> usize {
        self.out.len()
    }

    pub fn reset(&mut self) {
        self.bits = 0;
        self.nbits = 0;
        self.out.clear();
    }
}
