use tracing::debug;

use crate::codec::{BitPacker, CodecState, ECM, EID, ESCAPE_CYCLE, ETM, FLUSH};
use crate::V42bisParams;

/// V.42bis encoder (P0 direction initiator-to-responder or vice versa; each
/// direction carries its own instance).
///
/// Bytes go in through [`Compressor::write`]; the encoded stream comes back
/// out through [`Compressor::read`]. The encoder starts in transparent mode
/// and switches itself based on the running compressibility test (7.8); the
/// session owner only needs [`Compressor::flush`] at frame boundaries.
#[derive(Debug)]
pub struct Compressor {
    state: CodecState,
    out: BitPacker,
    /// 7.8 compressibility accumulator: bits saved (positive) or wasted
    /// (negative) versus sending the data raw.
    compress_test: i32,
    /// Characters left before the accumulator is consulted.
    test_countdown: i32,
}

impl Compressor {
    pub fn new(params: V42bisParams) -> Self {
        Self {
            state: CodecState::new(params),
            out: BitPacker::default(),
            compress_test: 0,
            test_countdown: 64,
        }
    }

    /// Encode one character.
    pub fn write(&mut self, byte: u8) {
        if self.state.transparent {
            self.out.push_byte(byte);
        }
        if byte == self.state.escape_code {
            // 7.8.3: double the escape in transparent mode, and cycle the
            // escape code in either mode.
            if self.state.transparent {
                self.out.push_byte(EID);
            }
            self.state.escape_code = self.state.escape_code.wrapping_add(ESCAPE_CYCLE);
        }
        let matched_len = self.state.match_len;
        let Some(code) = self.state.accept_char(byte, Some(&mut self.out)) else {
            return;
        };
        if !self.state.transparent {
            // 7.5 Transfer.
            self.out.push_code(code, self.state.codeword_size);
        }

        // 7.8 Data compressibility test. The match that just ended would have
        // cost one codeword compressed versus eight bits per character raw.
        self.compress_test += 8 * matched_len as i32 - self.state.codeword_size as i32;
        self.test_countdown -= matched_len as i32;
        if self.test_countdown <= 0 {
            if self.state.transparent && self.compress_test > 16 {
                self.change_mode();
            } else if !self.state.transparent && self.compress_test < -16 {
                self.change_mode();
            }
        }
    }

    /// Switch between transparent and compressed mode (7.8.1/7.8.2).
    pub fn change_mode(&mut self) {
        if self.state.transparent {
            debug!("compressor: entering compressed mode");
            self.out.push_byte(self.state.escape_code);
            self.out.push_byte(ECM);
            self.state.transparent = false;
            self.test_countdown = 256;
        } else {
            debug!("compressor: entering transparent mode");
            self.flush_mode(true);
            self.state.transparent = true;
            self.test_countdown = 64;
        }
        self.state.mode_transition = true;
        self.compress_test = 0;
    }

    /// 7.9: force out any partial match and recover octet alignment, so
    /// everything written so far can be framed and sent.
    pub fn flush(&mut self) {
        self.flush_mode(false);
    }

    fn flush_mode(&mut self, enter_transparent: bool) {
        if self.state.transparent {
            return;
        }
        // 7.8.2(a)/7.9(a): transfer the codeword for any partially encoded
        // data.
        if let Some(cur) = self.state.cur_code {
            if !self.state.mode_transition {
                self.out.push_code(cur, self.state.codeword_size);
                self.state.mode_transition = true;
            }
        }
        if enter_transparent {
            // 7.8.2(c)
            self.out.push_code(ETM, self.state.codeword_size);
        } else if !self.out.aligned() {
            // 7.9(c)
            self.out.push_code(FLUSH, self.state.codeword_size);
        }
        // 7.8.2(d)/7.9(c): zero bits out to the octet boundary.
        self.out.align();
    }

    /// Pop one encoded octet.
    pub fn read(&mut self) -> Option<u8> {
        self.out.read()
    }

    /// Encoded octets ready to send.
    pub fn available(&self) -> usize {
        self.out.available()
    }

    pub fn reset(&mut self) {
        self.state.reset();
        self.out.reset();
        self.compress_test = 0;
        self.test_countdown = 64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(c: &mut Compressor) -> Vec<u8> {
        std::iter::from_fn(|| c.read()).collect()
    }

    #[test]
    fn transparent_mode_passes_bytes_through() {
        let mut c = Compressor::new(V42bisParams::default());
        for b in b"hello" {
            c.write(*b);
        }
        assert_eq!(drain(&mut c), b"hello");
    }

    #[test]
    fn escape_collision_doubles_and_cycles() {
        let mut c = Compressor::new(V42bisParams::default());
        // Initial escape code is 0: writing 0 doubles it and moves the
        // escape to 51, which doubles in turn and moves it to 102. The
        // second 51 is then an ordinary character.
        c.write(0x00);
        c.write(51);
        c.write(51);
        assert_eq!(drain(&mut c), [0x00, EID, 51, EID, 51]);
    }

    #[test]
    fn mode_change_emits_escape_then_ecm() {
        let mut c = Compressor::new(V42bisParams::default());
        c.write(b'a');
        c.change_mode();
        let out = drain(&mut c);
        assert_eq!(out, [b'a', 0x00, ECM]);
    }

    #[test]
    fn flush_is_a_no_op_in_transparent_mode() {
        let mut c = Compressor::new(V42bisParams::default());
        c.write(b'x');
        let _ = drain(&mut c);
        c.flush();
        assert_eq!(c.available(), 0);
    }

    #[test]
    fn flush_in_compressed_mode_realigns() {
        let mut c = Compressor::new(V42bisParams::default());
        c.change_mode();
        c.write(b'q');
        let _ = drain(&mut c);
        c.flush();
        // The pending 9-bit codeword plus FLUSH plus padding is octet
        // aligned and non-empty.
        let out = drain(&mut c);
        assert!(!out.is_empty());
        c.flush();
        assert_eq!(c.available(), 0);
    }

    #[test]
    fn repetitive_input_switches_to_compressed_mode() {
        let mut c = Compressor::new(V42bisParams::default());
        let mut out = Vec::new();
        for _ in 0..1024 {
            c.write(b'z');
            out.extend(drain(&mut c));
        }
        c.flush();
        out.extend(drain(&mut c));
        // Highly repetitive input must end up well under raw size.
        assert!(out.len() < 512, "compressed {} bytes", out.len());
        // The mode switch is visible as escape + ECM in the raw prefix.
        let escape_pos = out
            .windows(2)
            .position(|w| w == [0x00, ECM])
            .unwrap_or_else(|| panic!("no ECM in {:02x?}", &out[..32.min(out.len())]));
        assert!(escape_pos < 128);
    }
}
