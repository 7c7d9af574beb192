use std::collections::VecDeque;

use tracing::{info, warn};

const FLAG: u8 = 0x7e;

/// CRC-16/X.25 (the HDLC FCS): reflected 0x1021, init 0xFFFF, final XOR
/// 0xFFFF. Check value over `"123456789"` is `0x906E`.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xffff;
    for &b in data {
        let mut word = (crc ^ u16::from(b)) & 0xff;
        word ^= (word << 4) & 0xff;
        word = (word << 8) ^ (word << 3) ^ (word >> 4);
        crc = (crc >> 8) ^ word;
    }
    crc ^ 0xffff
}

/// Bit-stuffing HDLC frame transmitter.
///
/// Frames are emitted as a continuous LSB-first bit stream: opening flag,
/// stuffed payload and FCS, closing flag. Flags are exempt from stuffing and
/// need not land on octet boundaries, so back-to-back frames share the
/// stream. Whole idle octets come from [`HdlcEncoder::send_flag`].
#[derive(Debug, Default)]
pub struct HdlcEncoder {
    out: VecDeque<u8>,
    bit_buf: u8,
    bit_count: u32,
    ones: u32,
}

impl HdlcEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frame and queue one payload; the FCS is computed and appended here.
    pub fn send_frame(&mut self, payload: &[u8]) {
        self.send_flag();
        for &b in payload {
            self.send_byte(b);
        }
        let crc = crc16(payload);
        self.send_byte((crc & 0xff) as u8);
        self.send_byte((crc >> 8) as u8);
        self.send_flag();
    }

    /// Queue a bare flag (interframe fill).
    pub fn send_flag(&mut self) {
        for i in 0..8 {
            self.emit_bit((FLAG >> i) & 1);
        }
        // The flag ends in a zero bit.
        self.ones = 0;
    }

    fn send_byte(&mut self, byte: u8) {
        for i in 0..8 {
            let bit = (byte >> i) & 1;
            self.emit_bit(bit);
            if bit == 1 {
                self.ones += 1;
                if self.ones == 5 {
                    self.emit_bit(0);
                    self.ones = 0;
                }
            } else {
                self.ones = 0;
            }
        }
    }

    fn emit_bit(&mut self, bit: u8) {
        self.bit_buf |= bit << self.bit_count;
        self.bit_count += 1;
        if self.bit_count == 8 {
            self.out.push_back(self.bit_buf);
            self.bit_buf = 0;
            self.bit_count = 0;
        }
    }

    pub fn read(&mut self) -> Option<u8> {
        self.out.pop_front()
    }

    pub fn available(&self) -> usize {
        self.out.len()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Bit-destuffing HDLC receiver.
///
/// Hunts for flags in the incoming bit stream; on each flag the accumulated
/// frame has its FCS verified and stripped, and good frames queue for
/// [`HdlcDecoder::next_frame`]. Seven or more consecutive ones abort the
/// frame in progress.
#[derive(Debug, Default)]
pub struct HdlcDecoder {
    frames: VecDeque<Vec<u8>>,
    cur_frame: Vec<u8>,
    cur_byte: u8,
    pos: u32,
    ones: u32,
}

impl HdlcDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed eight line bits.
    pub fn write(&mut self, octet: u8) {
        let mut v = octet;
        for _ in 0..8 {
            let bit = v & 1;
            if self.ones >= 5 {
                if bit == 1 {
                    // Sixth-or-later one: flag or abort in progress.
                    self.cur_byte = (self.cur_byte >> 1) | 0x80;
                    self.pos += 1;
                } else {
                    if self.ones == 6 {
                        self.end_frame();
                        self.cur_byte = 0;
                        self.pos = 0;
                    } else if self.ones > 6 {
                        info!("HDLC abort received");
                        self.cur_byte = 0;
                        // Keep the trailing zero as the first bit.
                        self.pos = 1;
                        self.cur_frame.clear();
                    }
                    // A zero after exactly five ones was stuffed; drop it.
                    self.ones = 0;
                }
            } else {
                self.cur_byte = (self.cur_byte >> 1) | (bit << 7);
                self.pos += 1;
            }
            if self.pos == 8 {
                self.cur_frame.push(self.cur_byte);
                self.cur_byte = 0;
                self.pos = 0;
            }
            if bit == 1 {
                self.ones += 1;
            } else {
                self.ones = 0;
            }
            v >>= 1;
        }
    }

    fn end_frame(&mut self) {
        if self.cur_frame.is_empty() {
            return;
        }
        let frame = std::mem::take(&mut self.cur_frame);
        if frame.len() < 2 {
            warn!("runt HDLC frame ({} bytes)", frame.len());
            return;
        }
        let (payload, fcs) = frame.split_at(frame.len() - 2);
        let received = u16::from(fcs[0]) | (u16::from(fcs[1]) << 8);
        if crc16(payload) != received {
            warn!("invalid FCS in received frame");
            return;
        }
        self.frames.push_back(payload.to_vec());
    }

    pub fn frame_available(&self) -> bool {
        !self.frames.is_empty()
    }

    /// Pop the next complete frame, FCS stripped.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        self.frames.pop_front()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn crc16_check_value() {
        assert_eq!(crc16(b"123456789"), 0x906e);
    }

    #[test]
    fn stuffs_runs_of_ones() {
        let mut enc = HdlcEncoder::new();
        enc.send_frame(&[0xff, 0xff]);
        let out: Vec<u8> = std::iter::from_fn(|| enc.read()).collect();
        // Flag, then 16 ones with a zero stuffed after every fifth.
        assert_eq!(out[0], 0x7e);
        assert_eq!(out[1], 0xdf);
        assert_eq!(out[2], 0xf7);
        assert_eq!(out[3] & 0x07, 0b101);
    }

    #[test]
    fn destuffing_preserves_runs_of_five_ones() {
        // Every byte here puts five or more consecutive ones on the line, so
        // each run carries a stuffed zero the receiver must silently drop.
        let payload = [0x7f, 0xff, 0x1f];
        let mut enc = HdlcEncoder::new();
        enc.send_frame(&payload);
        enc.send_flag();
        let mut dec = HdlcDecoder::new();
        while let Some(b) = enc.read() {
            dec.write(b);
        }
        assert_eq!(dec.next_frame(), Some(payload.to_vec()));
        assert_eq!(dec.next_frame(), None);
    }

    #[test]
    fn decoder_rejects_bad_fcs() {
        let mut enc = HdlcEncoder::new();
        enc.send_frame(&[0x01, 0x02, 0x03]);
        let mut bytes: Vec<u8> = std::iter::from_fn(|| enc.read()).collect();
        // Corrupt a payload bit mid-frame.
        bytes[2] ^= 0x10;
        let mut dec = HdlcDecoder::new();
        for b in bytes {
            dec.write(b);
        }
        dec.write(0x7e);
        assert!(!dec.frame_available());
    }

    #[test]
    fn abort_discards_partial_frame() {
        let mut enc = HdlcEncoder::new();
        enc.send_flag();
        let mut dec = HdlcDecoder::new();
        while let Some(b) = enc.read() {
            dec.write(b);
        }
        // Some frame bits, then seven ones (abort), then a clean frame.
        dec.write(0x55);
        dec.write(0x7f);
        dec.write(0xff);
        enc.send_frame(&[0xaa, 0xbb]);
        enc.send_flag();
        while let Some(b) = enc.read() {
            dec.write(b);
        }
        assert_eq!(dec.next_frame(), Some(vec![0xaa, 0xbb]));
        assert_eq!(dec.next_frame(), None);
    }

    proptest! {
        #[test]
        fn frames_roundtrip(payloads in proptest::collection::vec(
            proptest::collection::vec(any::<u8>(), 1..64), 1..8)
        ) {
            let mut enc = HdlcEncoder::new();
            let mut dec = HdlcDecoder::new();
            for p in &payloads {
                enc.send_frame(p);
            }
            enc.send_flag();
            while let Some(b) = enc.read() {
                dec.write(b);
            }
            for p in &payloads {
                prop_assert_eq!(dec.next_frame(), Some(p.clone()));
            }
            prop_assert_eq!(dec.next_frame(), None);
        }
    }
}
