use std::collections::VecDeque;

use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxState {
    /// Line at mark, or trailing stop bits after a character.
    Idle,
    Receiving,
    /// Expecting the first stop bit.
    StopBit,
}

/// V.14 start-stop character codec.
///
/// Characters are serialized LSB first as one start bit (0), eight data bits
/// and `stop_bits` stop bits (1), packed eight line bits per octet. The
/// receive side is self-synchronizing: it hunts for a start bit from idle and
/// resynchronizes after a framing error.
///
/// The receiver also tracks the longest mark run seen between characters
/// ([`V14Codec::received_stop_bits`]); the LAP-M detection phase keys the
/// ODP signal off that.
#[derive(Debug, Default)]
pub struct V14Codec {
    // Transmit side.
    line_out: VecDeque<u8>,
    tx_cur: u8,
    tx_bits: u32,
    tx_stop_bits: u32,
    // Receive side.
    chars_out: VecDeque<u8>,
    rx_cur: u8,
    rx_state: RxState,
    rx_bits: u32,
    chars_since_missing_stop: u32,
    rx_stop_bits: u32,
    max_stop_bits: u32,
}

impl Default for RxState {
    fn default() -> Self {
        RxState::Idle
    }
}

impl V14Codec {
    pub fn new() -> Self {
        Self {
            tx_stop_bits: 1,
            ..Self::default()
        }
    }

    /// Number of stop bits appended to each transmitted character.
    pub fn set_stop_bits(&mut self, n: u32) {
        self.tx_stop_bits = n;
    }

    /// Serialize one character onto the line.
    pub fn transmit(&mut self, ch: u8) {
        self.transmit_bit(0);
        let mut v = ch;
        for _ in 0..8 {
            self.transmit_bit(v & 1);
            v >>= 1;
        }
        for _ in 0..self.tx_stop_bits {
            self.transmit_bit(1);
        }
    }

    /// Pad the line out to an octet boundary with mark bits, or emit a full
    /// idle octet when already aligned. Always leaves at least one octet
    /// available.
    pub fn flush(&mut self) {
        if self.tx_bits != 0 {
            while self.tx_bits != 0 {
                self.transmit_bit(1);
            }
        } else {
            for _ in 0..8 {
                self.transmit_bit(1);
            }
        }
    }

    fn transmit_bit(&mut self, v: u8) {
        self.tx_cur = (self.tx_cur >> 1) | (v << 7);
        self.tx_bits += 1;
        if self.tx_bits == 8 {
            self.line_out.push_back(self.tx_cur);
            self.tx_cur = 0;
            self.tx_bits = 0;
        }
    }

    /// Pop one serialized line octet.
    pub fn line_read(&mut self) -> Option<u8> {
        self.line_out.pop_front()
    }

    pub fn line_available(&self) -> usize {
        self.line_out.len()
    }

    /// Deserialize eight line bits.
    pub fn receive(&mut self, octet: u8) {
        let mut v = octet;
        for _ in 0..8 {
            let bit = v & 1;
            match self.rx_state {
                RxState::StopBit => {
                    if bit == 0 {
                        if self.chars_since_missing_stop < 4 {
                            info!(
                                "stop bit missing after {} chars",
                                self.chars_since_missing_stop
                            );
                        }
                        self.chars_since_missing_stop = 0;
                        self.rx_state = RxState::Receiving;
                        self.rx_bits = 0;
                        self.max_stop_bits = self.max_stop_bits.max(self.rx_stop_bits);
                    } else {
                        self.rx_stop_bits = 1;
                        self.rx_state = RxState::Idle;
                    }
                }
                RxState::Idle => {
                    if bit == 0 {
                        // Start bit.
                        self.rx_state = RxState::Receiving;
                        self.rx_bits = 0;
                        self.max_stop_bits = self.max_stop_bits.max(self.rx_stop_bits);
                    } else {
                        self.rx_stop_bits += 1;
                    }
                }
                RxState::Receiving => {
                    self.rx_cur = (self.rx_cur >> 1) | (bit << 7);
                    self.rx_bits += 1;
                    if self.rx_bits == 8 {
                        self.rx_state = RxState::StopBit;
                        self.chars_out.push_back(self.rx_cur);
                        self.chars_since_missing_stop += 1;
                        self.rx_stop_bits = 0;
                    }
                }
            }
            v >>= 1;
        }
    }

    /// Pop one deserialized character.
    pub fn read(&mut self) -> Option<u8> {
        self.chars_out.pop_front()
    }

    pub fn available(&self) -> usize {
        self.chars_out.len()
    }

    /// Longest mark run seen before a start bit since the last call.
    /// Reading clears the counter.
    pub fn received_stop_bits(&mut self) -> u32 {
        std::mem::take(&mut self.max_stop_bits)
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}
