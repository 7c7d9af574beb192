use modem_io::TimeSource;
use tracing::{debug, warn};

use crate::hdlc::{HdlcDecoder, HdlcEncoder};

/// Ticks of dual tone before segment 1 is considered detected.
const SEGMENT1_TICKS: u64 = 400;
/// Ticks of single tone before segment 2 is considered detected.
const SEGMENT2_TICKS: u64 = 100;

/// Status reported while the segment-2 single tone is being received.
const STATUS_SEGMENT2: u8 = 0xe0;
/// Status reported once the initiating signal completes: Mode Request seen.
const STATUS_MRE: u8 = 0x20;
/// Capabilities Request (CRd) tone.
const TONE_CRD: u8 = 0x33;

/// Capabilities List message: CL rev.1, identification field (V.8, short
/// V.8, non-standard field), standard field offering transparent data with
/// V.42/V.42bis/V.14 over V.34 down to V.21, and a K56flex/Rockwell
/// non-standard block.
const CL_MESSAGE: &[u8] = &[
    0x12, // CL, rev.1
    0xc3, // I: NPar1, V.8 + short V.8 + non-standard field
    0x80, // I: SPar1, network type not specified
    0x80, // S: NPar1
    0x01, // S: SPar2[1], data
    0x80, // S: SPar2[2]
    0x0f, // S: NPar2[1], transparent data, V.42, V.42bis, V.14
    0x30, // S: NPar2[2], V.34, V.32bis
    0xff, // S: NPar2[3], V.32 .. V.90
    0x09, // NS: size
    0xb5, // NS: country code (USA)
    0x02, // NS: manufacturer code length
    0x00, 0x94, // NS: manufacturer code (K56flex)
    0x81, // NS: licensee code (Rockwell)
    0x83, // NS: capabilities
    0x43, // NS: K56flex version
    0x47, // NS: MDP version
    0xc4, // NS: u-law, controller version
];

/// Length of the delimited parameter chain starting at `pos`: octets run
/// until one has the top (extension) bit set.
fn param_chain_len(frame: &[u8], pos: usize) -> usize {
    let mut p = pos;
    while p < frame.len() && frame[p] & 0x80 == 0 {
        p += 1;
    }
    p - pos + 1
}

/// V.8bis pre-dial capabilities exchange.
///
/// Drives the tone-detection handshake off the injected clock (the tones
/// themselves are synthesized by the peer being emulated, so "detection" is
/// a pure timing state machine), then answers a Capabilities Request with a
/// CL message and parses the Mode Select reply, both HDLC framed.
#[derive(Debug)]
pub struct V8bisProtocol<C> {
    clock: C,
    encoder: HdlcEncoder,
    decoder: HdlcDecoder,
    /// Tone exchange finished, HDLC messages flowing.
    data_mode: bool,
    tone_state: u8,
    tone_start: Option<u64>,
    done: bool,
}

impl<C: TimeSource> V8bisProtocol<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            encoder: HdlcEncoder::new(),
            decoder: HdlcDecoder::new(),
            data_mode: false,
            tone_state: 0,
            tone_start: None,
            done: false,
        }
    }

    /// Poll the tone detector; returns the DSP status code for the current
    /// segment.
    pub fn detect_tone(&mut self) -> u8 {
        let now = self.clock.now();
        match self.tone_state {
            0 => {
                match self.tone_start {
                    None => self.tone_start = Some(now),
                    Some(start) if now - start >= SEGMENT1_TICKS => {
                        self.tone_state = 1;
                        self.tone_start = Some(now);
                    }
                    Some(_) => {}
                }
                0
            }
            1 => {
                // Segment 1 dual tone seen; segment 2 single tone underway.
                if let Some(start) = self.tone_start {
                    if now - start >= SEGMENT2_TICKS {
                        self.tone_state = 2;
                        self.tone_start = Some(now);
                    }
                }
                STATUS_SEGMENT2
            }
            _ => STATUS_MRE,
        }
    }

    /// React to a tone emitted by the local side.
    pub fn emit_tone(&mut self, tone: u8) {
        if self.tone_state == 2 && tone == TONE_CRD {
            self.send_cl();
        }
    }

    fn send_cl(&mut self) {
        self.data_mode = true;
        self.encoder.send_flag();
        self.encoder.send_frame(CL_MESSAGE);
        self.encoder.send_flag();
        self.encoder.send_flag();
    }

    fn send_ack(&mut self, n: u8) {
        self.encoder.send_flag();
        self.encoder.send_frame(&[0x13 + n]);
        self.encoder.send_flag();
        self.encoder.send_flag();
    }

    fn send_nak(&mut self, n: u8) {
        self.encoder.send_flag();
        self.encoder.send_frame(&[7 + n]);
        self.encoder.send_flag();
        self.encoder.send_flag();
    }

    pub fn read(&mut self) -> Option<u8> {
        if !self.data_mode {
            None
        } else {
            self.encoder.read()
        }
    }

    pub fn available(&self) -> usize {
        if !self.data_mode {
            0
        } else {
            self.encoder.available()
        }
    }

    pub fn write(&mut self, byte: u8) {
        if !self.data_mode {
            return;
        }
        self.decoder.write(byte);
        while let Some(frame) = self.decoder.next_frame() {
            if frame.is_empty() {
                continue;
            }
            let frame_type = frame[0] & 0xf;
            match frame_type {
                1 => self.handle_ms(&frame),
                _ => warn!("unhandled V.8bis frame type {frame_type}"),
            }
            self.done = true;
        }
    }

    /// The exchange is over once a message has been handled.
    pub fn completed(&self) -> bool {
        self.done
    }

    fn handle_ms(&mut self, frame: &[u8]) {
        // Identification field.
        let Some(&npar1) = frame.get(1) else {
            warn!("truncated MS message");
            return;
        };
        let v8 = npar1 & 1 != 0;
        let short_v8 = npar1 & 2 != 0;
        let tx_ack = npar1 & 8 != 0;
        let has_nsf = npar1 & 0x40 != 0;
        let mut i = 1;
        i += param_chain_len(frame, i);
        let Some(&spar1_i) = frame.get(i) else {
            warn!("truncated MS message");
            return;
        };
        let chain = param_chain_len(frame, i);
        if spar1_i & 0x7f != 0 {
            i += chain;
            i += param_chain_len(frame, i); // the SPar1 NPar2 chain
        } else {
            i += chain;
        }

        // Standard information field.
        i += param_chain_len(frame, i); // NPar1
        let Some(&spar1) = frame.get(i) else {
            warn!("truncated MS message");
            return;
        };
        if spar1 & 1 == 0 {
            warn!("MS: data bit not set in standard field SPar1");
            self.send_nak(1);
            return;
        }
        i += param_chain_len(frame, i);
        let Some(&caps) = frame.get(i) else {
            warn!("truncated MS message");
            return;
        };
        let v42 = caps & 2 != 0;
        let v42bis = caps & 4 != 0;
        let v14 = caps & 8 != 0;
        let mut speed = 0u32;
        if caps & 0xc0 == 0 {
            if let Some(&b) = frame.get(i + 1) {
                if b & 0x10 != 0 {
                    speed = 33_600; // V.34
                } else if b & 0x20 != 0 {
                    speed = 14_400; // V.32bis
                }
                if speed == 0 && b & 0xc0 == 0 {
                    if let Some(&b) = frame.get(i + 2) {
                        if b & 1 != 0 {
                            speed = 9_600; // V.32
                        } else if b & 2 != 0 {
                            speed = 2_400; // V.22bis
                        } else if b & 4 != 0 {
                            speed = 1_200; // V.22
                        } else if b & 8 != 0 {
                            speed = 300; // V.21
                        }
                    }
                }
            }
        }
        i += param_chain_len(frame, i);
        if has_nsf {
            // Non-standard field: match the K56flex manufacturer code.
            if let (Some(&len), Some(&code_len), Some(&m0), Some(&m1)) = (
                frame.get(i),
                frame.get(i + 2),
                frame.get(i + 3),
                frame.get(i + 4),
            ) {
                if len >= 5 && code_len == 2 && m0 == 0 && m1 == 0x94 {
                    speed = 56_000;
                }
            }
        }
        if tx_ack {
            self.send_ack(1);
        }
        debug!(
            v8,
            short_v8, v14, v42, v42bis, speed, "received V.8bis mode select"
        );
    }

    pub fn reset(&mut self) {
        self.encoder.reset();
        self.decoder.reset();
        self.data_mode = false;
        self.tone_state = 0;
        self.tone_start = None;
        self.done = false;
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use modem_io::FakeClock;

    use super::*;

    fn exchange() -> (Rc<FakeClock>, V8bisProtocol<Rc<FakeClock>>) {
        let clock = Rc::new(FakeClock::new());
        let proto = V8bisProtocol::new(Rc::clone(&clock));
        (clock, proto)
    }

    fn run_tone_handshake(clock: &FakeClock, proto: &mut V8bisProtocol<Rc<FakeClock>>) {
        assert_eq!(proto.detect_tone(), 0);
        clock.advance(SEGMENT1_TICKS);
        assert_eq!(proto.detect_tone(), 0);
        assert_eq!(proto.detect_tone(), STATUS_SEGMENT2);
        clock.advance(SEGMENT2_TICKS);
        assert_eq!(proto.detect_tone(), STATUS_SEGMENT2);
        assert_eq!(proto.detect_tone(), STATUS_MRE);
    }

    #[test]
    fn tone_handshake_reaches_mode_request() {
        let (clock, mut proto) = exchange();
        run_tone_handshake(&clock, &mut proto);
        // Stays in Mode Request state from here on.
        clock.advance(10_000);
        assert_eq!(proto.detect_tone(), STATUS_MRE);
    }

    #[test]
    fn capabilities_request_elicits_cl() {
        let (clock, mut proto) = exchange();
        run_tone_handshake(&clock, &mut proto);
        assert_eq!(proto.available(), 0);
        proto.emit_tone(TONE_CRD);
        let mut dec = HdlcDecoder::new();
        while let Some(b) = proto.read() {
            dec.write(b);
        }
        assert_eq!(dec.next_frame(), Some(CL_MESSAGE.to_vec()));
    }

    #[test]
    fn premature_crd_is_ignored() {
        let (_clock, mut proto) = exchange();
        proto.emit_tone(TONE_CRD);
        assert_eq!(proto.available(), 0);
        assert!(!proto.completed());
    }

    #[test]
    fn mode_select_is_acked() {
        let (clock, mut proto) = exchange();
        run_tone_handshake(&clock, &mut proto);
        proto.emit_tone(TONE_CRD);
        while proto.read().is_some() {}

        // MS: V.8 + ack requested; empty I SPar1; S NPar1; SPar2 data;
        // NPar2 chain offering V.42/V.42bis/V.14 and V.34.
        let ms = [
            0x01, // MS
            0x8b, // I: NPar1, V.8 + short V.8 + tx ack
            0x80, // I: SPar1, empty
            0x80, // S: NPar1
            0x81, // S: SPar2, data
            0x0e, // S: NPar2[1], V.42 + V.42bis + V.14
            0x90, // S: NPar2[2], V.34
        ];
        let mut enc = HdlcEncoder::new();
        enc.send_frame(&ms);
        enc.send_flag();
        while let Some(b) = enc.read() {
            proto.write(b);
        }
        assert!(proto.completed());
        // The ACK(1) frame came back.
        let mut dec = HdlcDecoder::new();
        while let Some(b) = proto.read() {
            dec.write(b);
        }
        assert_eq!(dec.next_frame(), Some(vec![0x14]));
    }
}
