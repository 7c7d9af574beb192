use std::collections::BTreeMap;

use modem_io::{ByteQueue, ByteSink, ByteSource, TimeSource, Timer};
use modem_v42bis::{Compressor, Decompressor, V42bisParams, CW_FIRST};
use tracing::{debug, info, warn};

use crate::hdlc::{HdlcDecoder, HdlcEncoder};
use crate::v14::V14Codec;

// LAP-M control bytes, P/F bit excluded.
const CTL_RR: u8 = 0x01;
const CTL_RNR: u8 = 0x05;
const CTL_REJ: u8 = 0x09;
const CTL_SREJ: u8 = 0x0d;
const CTL_UI: u8 = 0x03;
const CTL_DISC: u8 = 0x43;
const CTL_UA: u8 = 0x63;
const CTL_SABME: u8 = 0x6f;
const CTL_DM: u8 = 0x0f;
const CTL_FRMR: u8 = 0x87;
const CTL_XID: u8 = 0xaf;
const CTL_TEST: u8 = 0xe3;

const POLL_FINAL: u8 = 0x10;

// XID fields.
const XID_FORMAT: u8 = 0x82;
const GID_PARAM: u8 = 0x80;
const GID_PRIVATE: u8 = 0xf0;
const GID_USER_DATA: u8 = 0xff;

/// DC1 with even and odd parity, the ODP detection pattern.
const DC1_EVEN: u8 = 0x11;
const DC1_ODD: u8 = 0x91;

/// `left <= right` in mod-128 sequence space, within a half-window.
fn lte_mod128(left: u8, right: u8) -> bool {
    right.wrapping_sub(left) & 0x7f <= 64
}

fn inc_mod128(v: u8) -> u8 {
    v.wrapping_add(1) & 0x7f
}

fn dec_mod128(v: u8) -> u8 {
    v.wrapping_sub(1) & 0x7f
}

/// Link phase. Everything before `Connected` is the V.42 detection and
/// establishment handshake; `V14` is the permanent fallback for peers that
/// never negotiate error correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Detection,
    Establish,
    Connected,
    Release,
    V14,
}

/// LAP-M tunables. Timeouts are in ticks of the injected clock.
#[derive(Debug, Clone, Copy)]
pub struct V42Config {
    /// Maximum I-frame information field, octets.
    pub tx_max_size: usize,
    /// Send window (k).
    pub tx_window: u32,
    /// Ticks of detection-phase silence before falling back to V.14 (T400).
    pub detection_timeout: u64,
    /// Ticks without traffic before an RR keepalive is polled (T403).
    pub inactivity_timeout: u64,
}

impl Default for V42Config {
    fn default() -> Self {
        Self {
            tx_max_size: 128,
            tx_window: 15,
            detection_timeout: 750,
            inactivity_timeout: 1000,
        }
    }
}

#[derive(Debug)]
struct V42bisCodecs {
    compressor: Compressor,
    decompressor: Decompressor,
}

/// V.42 LAP-M endpoint.
///
/// Sits between a plain byte stream ([`send`](V42Protocol::send) /
/// [`recv`](V42Protocol::recv)) and the synchronous line
/// ([`read`](V42Protocol::read) / [`write`](V42Protocol::write), also exposed
/// as [`ByteSource`]/[`ByteSink`] so an embedder can swap it in for the raw
/// transport). The embedder pumps one line octet per tick in each direction;
/// `read` never runs dry, synthesizing V.14 mark idle or HDLC flag fill as
/// the phase requires.
#[derive(Debug)]
pub struct V42Protocol<C> {
    config: V42Config,
    clock: C,
    phase: Phase,
    v14: V14Codec,
    hdlc_encoder: HdlcEncoder,
    hdlc_decoder: HdlcDecoder,
    // ODP detection.
    last_rx: u8,
    odp_count: u32,
    detection_timer: Timer,
    // Mod-128 window state.
    tx_seq: u8,
    rx_seq: u8,
    tx_ack: u8,
    tx_max_size: usize,
    tx_window: u32,
    sent_iframes: BTreeMap<u8, Vec<u8>>,
    inactivity_timer: Timer,
    compression: Option<V42bisCodecs>,
    /// Application data waiting to go out over the link.
    app_in: ByteQueue,
    /// Application data delivered by the link.
    app_out: ByteQueue,
}

impl<C: TimeSource> V42Protocol<C> {
    pub fn new(config: V42Config, clock: C) -> Self {
        let mut proto = Self {
            config,
            clock,
            phase: Phase::Idle,
            v14: V14Codec::new(),
            hdlc_encoder: HdlcEncoder::new(),
            hdlc_decoder: HdlcDecoder::new(),
            last_rx: 0,
            odp_count: 0,
            detection_timer: Timer::new(config.detection_timeout),
            tx_seq: 0,
            rx_seq: 0,
            tx_ack: 0,
            tx_max_size: config.tx_max_size,
            tx_window: config.tx_window,
            sent_iframes: BTreeMap::new(),
            inactivity_timer: Timer::new(config.inactivity_timeout),
            compression: None,
            app_in: ByteQueue::new(),
            app_out: ByteQueue::new(),
        };
        proto.reset();
        proto
    }

    /// Return every layer to its initial state and restart detection.
    pub fn reset(&mut self) {
        self.phase = Phase::Idle;
        self.last_rx = 0;
        self.odp_count = 0;
        self.v14.reset();
        self.hdlc_encoder.reset();
        self.hdlc_decoder.reset();
        self.tx_seq = 0;
        self.rx_seq = 0;
        self.tx_ack = 0;
        self.tx_max_size = self.config.tx_max_size;
        self.tx_window = self.config.tx_window;
        self.sent_iframes.clear();
        self.compression = None;
        let now = self.clock.now();
        self.detection_timer.start(now);
        self.inactivity_timer.start(now);
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Queue application data for the peer.
    pub fn send(&mut self, byte: u8) {
        self.app_in.write(byte);
    }

    /// Take application data received from the peer.
    pub fn recv(&mut self) -> Option<u8> {
        self.app_out.read()
    }

    /// Produce the next line octet. Never returns `None`: with nothing to
    /// send, the line carries V.14 mark idle or HDLC flags depending on
    /// phase.
    pub fn read(&mut self) -> Option<u8> {
        match self.phase {
            Phase::Idle | Phase::Detection => {
                self.v14.flush();
                self.v14.line_read()
            }
            Phase::V14 => {
                while self.v14.line_available() == 0 {
                    match self.app_in.read() {
                        Some(b) => self.v14.transmit(b),
                        None => {
                            self.v14.flush();
                            break;
                        }
                    }
                }
                self.v14.line_read()
            }
            Phase::Establish | Phase::Connected | Phase::Release => {
                if self.hdlc_encoder.available() == 0 {
                    if self.phase == Phase::Connected {
                        self.send_iframe();
                        let now = self.clock.now();
                        if self.hdlc_encoder.available() == 0
                            && self.inactivity_timer.expired(now)
                        {
                            // Poll the peer with an RR keepalive.
                            let rr = [1, CTL_RR, (self.rx_seq << 1) | 1];
                            self.hdlc_encoder.send_frame(&rr);
                            self.inactivity_timer.start(now);
                        }
                    }
                    if self.hdlc_encoder.available() == 0 {
                        self.hdlc_encoder.send_flag();
                    }
                }
                self.hdlc_encoder.read()
            }
        }
    }

    /// Consume one line octet.
    pub fn write(&mut self, byte: u8) {
        let mut v = byte;
        if matches!(self.phase, Phase::Idle | Phase::Detection) {
            if self.detection_timer.expired(self.clock.now()) {
                info!("no V.42 detection, falling back to V.14");
                self.phase = Phase::V14;
            } else {
                self.v14.receive(v);
                match self.v14.read() {
                    Some(c) => v = c,
                    None => return,
                }
            }
        }
        match self.phase {
            Phase::Idle => {
                let stop_bits = self.v14.received_stop_bits();
                if (v == DC1_EVEN || v == DC1_ODD) && (stop_bits == 9 || stop_bits == 17) {
                    self.phase = Phase::Detection;
                    self.last_rx = v;
                    self.odp_count = 1;
                }
            }
            Phase::Detection => {
                // ODP: DC1 with alternating parity, each followed by 8+1 or
                // 16+1 mark bits.
                let stop_bits = self.v14.received_stop_bits();
                if (v == DC1_EVEN || v == DC1_ODD)
                    && (stop_bits == 9 || stop_bits == 17)
                    && v != self.last_rx
                {
                    self.odp_count += 1;
                    if self.odp_count == 4 {
                        self.odp_count = 0;
                        debug!("ODP detected, answering with ADP");
                        self.v14.set_stop_bits(9);
                        self.v14.transmit(b'E');
                        self.v14.transmit(b'C');
                        self.v14.set_stop_bits(1);
                    }
                } else {
                    self.odp_count = 0;
                    if v == 0x7e {
                        self.phase = Phase::Establish;
                    }
                }
                self.last_rx = v;
            }
            Phase::Establish | Phase::Connected => {
                self.hdlc_decoder.write(v);
                self.handle_frame();
            }
            Phase::V14 => {
                self.v14.receive(v);
                while let Some(c) = self.v14.read() {
                    self.app_out.write(c);
                }
            }
            Phase::Release => {}
        }
    }

    fn handle_frame(&mut self) {
        let Some(frame) = self.hdlc_decoder.next_frame() else {
            return;
        };
        if frame.len() < 2 {
            warn!("invalid frame: {} bytes", frame.len());
            return;
        }
        if frame[0] & 1 == 0 {
            warn!("invalid frame: unexpected extended address");
            return;
        }
        if frame[0] >> 2 != 0 {
            warn!("invalid frame: unknown address {:#04x}", frame[0] >> 2);
            return;
        }

        let control = frame[1];
        if control & 3 != 3 && control != CTL_SREJ {
            // Information and supervisory frames (except SREJ) carry N(R).
            let Some(&nr) = frame.get(2) else {
                warn!("short I/S frame");
                return;
            };
            self.ack_iframes(nr >> 1);
        }
        self.inactivity_timer.start(self.clock.now());

        match control & !POLL_FINAL {
            CTL_RR => {}
            CTL_RNR => warn!("received RNR"),
            CTL_REJ => self.handle_reject(frame[2]),
            CTL_SREJ => warn!("received SREJ"),
            CTL_SABME => self.handle_sabme(frame[0], control),
            CTL_DM => {}
            CTL_UI => warn!("received UI"),
            CTL_DISC => self.handle_disc(frame[0]),
            CTL_UA => {}
            CTL_FRMR => warn!("received FRMR"),
            CTL_XID => self.handle_xid(frame),
            CTL_TEST => {}
            _ => {
                if control & 1 != 0 {
                    warn!("invalid HDLC command {control:#04x}");
                    return;
                }
                if self.phase != Phase::Connected {
                    warn!("I-frame received but not connected");
                    return;
                }
                self.handle_iframe(&frame);
            }
        }
    }

    fn handle_sabme(&mut self, address: u8, control: u8) {
        if self.phase == Phase::Connected {
            warn!("SABME received while already connected");
        } else {
            info!("received SABME");
        }
        let ua = [address, CTL_UA | (control & POLL_FINAL)];
        self.hdlc_encoder.send_frame(&ua);

        self.phase = Phase::Connected;
        self.tx_seq = 0;
        self.rx_seq = 0;
        self.tx_ack = 0;
    }

    fn handle_disc(&mut self, address: u8) {
        info!("received DISC");
        self.phase = Phase::Release;
        let ua = [address, CTL_UA | POLL_FINAL];
        self.hdlc_encoder.send_frame(&ua);
    }

    fn handle_iframe(&mut self, frame: &[u8]) {
        let Some(&ctl2) = frame.get(2) else {
            warn!("short I-frame");
            return;
        };
        let seq = frame[1] >> 1;
        if seq != self.rx_seq {
            info!(
                "I-frame out of sequence: expected {} received {seq}",
                self.rx_seq
            );
            let reject = [frame[0], CTL_REJ, self.rx_seq << 1];
            self.hdlc_encoder.send_frame(&reject);
            return;
        }
        self.rx_seq = inc_mod128(self.rx_seq);
        let payload = &frame[3..];
        match &mut self.compression {
            Some(codecs) => {
                for &b in payload {
                    if let Err(err) = codecs.decompressor.write(b) {
                        warn!("V.42bis decode failed, releasing link: {err}");
                        let disc = [1, CTL_DISC];
                        self.hdlc_encoder.send_frame(&disc);
                        self.phase = Phase::Release;
                        self.sent_iframes.clear();
                        return;
                    }
                }
                while let Some(c) = codecs.decompressor.read() {
                    self.app_out.write(c);
                }
            }
            None => {
                for &b in payload {
                    self.app_out.write(b);
                }
            }
        }

        // Acknowledge now if polled, or if there is no I-frame to piggyback
        // the ack onto.
        if ctl2 & 1 == 1 || self.app_in.is_empty() {
            let rr = [frame[0], CTL_RR, (self.rx_seq << 1) | (ctl2 & 1)];
            self.hdlc_encoder.send_frame(&rr);
        }
    }

    fn handle_reject(&mut self, ctl2: u8) {
        let mut seq = ctl2 >> 1;
        info!("received REJECT {seq}");
        while lte_mod128(seq, dec_mod128(self.tx_seq)) {
            let Some(frame) = self.sent_iframes.get_mut(&seq) else {
                warn!("rejected frame {seq} not retained, cannot retransmit");
                break;
            };
            // Refresh the piggybacked N(R) before retransmitting.
            frame[2] = self.rx_seq << 1;
            self.hdlc_encoder.send_frame(frame);
            seq = inc_mod128(seq);
        }
    }

    /// Release every retained I-frame up to (excluding) `seq` and advance
    /// the ack point.
    fn ack_iframes(&mut self, seq: u8) {
        if lte_mod128(self.tx_ack, seq) {
            let mut s = dec_mod128(self.tx_ack);
            while lte_mod128(s, dec_mod128(seq)) {
                self.sent_iframes.remove(&s);
                s = inc_mod128(s);
            }
            self.tx_ack = seq;
        } else {
            warn!("ack seq {seq} behind previous ack {}", self.tx_ack);
        }
    }

    fn send_iframe(&mut self) {
        if self.app_in.is_empty() {
            return;
        }
        let window = self.tx_seq.wrapping_sub(self.tx_ack) & 0x7f;
        if u32::from(window) >= self.tx_window {
            return;
        }

        let mut frame = Vec::with_capacity(self.tx_max_size + 3);
        frame.push(1);
        frame.push(self.tx_seq << 1);
        frame.push(self.rx_seq << 1);
        self.tx_seq = inc_mod128(self.tx_seq);
        match &mut self.compression {
            Some(codecs) => {
                while codecs.compressor.available() < self.tx_max_size {
                    match self.app_in.read() {
                        Some(c) => codecs.compressor.write(c),
                        None => break,
                    }
                }
                codecs.compressor.flush();
                while frame.len() - 3 < self.tx_max_size {
                    match codecs.compressor.read() {
                        Some(c) => frame.push(c),
                        None => break,
                    }
                }
                if frame.len() == 3 {
                    // Nothing came out; don't send an empty frame.
                    self.tx_seq = dec_mod128(self.tx_seq);
                    return;
                }
            }
            None => {
                while frame.len() - 3 < self.tx_max_size {
                    match self.app_in.read() {
                        Some(c) => frame.push(c),
                        None => break,
                    }
                }
            }
        }
        self.hdlc_encoder.send_frame(&frame);
        self.sent_iframes.insert(frame[1] >> 1, frame);
    }

    fn handle_xid(&mut self, mut frame: Vec<u8>) {
        let mut max_codewords: u32 = 512;
        let mut max_string_length: u32 = 6;
        let mut compression_requested = false;

        if frame.get(2) != Some(&XID_FORMAT) {
            warn!("unexpected XID format: {:02x?}", frame.get(2));
            return;
        }
        let mut user_data_offset = None;
        let mut i = 3;
        // Parameter groups: [group id][length hi][length lo][params...].
        while i + 3 <= frame.len() {
            let gid = frame[i];
            let group_size = usize::from(frame[i + 1]) << 8 | usize::from(frame[i + 2]);
            i += 3;
            let end = i + group_size;
            if end > frame.len() {
                warn!("truncated XID group {gid:#04x}");
                return;
            }
            if gid == GID_USER_DATA {
                user_data_offset = Some(i - 3);
                i = end;
                continue;
            }
            if gid != GID_PARAM && gid != GID_PRIVATE {
                info!("unexpected XID group id {gid:#04x}");
                i = end;
                continue;
            }
            // Parameters: [id][length][value...], values big-endian except
            // the HDLC optional-functions bitmap.
            while i < end {
                if i + 2 > end {
                    warn!("truncated XID parameter in group {gid:#04x}");
                    return;
                }
                let param_id = frame[i];
                let param_size = usize::from(frame[i + 1]);
                i += 2;
                if i + param_size > end {
                    warn!("truncated XID parameter {param_id} in group {gid:#04x}");
                    return;
                }
                if param_size > 4 {
                    warn!("unexpected length {param_size} for XID parameter {param_id}");
                    i += param_size;
                    continue;
                }
                let value = frame[i..i + param_size]
                    .iter()
                    .fold(0u32, |v, &b| v << 8 | u32::from(b));
                match (gid, param_id) {
                    (GID_PRIVATE, 0) => {} // parameter set id
                    (GID_PRIVATE, 1) => {
                        debug!("XID: data compression request {value:#x}");
                        if value == 3 {
                            compression_requested = true;
                        } else if param_size == 1 {
                            // One-direction compression is not supported;
                            // zero the request in the echo.
                            frame[i] = 0;
                        }
                    }
                    (GID_PRIVATE, 2) => {
                        debug!("XID: number of codewords {value}");
                        max_codewords = value;
                    }
                    (GID_PRIVATE, 3) => {
                        debug!("XID: maximum string length {value}");
                        max_string_length = value;
                    }
                    (GID_PARAM, 3) => {
                        let bitmap = frame[i..i + param_size]
                            .iter()
                            .enumerate()
                            .fold(0u32, |v, (j, &b)| v | u32::from(b) << (8 * j));
                        debug!("XID: HDLC optional functions {bitmap:#x}");
                    }
                    (GID_PARAM, 5) => {
                        debug!("XID: max tx information field {value} bits");
                        self.tx_max_size = (value / 8) as usize;
                    }
                    (GID_PARAM, 6) => {
                        debug!("XID: max rx information field {value} bits");
                    }
                    (GID_PARAM, 7) => {
                        debug!("XID: tx window {value}");
                        self.tx_window = value;
                    }
                    (GID_PARAM, 8) => {
                        debug!("XID: rx window {value}");
                    }
                    _ => warn!("unexpected XID parameter {param_id} in group {gid:#04x}"),
                }
                i += param_size;
            }
        }
        if let Some(offset) = user_data_offset {
            frame.truncate(offset);
        }
        self.hdlc_encoder.send_frame(&frame);

        if compression_requested {
            info!("V.42bis compression enabled, {max_codewords} codewords");
            let params = V42bisParams {
                max_codewords: u16::try_from(max_codewords)
                    .unwrap_or(u16::MAX)
                    .max(CW_FIRST + 1),
                max_string_length: max_string_length as usize,
            };
            self.compression = Some(V42bisCodecs {
                compressor: Compressor::new(params),
                decompressor: Decompressor::new(params),
            });
        } else {
            self.compression = None;
        }
    }
}

impl<C: TimeSource> ByteSource for V42Protocol<C> {
    fn read(&mut self) -> Option<u8> {
        V42Protocol::read(self)
    }

    fn available(&self) -> usize {
        match self.phase {
            Phase::Idle | Phase::Detection | Phase::V14 => self.v14.line_available(),
            _ => self.hdlc_encoder.available(),
        }
    }
}

impl<C: TimeSource> ByteSink for V42Protocol<C> {
    fn write(&mut self, byte: u8) {
        V42Protocol::write(self, byte)
    }
}
