#![forbid(unsafe_code)]

//! V.42 error correction for emulated dial-up modems.
//!
//! The pieces of the answering side of a V.42 link: the V.14 start-stop
//! character codec used before error correction is negotiated, HDLC bit
//! stuffing and FCS framing, the LAP-M procedures (detection, establishment,
//! mod-128 windows, go-back-N retransmission, XID parameter exchange with
//! optional V.42bis compression), and the V.8bis pre-dial capabilities
//! handshake.
//!
//! Everything is polled: the embedder feeds line octets in with `write`,
//! pulls them out with `read`, and supplies a [`modem_io::TimeSource`] for
//! the few timeouts involved. No I/O, threads or async.

mod hdlc;
mod proto;
mod v14;
mod v8bis;

pub use hdlc::{crc16, HdlcDecoder, HdlcEncoder};
pub use proto::{Phase, V42Config, V42Protocol};
pub use v14::V14Codec;
pub use v8bis::V8bisProtocol;
