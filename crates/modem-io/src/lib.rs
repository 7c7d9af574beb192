#![forbid(unsafe_code)]

//! Byte-stream plumbing and time primitives shared by the modem protocol
//! crates.
//!
//! The protocol engines are synchronous and call-driven: an external sampling
//! loop pumps them one byte at a time, and timers are polled against an
//! injected monotonic tick counter rather than scheduled. This crate holds the
//! two seams that make that work: the [`ByteSource`]/[`ByteSink`] transport
//! contract and the [`TimeSource`] clock contract.

mod clock;
mod stream;

pub use clock::{FakeClock, TimeSource, Timer};
pub use stream::{ByteQueue, ByteSink, ByteSource};
