use std::collections::VecDeque;

/// Pull side of the transport contract the modem core consumes.
///
/// Implementations never block: `read` returns `None` when no byte is
/// currently available and `available` reports how many bytes `read` can
/// deliver right now.
pub trait ByteSource {
    fn read(&mut self) -> Option<u8>;
    fn available(&self) -> usize;
}

/// Push side of the transport contract. The sink is assumed to always accept;
/// backpressure, if any, lives behind the implementation.
pub trait ByteSink {
    fn write(&mut self, byte: u8);
}

impl<T: ByteSource + ?Sized> ByteSource for &mut T {
    fn read(&mut self) -> Option<u8> {
        (**self).read()
    }

    fn available(&self) -> usize {
        (**self).available()
    }
}

impl<T: ByteSink + ?Sized> ByteSink for &mut T {
    fn write(&mut self, byte: u8) {
        (**self).write(byte);
    }
}

/// In-memory FIFO implementing both halves of the contract.
///
/// Used as the application-side transport in tests and by embedders that pump
/// bytes into and out of the protocol engines manually.
#[derive(Debug, Default)]
pub struct ByteQueue {
    buf: VecDeque<u8>,
}

impl ByteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Queue a run of bytes for reading.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend(bytes);
    }

    /// Take everything currently buffered, in FIFO order.
    pub fn drain(&mut self) -> Vec<u8> {
        self.buf.drain(..).collect()
    }
}

impl ByteSource for ByteQueue {
    fn read(&mut self) -> Option<u8> {
        self.buf.pop_front()
    }

    fn available(&self) -> usize {
        self.buf.len()
    }
}

impl ByteSink for ByteQueue {
    fn write(&mut self, byte: u8) {
        self.buf.push_back(byte);
    }
}
