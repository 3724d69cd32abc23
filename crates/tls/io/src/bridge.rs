//! Byte queues between the secure-channel engine and the transport.
//!
//! The engine reads ciphertext from the inbound queue and writes ciphertext
//! to the outbound queue through the [`io::Read`] / [`io::Write`] adapters,
//! so engines built on `read_tls`/`write_tls` style APIs can be driven
//! without touching a socket.

use std::io;

use bytes::{Buf, Bytes, BytesMut};

/// Inbound and outbound ciphertext queues of a session.
///
/// Both queues are FIFO and unbounded.
#[derive(Debug, Default)]
pub struct TransportBridge {
    inbound: BytesMut,
    outbound: BytesMut,
}

impl TransportBridge {
    /// Creates a bridge with empty queues.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bytes received from the transport to the inbound queue.
    pub fn feed_inbound(&mut self, bytes: &[u8]) {
        self.inbound.extend_from_slice(bytes);
    }

    /// Returns the number of received bytes the engine has not consumed yet.
    pub fn pending_inbound_count(&self) -> usize {
        self.inbound.len()
    }

    /// Takes everything the engine produced so far.
    ///
    /// Returns an empty buffer if nothing is pending.
    pub fn drain_outbound(&mut self) -> Bytes {
        self.outbound.split().freeze()
    }

    /// Returns the number of bytes waiting to be sent.
    pub fn pending_outbound_count(&self) -> usize {
        self.outbound.len()
    }

    /// Returns a reader over the inbound queue.
    pub fn inbound(&mut self) -> Inbound<'_> {
        Inbound(&mut self.inbound)
    }

    /// Returns a writer into the outbound queue.
    pub fn outbound(&mut self) -> Outbound<'_> {
        Outbound(&mut self.outbound)
    }
}

/// Reader over the inbound queue.
///
/// Reading from an empty queue fails with [`io::ErrorKind::WouldBlock`].
#[derive(Debug)]
pub struct Inbound<'a>(&'a mut BytesMut);

impl io::Read for Inbound<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.0.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }

        let n = buf.len().min(self.0.len());
        buf[..n].copy_from_slice(&self.0[..n]);
        self.0.advance(n);

        Ok(n)
    }
}

/// Writer into the outbound queue.
#[derive(Debug)]
pub struct Outbound<'a>(&'a mut BytesMut);

impl io::Write for Outbound<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
