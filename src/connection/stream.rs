//! Write batching over a non-blocking transport.
//!
//! While corked, every write lands in a buffer; the matching uncork pushes
//! the whole batch to the kernel in as few writes as it will accept. This
//! lets a handler emit status line, headers and body as separate calls that
//! still coalesce into one send. Bytes the kernel refuses stay buffered as
//! backpressure and are drained on later writability events.

use std::io;

use bytes::{Buf, BytesMut};

use super::Transport;

pub struct CorkStream<T> {
    transport: T,
    out: BytesMut,
    corked: bool,
}

impl<T: Transport> CorkStream<T> {
    pub fn new(transport: T) -> Self {
        Self { transport, out: BytesMut::new(), corked: false }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Starts buffering all writes until the matching [`uncork`].
    ///
    /// [`uncork`]: CorkStream::uncork
    pub fn cork(&mut self) {
        self.corked = true;
    }

    /// Stops buffering and flushes the batch.
    ///
    /// Returns `(written, failed)`: the bytes the kernel accepted and
    /// whether any remain buffered (backpressure).
    pub fn uncork(&mut self) -> (usize, bool) {
        self.corked = false;
        self.flush()
    }

    /// Queues `data` for sending. Outside a cork the stream flushes
    /// eagerly; inside one the bytes wait for the uncork.
    pub fn write(&mut self, data: &[u8]) {
        self.out.extend_from_slice(data);
        if !self.corked {
            self.flush();
        }
    }

    /// Zero-byte drain: pushes whatever is buffered without adding data.
    pub fn flush(&mut self) -> (usize, bool) {
        let mut written = 0;
        while !self.out.is_empty() {
            if self.transport.is_closed() {
                break;
            }
            match self.transport.write(self.out.as_ref()) {
                Ok(0) => break,
                Ok(n) => {
                    self.out.advance(n);
                    written += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(_) => {
                    self.transport.close();
                    break;
                }
            }
        }
        (written, !self.out.is_empty())
    }

    /// Whether buffered bytes are waiting on the socket to become writable.
    pub fn has_pending(&self) -> bool {
        !self.out.is_empty()
    }

    /// Buffered byte count, corked or backpressured.
    pub fn pending(&self) -> usize {
        self.out.len()
    }
}
