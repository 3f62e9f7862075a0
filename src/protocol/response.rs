//! The handler-facing response handle.
//!
//! An [`HttpResponse`] borrows the connection's corked stream and HTTP
//! state for the duration of one callback. Writing happens inside the data
//! event's cork, so status line, headers and body coalesce into a single
//! kernel send when the event uncorks.

use http::StatusCode;

use crate::connection::{ConnectionState, CorkStream, SocketProtocol, Transport};

/// Response progress bits.
///
/// A newly dispatched request assigns the whole set to `RESPONSE_PENDING`,
/// clearing any bits left over from the previous request on the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ResponseState(u8);

impl ResponseState {
    pub(crate) const NONE: Self = Self(0);
    /// A request was routed and its response has not been finished.
    pub(crate) const RESPONSE_PENDING: Self = Self(1 << 0);
    /// The status line has been written (possibly implicitly).
    pub(crate) const STATUS_WRITTEN: Self = Self(1 << 1);
    /// `end` ran; the response is complete.
    pub(crate) const END_CALLED: Self = Self(1 << 2);

    pub(crate) fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub(crate) fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub(crate) fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

pub struct HttpResponse<'a, T: Transport> {
    stream: &'a mut CorkStream<T>,
    state: &'a mut ConnectionState<T>,
}

impl<'a, T: Transport> HttpResponse<'a, T> {
    pub(crate) fn new(stream: &'a mut CorkStream<T>, state: &'a mut ConnectionState<T>) -> Self {
        Self { stream, state }
    }

    /// Writes the status line. A second call is a no-op; if a header or the
    /// body is written first, `200 OK` is emitted implicitly.
    pub fn write_status(&mut self, status: StatusCode) -> &mut Self {
        if self.state.flags.contains(ResponseState::STATUS_WRITTEN) {
            return self;
        }
        self.state.flags.insert(ResponseState::STATUS_WRITTEN);
        self.stream.write(b"HTTP/1.1 ");
        self.stream.write(status.as_str().as_bytes());
        if let Some(reason) = status.canonical_reason() {
            self.stream.write(b" ");
            self.stream.write(reason.as_bytes());
        }
        self.stream.write(b"\r\n");
        self
    }

    /// Appends one response header field.
    pub fn write_header(&mut self, name: &str, value: &str) -> &mut Self {
        self.write_status(StatusCode::OK);
        self.stream.write(name.as_bytes());
        self.stream.write(b": ");
        self.stream.write(value.as_bytes());
        self.stream.write(b"\r\n");
        self
    }

    /// Finishes the response: emits Content-Length, the header terminator
    /// and `body`, and marks the request as answered. Calling it again is a
    /// no-op.
    pub fn end(&mut self, body: &[u8]) {
        if self.state.flags.contains(ResponseState::END_CALLED) {
            return;
        }
        self.write_status(StatusCode::OK);
        self.stream.write(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
        self.stream.write(body);
        self.state.offset += body.len() as u64;
        self.state.flags.insert(ResponseState::END_CALLED);
        self.state.flags.remove(ResponseState::RESPONSE_PENDING);
        self.state.on_aborted = None;
        self.state.on_writable = None;
    }

    /// Whether this request already produced its response.
    pub fn has_responded(&self) -> bool {
        self.state.flags.contains(ResponseState::END_CALLED)
    }

    /// Response body bytes this handle has accepted so far. `on_writable`
    /// receives this value so a streaming handler can resume from where it
    /// left off; bytes the stream still buffers are drained by the
    /// connection, not resent by the handler.
    pub fn offset(&self) -> u64 {
        self.state.offset
    }

    /// Installs the abort callback, fired at most once if the connection
    /// dies while this request is still in flight. A handler that does not
    /// respond synchronously must install one.
    pub fn on_aborted(&mut self, f: impl FnOnce() + 'static) -> &mut Self {
        self.state.on_aborted = Some(Box::new(f));
        self
    }

    /// Installs the writability callback. While installed, the user drives
    /// drain progress and the idle timer stays disarmed; returning `false`
    /// skips further drain attempts for the event.
    pub fn on_writable(
        &mut self,
        f: impl FnMut(&mut HttpResponse<'_, T>, u64) -> bool + 'static,
    ) -> &mut Self {
        self.state.on_writable = Some(Box::new(f));
        self
    }

    /// Installs the request body sink. It receives `(chunk, is_final)` per
    /// inbound chunk and always a terminal `is_final` call, even for empty
    /// bodies; after that call it is dropped automatically.
    pub fn on_data(
        &mut self,
        f: impl FnMut(&mut HttpResponse<'_, T>, &[u8], bool) + 'static,
    ) -> &mut Self {
        self.state.in_stream = Some(Box::new(f));
        self
    }

    /// Writes raw bytes into the response stream, advancing the resume
    /// offset. Intended for manual streaming from `on_writable` and for
    /// upgrade handshakes that terminate their own head.
    pub fn write_raw(&mut self, data: &[u8]) -> &mut Self {
        self.stream.write(data);
        self.state.offset += data.len() as u64;
        self
    }

    /// Deposits the protocol that takes over this connection. The driver
    /// acts on it right after the current handler returns; the corked
    /// output (e.g. a `101 Switching Protocols` head) is flushed under the
    /// new identity.
    pub fn upgrade(&mut self, protocol: impl SocketProtocol<T> + 'static) {
        self.state.pending_upgrade = Some(Box::new(protocol));
    }

    /// Requests an abortive close of the connection, honored as soon as the
    /// current handler returns.
    pub fn close(&mut self) {
        self.stream.transport_mut().close();
    }
}
