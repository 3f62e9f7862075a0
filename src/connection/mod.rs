//! Per-connection building blocks: the transport capability surface, the
//! corked write stream, and the state block that lives alongside each
//! accepted socket.

mod stream;

pub use stream::CorkStream;

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use bytes::BytesMut;

use crate::codec::RequestParser;
use crate::protocol::{HttpResponse, ResponseState};

/// The capability surface the HTTP layer needs from a non-blocking socket.
///
/// Plain TCP and TLS sockets differ only behind this trait; the connection
/// context logic is identical for both variants.
pub trait Transport {
    /// Attempts a non-blocking write and returns the number of bytes the
    /// kernel accepted. `WouldBlock` means the send buffer is full.
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Abortive close. Pending outbound data is discarded so the peer never
    /// mistakes a truncated response for a complete one.
    fn close(&mut self);

    fn is_closed(&self) -> bool;

    fn is_shut_down(&self) -> bool;

    /// Arms (`Some`) or disarms (`None`) the inactivity timer. Expiry is
    /// delivered back to the HTTP layer as a timeout event.
    fn set_timeout(&mut self, after: Option<Duration>);
}

/// TLS identity and trust material for the secure context variant.
///
/// All fields are optional; the transport layer interprets them. The plain
/// TCP transport ignores the configuration entirely.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    pub key_file: Option<PathBuf>,
    pub cert_file: Option<PathBuf>,
    pub dh_params_file: Option<PathBuf>,
    pub passphrase: Option<String>,
    pub ca_file: Option<PathBuf>,
}

/// A protocol that takes over the connection after an HTTP upgrade.
///
/// Once a route handler deposits one of these through
/// [`HttpResponse::upgrade`], the HTTP layer stops interpreting the byte
/// stream and all subsequent socket events are delivered here instead. The
/// corked state of the stream survives the handover.
pub trait SocketProtocol<T: Transport> {
    /// Inbound bytes for the upgraded protocol.
    fn on_data(&mut self, stream: &mut CorkStream<T>, data: &[u8]);

    /// The socket became writable while backpressure was pending.
    fn on_writable(&mut self, stream: &mut CorkStream<T>) {
        let _ = stream.flush();
    }

    /// The inactivity timer fired.
    fn on_timeout(&mut self, stream: &mut CorkStream<T>) {
        stream.transport_mut().close();
    }

    /// The peer sent FIN.
    fn on_end(&mut self, stream: &mut CorkStream<T>) {
        stream.transport_mut().close();
    }

    /// The connection is gone.
    fn on_close(&mut self) {}
}

pub(crate) type AbortHandler = Box<dyn FnOnce()>;
pub(crate) type WritableHandler<T> = Box<dyn FnMut(&mut HttpResponse<'_, T>, u64) -> bool>;
pub(crate) type StreamHandler<T> = Box<dyn FnMut(&mut HttpResponse<'_, T>, &[u8], bool)>;

/// The HTTP state block co-located with each connection.
///
/// Constructed when the socket opens and torn down when it closes; never
/// shared between connections.
pub(crate) struct ConnectionState<T: Transport> {
    /// Response progress bits; reassigned wholesale on every new request.
    pub(crate) flags: ResponseState,
    /// Response body bytes accepted through the response handle, reported
    /// to `on_writable` so a streaming handler resumes where it left off.
    pub(crate) offset: u64,
    /// Fires at most once, if the connection dies while a request is in
    /// flight.
    pub(crate) on_aborted: Option<AbortHandler>,
    /// User-driven drain callback; while installed, the user owns progress
    /// and the idle timer stays disarmed.
    pub(crate) on_writable: Option<WritableHandler<T>>,
    /// Body chunk sink; cleared after its final invocation so the next
    /// request on the connection cannot inherit it.
    pub(crate) in_stream: Option<StreamHandler<T>>,
    /// Transient upgrade command slot, taken by the driver on every read.
    pub(crate) pending_upgrade: Option<Box<dyn SocketProtocol<T>>>,
}

impl<T: Transport> ConnectionState<T> {
    fn new() -> Self {
        Self {
            flags: ResponseState::NONE,
            offset: 0,
            on_aborted: None,
            on_writable: None,
            in_stream: None,
            pending_upgrade: None,
        }
    }
}

/// One accepted HTTP connection: corked stream, HTTP state, parser state
/// and the inbound accumulation buffer.
pub struct Connection<T: Transport> {
    pub(crate) stream: CorkStream<T>,
    pub(crate) http: ConnectionState<T>,
    pub(crate) parser: RequestParser,
    pub(crate) inbound: BytesMut,
    pub(crate) close_delivered: bool,
}

impl<T: Transport> Connection<T> {
    pub(crate) fn new(transport: T) -> Self {
        Self {
            stream: CorkStream::new(transport),
            http: ConnectionState::new(),
            parser: RequestParser::new(),
            inbound: BytesMut::new(),
            close_delivered: false,
        }
    }

    /// The corked write stream for this connection.
    pub fn stream(&self) -> &CorkStream<T> {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut CorkStream<T> {
        &mut self.stream
    }

    /// Whether buffered output is waiting on the socket to become writable.
    pub fn wants_writable(&self) -> bool {
        self.stream.has_pending()
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::Transport;
    use std::collections::VecDeque;
    use std::io;
    use std::time::Duration;

    /// Scriptable in-memory transport used by the state-machine tests.
    ///
    /// Each entry in `limits` caps how many bytes the next write accepts
    /// (`0` means `WouldBlock`); once the script is exhausted every write
    /// is accepted in full. Timeout arming is recorded, not enforced.
    pub(crate) struct MockTransport {
        pub writes: Vec<Vec<u8>>,
        pub limits: VecDeque<usize>,
        pub closed: bool,
        pub shut_down: bool,
        pub timeouts: Vec<Option<Duration>>,
    }

    impl MockTransport {
        pub(crate) fn new() -> Self {
            Self {
                writes: Vec::new(),
                limits: VecDeque::new(),
                closed: false,
                shut_down: false,
                timeouts: Vec::new(),
            }
        }

        pub(crate) fn with_limits(limits: &[usize]) -> Self {
            let mut transport = Self::new();
            transport.limits = limits.iter().copied().collect();
            transport
        }

        /// Everything written so far, across all write calls.
        pub(crate) fn output(&self) -> Vec<u8> {
            self.writes.iter().flatten().copied().collect()
        }

        /// The most recent timeout arming, if any was recorded.
        pub(crate) fn last_timeout(&self) -> Option<Option<Duration>> {
            self.timeouts.last().copied()
        }
    }

    impl Transport for MockTransport {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            let accepted = match self.limits.pop_front() {
                Some(0) => return Err(io::ErrorKind::WouldBlock.into()),
                Some(limit) => limit.min(data.len()),
                None => data.len(),
            };
            self.writes.push(data[..accepted].to_vec());
            Ok(accepted)
        }

        fn close(&mut self) {
            self.closed = true;
        }

        fn is_closed(&self) -> bool {
            self.closed
        }

        fn is_shut_down(&self) -> bool {
            self.shut_down
        }

        fn set_timeout(&mut self, after: Option<Duration>) {
            self.timeouts.push(after);
        }
    }
}
