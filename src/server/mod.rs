//! The tokio socket binding.
//!
//! [`Listener`] accepts TCP connections and drives every accepted
//! connection's event loop inside one future: kernel readability and
//! writability, deadline expiry and EOF are translated into the
//! [`HttpContext`] event operations. Everything runs on the task that
//! awaits [`Listener::serve`]: one loop owns all of its sockets, exactly
//! one event at a time, no locks.

use std::cell::RefCell;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use thiserror::Error;
use tokio::io::Interest;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep_until, Instant};
use tracing::{error, info, trace, warn};

use crate::connection::{SocketProtocol, Transport};
use crate::context::{DataOutcome, HttpContext};

/// Socket options applied to accepted connections.
#[derive(Debug, Clone)]
pub struct ListenOptions {
    /// Disable Nagle's algorithm on accepted sockets.
    pub nodelay: bool,
}

impl Default for ListenOptions {
    fn default() -> Self {
        Self { nodelay: true }
    }
}

#[derive(Error, Debug)]
pub enum ListenError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

/// [`Transport`] over a tokio TCP stream.
///
/// Close is abortive: linger is zeroed so dropping the socket sends RST
/// rather than FIN, which keeps a truncated response from looking like a
/// complete one. Timeout arming just stores the deadline; the connection
/// loop sleeps on it.
pub struct TcpTransport {
    socket: TcpStream,
    deadline: Option<Instant>,
    closed: bool,
    shut_down: bool,
}

impl TcpTransport {
    pub fn new(socket: TcpStream) -> Self {
        Self { socket, deadline: None, closed: false, shut_down: false }
    }

    pub fn socket(&self) -> &TcpStream {
        &self.socket
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

impl Transport for TcpTransport {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.socket.try_write(data)
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.socket.set_linger(Some(Duration::from_secs(0)));
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    fn set_timeout(&mut self, after: Option<Duration>) {
        self.deadline = after.map(|after| Instant::now() + after);
    }
}

/// A bound accept socket, ready to serve an [`HttpContext`].
pub struct Listener {
    inner: TcpListener,
    options: ListenOptions,
}

impl Listener {
    pub async fn bind(host: &str, port: u16, options: ListenOptions) -> Result<Self, ListenError> {
        let inner = TcpListener::bind((host, port)).await.map_err(|source| {
            error!(cause = %source, "bind server error");
            ListenError::Bind { addr: format!("{host}:{port}"), source }
        })?;
        if let Ok(addr) = inner.local_addr() {
            info!(%addr, "listening");
        }
        Ok(Self { inner, options })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Accepts connections forever and drives each one's event loop. The
    /// whole endpoint runs on the task awaiting this future.
    pub async fn serve(self, context: HttpContext<TcpTransport>) -> io::Result<()> {
        let context = Rc::new(RefCell::new(context));
        let mut connections = FuturesUnordered::new();

        loop {
            tokio::select! {
                accepted = self.inner.accept() => match accepted {
                    Ok((socket, remote)) => {
                        trace!(%remote, "accepted connection");
                        if self.options.nodelay {
                            let _ = socket.set_nodelay(true);
                        }
                        connections.push(drive_connection(context.clone(), socket));
                    }
                    Err(e) => {
                        warn!(cause = %e, "failed to accept");
                    }
                },
                Some(()) = connections.next() => {}
            }
        }
    }
}

impl HttpContext<TcpTransport> {
    /// Binds `host:port` and serves this context on the calling task.
    pub async fn listen(
        self,
        host: &str,
        port: u16,
        options: ListenOptions,
    ) -> Result<(), ListenError> {
        let listener = Listener::bind(host, port, options).await?;
        listener.serve(self).await?;
        Ok(())
    }
}

/// Per-connection event loop: translates socket readiness into context
/// events until the connection closes or is upgraded away from HTTP.
async fn drive_connection(context: Rc<RefCell<HttpContext<TcpTransport>>>, socket: TcpStream) {
    let mut conn = context.borrow_mut().open(TcpTransport::new(socket));
    let mut upgraded: Option<Box<dyn SocketProtocol<TcpTransport>>> = None;
    let mut buf = vec![0u8; 16 * 1024];

    loop {
        if conn.stream.transport().is_closed() {
            break;
        }

        let interest = if conn.stream.has_pending() {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };
        let deadline = conn.stream.transport().deadline();

        let ready = tokio::select! {
            ready = conn.stream.transport().socket().ready(interest) => ready,
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                conn.stream.transport_mut().set_timeout(None);
                match upgraded.as_mut() {
                    Some(protocol) => protocol.on_timeout(&mut conn.stream),
                    None => context.borrow_mut().timeout(&mut conn),
                }
                continue;
            }
        };
        let ready = match ready {
            Ok(ready) => ready,
            Err(e) => {
                trace!(cause = %e, "socket poll error");
                conn.stream.transport_mut().close();
                break;
            }
        };

        if ready.is_readable() {
            match conn.stream.transport().socket().try_read(&mut buf) {
                Ok(0) => {
                    // peer FIN; no half-closed connections
                    match upgraded.as_mut() {
                        Some(protocol) => protocol.on_end(&mut conn.stream),
                        None => context.borrow_mut().end(&mut conn),
                    }
                    break;
                }
                Ok(n) => {
                    if let Some(protocol) = upgraded.as_mut() {
                        protocol.on_data(&mut conn.stream, &buf[..n]);
                    } else {
                        match context.borrow_mut().data(&mut conn, &buf[..n]) {
                            DataOutcome::Continue => {}
                            DataOutcome::Closed => break,
                            DataOutcome::Upgraded(mut protocol) => {
                                trace!("connection left the http context via upgrade");
                                let leftover = conn.inbound.split();
                                if !leftover.is_empty() {
                                    protocol.on_data(&mut conn.stream, leftover.as_ref());
                                }
                                upgraded = Some(protocol);
                            }
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => {
                    trace!(cause = %e, "read error");
                    conn.stream.transport_mut().close();
                    break;
                }
            }
        }

        if ready.is_writable() && conn.stream.has_pending() && !conn.stream.transport().is_closed()
        {
            match upgraded.as_mut() {
                Some(protocol) => protocol.on_writable(&mut conn.stream),
                None => context.borrow_mut().writable(&mut conn),
            }
        }
    }

    match upgraded.as_mut() {
        Some(protocol) => protocol.on_close(),
        None => context.borrow_mut().close(&mut conn),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::time::timeout;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    async fn read_response(client: &mut TcpStream) -> String {
        let mut collected = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = timeout(Duration::from_secs(5), client.read(&mut buf))
                .await
                .expect("read timed out")
                .unwrap_or(0);
            if n == 0 {
                break;
            }
            collected.extend_from_slice(&buf[..n]);
            if body_complete(&collected) {
                break;
            }
        }
        String::from_utf8_lossy(&collected).into_owned()
    }

    fn body_complete(raw: &[u8]) -> bool {
        let Some(head_end) = raw.windows(4).position(|w| w == b"\r\n\r\n") else {
            return false;
        };
        let head = String::from_utf8_lossy(&raw[..head_end + 4]).to_ascii_lowercase();
        let Some(length) = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
        else {
            return true;
        };
        raw.len() >= head_end + 4 + length
    }

    #[tokio::test]
    async fn hello_round_trip_over_loopback() {
        init_tracing();
        let mut ctx = HttpContext::new();
        ctx.on_http("GET", "/hello", |res, _req| res.end(b"hello"));

        let listener = Listener::bind("127.0.0.1", 0, ListenOptions::default()).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = async move {
            let mut client = TcpStream::connect(addr).await.unwrap();
            client
                .write_all(b"GET /hello HTTP/1.1\r\nHost: localhost\r\n\r\n")
                .await
                .unwrap();
            let response = read_response(&mut client).await;
            assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
            assert!(response.ends_with("hello"));
        };

        tokio::select! {
            _ = listener.serve(ctx) => unreachable!("serve returned"),
            _ = client => {}
        }
    }

    #[tokio::test]
    async fn keep_alive_round_trips_twice() {
        init_tracing();
        let mut ctx = HttpContext::new();
        ctx.on_http("GET", "/count", |res, _req| res.end(b"tick"));

        let listener = Listener::bind("127.0.0.1", 0, ListenOptions::default()).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = async move {
            let mut client = TcpStream::connect(addr).await.unwrap();
            for _ in 0..2 {
                client
                    .write_all(b"GET /count HTTP/1.1\r\nHost: localhost\r\n\r\n")
                    .await
                    .unwrap();
                let response = read_response(&mut client).await;
                assert!(response.ends_with("tick"));
            }
        };

        tokio::select! {
            _ = listener.serve(ctx) => unreachable!("serve returned"),
            _ = client => {}
        }
    }

    #[tokio::test]
    async fn pipelined_requests_get_the_connection_dropped() {
        init_tracing();
        let mut ctx = HttpContext::new();
        ctx.on_http("GET", "/slow", |res, _req| {
            res.on_aborted(|| {});
        });

        let listener = Listener::bind("127.0.0.1", 0, ListenOptions::default()).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = async move {
            let mut client = TcpStream::connect(addr).await.unwrap();
            client
                .write_all(b"GET /slow HTTP/1.1\r\n\r\nGET /slow HTTP/1.1\r\n\r\n")
                .await
                .unwrap();
            // abortive close: either EOF or a reset, never a response
            let mut buf = [0u8; 64];
            let outcome = timeout(Duration::from_secs(5), client.read(&mut buf))
                .await
                .expect("read timed out");
            match outcome {
                Ok(n) => assert_eq!(n, 0),
                Err(e) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
            }
        };

        tokio::select! {
            _ = listener.serve(ctx) => unreachable!("serve returned"),
            _ = client => {}
        }
    }
}
