//! The HTTP connection context: the junction of the parser, the
//! per-connection state machine, the router and the cork/uncork write
//! discipline.
//!
//! A context owns the route table and the handler chains for one listening
//! endpoint and is driven by socket events: `open`, `data`, `writable`,
//! `end`, `timeout` and `close`. The event source is usually the tokio
//! binding in [`crate::server`], but anything that owns a [`Transport`] can
//! drive a context directly, which is also how the state-machine tests
//! work.
//!
//! Everything here is strictly single-threaded: handlers are move-only
//! `FnMut` boxes invoked in registration order, and a context never crosses
//! threads.

use std::time::Duration;

use http::Method;
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::codec::HttpFrame;
use crate::connection::{Connection, SocketProtocol, TlsConfig, Transport};
use crate::protocol::{HttpRequest, HttpResponse, RequestHead, ResponseState};
use crate::router::{RouteMethod, Router};

/// Maximum delay without forward progress before a connection is
/// force-closed (slow client protection).
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection lifecycle hook; receives `+1` on open and `-1` on close.
pub type FilterHandler<T> = Box<dyn FnMut(&mut HttpResponse<'_, T>, i32)>;

/// Pre-routing hook, invoked for every parsed request before the router.
pub type MiddlewareHandler<T> =
    Box<dyn FnMut(&mut HttpResponse<'_, T>, &mut HttpRequest<'_>)>;

/// How a data event left the connection.
pub enum DataOutcome<T: Transport> {
    /// The connection keeps belonging to the HTTP context.
    Continue,
    /// The connection is gone; close processing already ran.
    Closed,
    /// A handler upgraded the connection; deliver all further events to
    /// the returned protocol.
    Upgraded(Box<dyn SocketProtocol<T>>),
}

/// The per-endpoint HTTP context.
pub struct HttpContext<T: Transport> {
    router: Router<T>,
    filters: Vec<FilterHandler<T>>,
    middlewares: Vec<MiddlewareHandler<T>>,
    tls: Option<TlsConfig>,
}

impl<T: Transport> Default for HttpContext<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Transport> HttpContext<T> {
    /// Creates a plain (non-TLS) context.
    pub fn new() -> Self {
        Self { router: Router::new(), filters: Vec::new(), middlewares: Vec::new(), tls: None }
    }

    /// Creates the secure variant. The configuration is forwarded to the
    /// transport layer; the context logic itself is identical.
    pub fn with_tls(tls: TlsConfig) -> Self {
        Self { tls: Some(tls), ..Self::new() }
    }

    pub fn is_secure(&self) -> bool {
        self.tls.is_some()
    }

    pub fn tls(&self) -> Option<&TlsConfig> {
        self.tls.as_ref()
    }

    /// Appends a connection lifecycle filter. Filters run in registration
    /// order with `+1` when a connection opens and `-1` when it closes;
    /// connections already open at registration time are not replayed.
    pub fn filter(&mut self, f: impl FnMut(&mut HttpResponse<'_, T>, i32) + 'static) -> &mut Self {
        self.filters.push(Box::new(f));
        self
    }

    /// Appends a pre-routing middleware, invoked in registration order for
    /// every request before the router runs. Middleware may mutate the
    /// request or accumulate side effects but must not produce the
    /// response.
    pub fn middleware(
        &mut self,
        f: impl FnMut(&mut HttpResponse<'_, T>, &mut HttpRequest<'_>) + 'static,
    ) -> &mut Self {
        self.middlewares.push(Box::new(f));
        self
    }

    /// Registers a route. `method` is matched case-sensitively against the
    /// request method; `"*"` registers the route for the any-method second
    /// pass. Handlers may call [`HttpRequest::set_yield`] to let the scan
    /// continue past them.
    ///
    /// # Panics
    ///
    /// Panics if `method` is not a valid HTTP method token.
    pub fn on_http(
        &mut self,
        method: &str,
        pattern: &str,
        handler: impl FnMut(&mut HttpResponse<'_, T>, &mut HttpRequest<'_>) + 'static,
    ) -> &mut Self {
        let method = if method == "*" {
            RouteMethod::Any
        } else {
            RouteMethod::Exact(Method::from_bytes(method.as_bytes()).expect("invalid http method"))
        };
        self.router.add(method, pattern, Box::new(handler));
        self
    }

    /// Socket opened: arm the idle timer, build the per-connection state
    /// and announce the connection to the filter chain.
    pub fn open(&mut self, transport: T) -> Connection<T> {
        let mut conn = Connection::new(transport);
        conn.stream.transport_mut().set_timeout(Some(IDLE_TIMEOUT));
        let mut res = HttpResponse::new(&mut conn.stream, &mut conn.http);
        for filter in &mut self.filters {
            filter(&mut res, 1);
        }
        conn
    }

    /// Inbound bytes. Corks the stream, runs the parser over the
    /// accumulated buffer and dispatches whatever it produces; every exit
    /// either uncorks this stream or hands the corked state to the
    /// upgraded protocol.
    pub fn data(&mut self, conn: &mut Connection<T>, input: &[u8]) -> DataOutcome<T> {
        // a shut-down socket no longer accepts requests
        if conn.stream.transport().is_shut_down() {
            return DataOutcome::Continue;
        }

        conn.stream.cork();
        conn.inbound.extend_from_slice(input);

        let mut gone = false;
        loop {
            let frame = match conn.parser.decode(&mut conn.inbound) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    trace!(cause = %e, "parse failure, closing connection");
                    self.force_close(conn);
                    gone = true;
                    break;
                }
            };
            let keep_going = match frame {
                HttpFrame::Head(head) => self.dispatch(conn, &head),
                HttpFrame::Body(data) => self.deliver_chunk(conn, &data, false),
                HttpFrame::BodyDone => self.deliver_chunk(conn, &[], true),
            };
            if !keep_going {
                gone = true;
                break;
            }
        }

        if !gone {
            let (_, failed) = conn.stream.uncork();
            if failed {
                // could not flush everything; give on_writable a chance
                // within the idle limit
                conn.stream.transport_mut().set_timeout(Some(IDLE_TIMEOUT));
            }
            return DataOutcome::Continue;
        }

        // an upgrade and a close both abort parsing; the upgrade wins and
        // takes the corked output with it
        if let Some(protocol) = conn.http.pending_upgrade.take() {
            let _ = conn.stream.uncork();
            return DataOutcome::Upgraded(protocol);
        }
        DataOutcome::Closed
    }

    /// One parsed request head. Returns `false` when the connection is
    /// gone and parsing must stop.
    fn dispatch(&mut self, conn: &mut Connection<T>, head: &RequestHead) -> bool {
        // user code owns the timing contract from here on
        conn.stream.transport_mut().set_timeout(None);
        conn.http.offset = 0;

        // strictly one request at a time: a second head while a response
        // is pending is a pipelining violation
        if conn.http.flags.contains(ResponseState::RESPONSE_PENDING) {
            trace!("request arrived while a response is pending, closing");
            self.force_close(conn);
            return false;
        }
        conn.http.flags = ResponseState::RESPONSE_PENDING;

        let mut req = HttpRequest::new(head);
        let mut res = HttpResponse::new(&mut conn.stream, &mut conn.http);
        for middleware in &mut self.middlewares {
            middleware(&mut res, &mut req);
        }
        let routed = self.router.dispatch(false, &mut res, &mut req)
            || self.router.dispatch(true, &mut res, &mut req);
        if !routed {
            trace!(method = %head.method(), path = head.path(), "no route matched, closing");
            self.force_close(conn);
            return false;
        }

        // upgrade detection must precede close detection: an upgrade
        // replaces the socket identity
        if conn.http.pending_upgrade.is_some() {
            return false;
        }
        if conn.stream.transport().is_closed() {
            self.deliver_close(conn);
            return false;
        }
        if conn.stream.transport().is_shut_down() {
            return false;
        }

        let responded = conn.http.flags.contains(ResponseState::END_CALLED);
        if !responded && conn.http.on_aborted.is_none() {
            panic!(
                "route handler returned without responding and without installing an abort handler"
            );
        }
        if !responded && conn.http.in_stream.is_some() {
            // awaiting the request body: the client must deliver it within
            // the idle limit
            conn.stream.transport_mut().set_timeout(Some(IDLE_TIMEOUT));
        }
        true
    }

    /// One body chunk (or the terminal empty one). Returns `false` when
    /// the connection is gone.
    fn deliver_chunk(&mut self, conn: &mut Connection<T>, data: &[u8], is_final: bool) -> bool {
        let Some(mut sink) = conn.http.in_stream.take() else {
            return true;
        };

        if is_final {
            conn.stream.transport_mut().set_timeout(None);
        } else {
            conn.stream.transport_mut().set_timeout(Some(IDLE_TIMEOUT));
        }

        // the sink may respond from inside the callback
        let mut res = HttpResponse::new(&mut conn.stream, &mut conn.http);
        sink(&mut res, data, is_final);

        if conn.stream.transport().is_closed() {
            self.deliver_close(conn);
            return false;
        }
        if conn.stream.transport().is_shut_down() {
            return false;
        }

        if is_final {
            // never leak a body sink into the next request
            conn.http.in_stream = None;
        } else if conn.http.in_stream.is_none() {
            conn.http.in_stream = Some(sink);
        }
        true
    }

    /// Kernel writability. With `on_writable` installed the user drives
    /// progress; otherwise attempt a zero-byte drain and re-arm the idle
    /// timer.
    pub fn writable(&mut self, conn: &mut Connection<T>) {
        if conn.http.on_writable.is_some() {
            // the user takes over; hang the timer until they finish
            conn.stream.transport_mut().set_timeout(None);
            let mut callback = match conn.http.on_writable.take() {
                Some(callback) => callback,
                None => return,
            };
            let offset = conn.http.offset;
            let mut res = HttpResponse::new(&mut conn.stream, &mut conn.http);
            // `false` means the write failed; either way we neither drain
            // nor touch the timer again this event
            let _drained = callback(&mut res, offset);
            if conn.http.flags.contains(ResponseState::RESPONSE_PENDING)
                && conn.http.on_writable.is_none()
            {
                conn.http.on_writable = Some(callback);
            }
            return;
        }

        let _ = conn.stream.flush();
        conn.stream.transport_mut().set_timeout(Some(IDLE_TIMEOUT));
    }

    /// Peer sent FIN. Half-closed HTTP connections are not supported, so
    /// this is a force close.
    pub fn end(&mut self, conn: &mut Connection<T>) {
        self.force_close(conn);
    }

    /// Idle timer expired. Force close rather than shut down gracefully so
    /// a truncated response can never pass for a complete one.
    pub fn timeout(&mut self, conn: &mut Connection<T>) {
        trace!("idle timeout, closing connection");
        self.force_close(conn);
    }

    /// Connection teardown: `-1` through the filter chain, the abort
    /// callback if a request was in flight, then state cleanup. Safe to
    /// call more than once; later calls are no-ops.
    pub fn close(&mut self, conn: &mut Connection<T>) {
        conn.stream.transport_mut().close();
        self.deliver_close(conn);
    }

    fn force_close(&mut self, conn: &mut Connection<T>) {
        conn.stream.transport_mut().close();
        self.deliver_close(conn);
    }

    fn deliver_close(&mut self, conn: &mut Connection<T>) {
        if conn.close_delivered {
            return;
        }
        conn.close_delivered = true;

        {
            let mut res = HttpResponse::new(&mut conn.stream, &mut conn.http);
            for filter in &mut self.filters {
                filter(&mut res, -1);
            }
        }
        if let Some(on_aborted) = conn.http.on_aborted.take() {
            on_aborted();
        }
        conn.http.in_stream = None;
        conn.http.on_writable = None;
    }
}
