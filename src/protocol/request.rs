//! Parsed request head and the per-dispatch request view.
//!
//! [`RequestHead`] is the owned result of head parsing; it wraps the
//! standard `http::Request` type. [`HttpRequest`] is the short-lived view a
//! handler receives: it borrows the head and additionally carries the route
//! parameters and the yield flag used for router fallthrough.

use http::request::Parts;
use http::{HeaderMap, Method, Request, Uri, Version};

/// A fully parsed HTTP request head (request line plus header fields).
#[derive(Debug)]
pub struct RequestHead {
    inner: Request<()>,
}

impl RequestHead {
    pub(crate) fn new(inner: Request<()>) -> Self {
        Self { inner }
    }

    /// Returns the request's HTTP method.
    pub fn method(&self) -> &Method {
        self.inner.method()
    }

    /// Returns the request's URI.
    pub fn uri(&self) -> &Uri {
        self.inner.uri()
    }

    /// Returns the path portion of the request target.
    pub fn path(&self) -> &str {
        self.inner.uri().path()
    }

    /// Returns the query portion of the request target, if any.
    pub fn query(&self) -> Option<&str> {
        self.inner.uri().query()
    }

    /// Returns the request's HTTP version.
    pub fn version(&self) -> Version {
        self.inner.version()
    }

    /// Returns the request's header fields.
    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }
}

impl From<Parts> for RequestHead {
    #[inline]
    fn from(parts: Parts) -> Self {
        Self { inner: Request::from_parts(parts, ()) }
    }
}

impl From<Request<()>> for RequestHead {
    #[inline]
    fn from(inner: Request<()>) -> Self {
        Self { inner }
    }
}

/// The routed view of a request, handed to middleware and route handlers.
///
/// Route parameter views borrow the parsed head and are only valid for the
/// duration of the dispatch; they must not be stored past the handler
/// invocation.
pub struct HttpRequest<'h> {
    head: &'h RequestHead,
    params: Vec<&'h str>,
    yielded: bool,
}

impl<'h> HttpRequest<'h> {
    pub(crate) fn new(head: &'h RequestHead) -> Self {
        Self { head, params: Vec::new(), yielded: false }
    }

    /// Returns the request's HTTP method.
    pub fn method(&self) -> &'h Method {
        self.head.method()
    }

    /// Returns the path of the request target, e.g. `/users/17`.
    pub fn url(&self) -> &'h str {
        self.head.path()
    }

    /// Returns the query string of the request target, if any.
    pub fn query(&self) -> Option<&'h str> {
        self.head.query()
    }

    /// Returns the request's HTTP version.
    pub fn version(&self) -> Version {
        self.head.version()
    }

    /// Returns the value of the given header as a string, if present and
    /// valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&'h str> {
        self.head.headers().get(name).and_then(|value| value.to_str().ok())
    }

    /// Returns the request's header fields.
    pub fn headers(&self) -> &'h HeaderMap {
        self.head.headers()
    }

    /// Returns the route parameter captured at `index`, in pattern order.
    ///
    /// For a route `/:user/:post` matched against `/alice/42`,
    /// `parameter(0)` is `alice` and `parameter(1)` is `42`.
    pub fn parameter(&self, index: usize) -> Option<&'h str> {
        self.params.get(index).copied()
    }

    /// Marks the current route handler as yielded: the router keeps
    /// scanning as if this handler had not matched.
    pub fn set_yield(&mut self, yielded: bool) {
        self.yielded = yielded;
    }

    /// Whether the current handler yielded the request.
    pub fn yielded(&self) -> bool {
        self.yielded
    }

    pub(crate) fn set_parameters(&mut self, params: Vec<&'h str>) {
        self.params = params;
    }
}
