//! Pattern routing with handler fallthrough.
//!
//! Routes map `(method, pattern)` to a handler. Patterns are made of
//! literal segments, `:name` parameters (one non-empty segment each) and a
//! trailing `*` catch-all. There is no specificity ranking: candidates are
//! scanned in registration order and the first handler that does not yield
//! wins. A handler yields by calling [`HttpRequest::set_yield`], which makes
//! the scan continue as if the handler had not matched at all.
//!
//! Dispatch runs in two passes, driven by the connection context: first the
//! request's exact method, then (only when nothing matched) the `*`
//! pseudo-method under which wildcard-method routes are registered.

use http::Method;

use crate::connection::Transport;
use crate::protocol::{HttpRequest, HttpResponse};

/// Boxed route handler; single-owner, invoked in registration order.
pub type RouteHandler<T> =
    Box<dyn FnMut(&mut HttpResponse<'_, T>, &mut HttpRequest<'_>)>;

/// Which pass a route participates in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RouteMethod {
    /// Matches the request method exactly; first pass.
    Exact(Method),
    /// Registered as `*`; matched only in the second pass.
    Any,
}

enum Segment {
    Literal(String),
    Param(String),
    Wildcard,
}

struct Pattern {
    segments: Vec<Segment>,
}

impl Pattern {
    fn parse(pattern: &str) -> Self {
        let segments = pattern
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| {
                if s == "*" {
                    Segment::Wildcard
                } else if let Some(name) = s.strip_prefix(':') {
                    Segment::Param(name.to_string())
                } else {
                    Segment::Literal(s.to_string())
                }
            })
            .collect();
        Self { segments }
    }

    /// Matches `path` against the pattern, pushing parameter captures in
    /// pattern order. `params` is cleared first.
    fn matches<'h>(&self, path: &'h str, params: &mut Vec<&'h str>) -> bool {
        params.clear();
        let mut path_segments = path.split('/').filter(|s| !s.is_empty());
        for segment in &self.segments {
            match segment {
                Segment::Wildcard => return true,
                Segment::Literal(literal) => match path_segments.next() {
                    Some(s) if s == literal => {}
                    _ => return false,
                },
                Segment::Param(_) => match path_segments.next() {
                    Some(s) => params.push(s),
                    None => return false,
                },
            }
        }
        path_segments.next().is_none()
    }
}

struct Route<T: Transport> {
    method: RouteMethod,
    pattern: Pattern,
    handler: RouteHandler<T>,
}

/// Ordered route table for one connection context.
pub struct Router<T: Transport> {
    routes: Vec<Route<T>>,
}

impl<T: Transport> Router<T> {
    pub(crate) fn new() -> Self {
        Self { routes: Vec::new() }
    }

    pub(crate) fn add(&mut self, method: RouteMethod, pattern: &str, handler: RouteHandler<T>) {
        self.routes.push(Route { method, pattern: Pattern::parse(pattern), handler });
    }

    /// One dispatch pass. Resets the yield flag and attaches parameter
    /// views before each candidate handler; returns whether some handler
    /// accepted the request.
    pub(crate) fn dispatch(
        &mut self,
        any_pass: bool,
        res: &mut HttpResponse<'_, T>,
        req: &mut HttpRequest<'_>,
    ) -> bool {
        let mut params = Vec::new();
        for route in &mut self.routes {
            let method_matches = match &route.method {
                RouteMethod::Any => any_pass,
                RouteMethod::Exact(method) => !any_pass && method == req.method(),
            };
            if !method_matches || !route.pattern.matches(req.url(), &mut params) {
                continue;
            }
            req.set_yield(false);
            req.set_parameters(params.clone());
            (route.handler)(res, req);
            if !req.yielded() {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn captures<'h>(pattern: &str, path: &'h str) -> Option<Vec<&'h str>> {
        let mut params = Vec::new();
        Pattern::parse(pattern).matches(path, &mut params).then_some(params)
    }

    #[test]
    fn literal_patterns() {
        assert_eq!(captures("/hello", "/hello"), Some(vec![]));
        assert_eq!(captures("/hello", "/hello/"), Some(vec![]));
        assert_eq!(captures("/hello", "/nope"), None);
        assert_eq!(captures("/hello", "/hello/more"), None);
        assert_eq!(captures("/", "/"), Some(vec![]));
        assert_eq!(captures("/", "/x"), None);
    }

    #[test]
    fn parameter_patterns() {
        assert_eq!(captures("/:a/:b", "/x/y"), Some(vec!["x", "y"]));
        assert_eq!(captures("/users/:id", "/users/17"), Some(vec!["17"]));
        assert_eq!(captures("/users/:id", "/users"), None);
        assert_eq!(captures("/users/:id", "/users/17/posts"), None);
    }

    #[test]
    fn wildcard_patterns() {
        assert_eq!(captures("/*", "/"), Some(vec![]));
        assert_eq!(captures("/*", "/anything/at/all"), Some(vec![]));
        assert_eq!(captures("/static/*", "/static/css/app.css"), Some(vec![]));
        assert_eq!(captures("/static/*", "/other"), None);
    }

    #[test]
    fn mixed_pattern_captures_in_order() {
        assert_eq!(captures("/api/:version/users/:id", "/api/v2/users/9"), Some(vec!["v2", "9"]));
    }
}
