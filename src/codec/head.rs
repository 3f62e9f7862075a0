use bytes::{Buf, BytesMut};
use http::{HeaderName, HeaderValue, Request, Version};
use tracing::trace;

use crate::ensure;
use crate::protocol::{ParseError, RequestHead};

use super::body::PayloadDecoder;

pub(crate) const MAX_HEAD_BYTES: usize = 8 * 1024;
pub(crate) const MAX_HEADERS: usize = 64;

/// Attempts to decode one request head from the front of `src`.
///
/// Consumes the head bytes on success and returns the parsed head together
/// with the payload decoder its framing headers call for. Returns `None`
/// when the head is still incomplete.
pub(super) fn decode_head(
    src: &mut BytesMut,
) -> Result<Option<(RequestHead, PayloadDecoder)>, ParseError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Request::new(&mut headers);

    let status = parsed.parse(src.as_ref()).map_err(|e| match e {
        httparse::Error::TooManyHeaders => ParseError::TooManyHeaders { limit: MAX_HEADERS },
        e => ParseError::invalid_head(e.to_string()),
    })?;

    let head_len = match status {
        httparse::Status::Complete(len) => len,
        httparse::Status::Partial => {
            ensure!(
                src.len() <= MAX_HEAD_BYTES,
                ParseError::HeadTooLarge { size: src.len(), limit: MAX_HEAD_BYTES }
            );
            return Ok(None);
        }
    };
    ensure!(
        head_len <= MAX_HEAD_BYTES,
        ParseError::HeadTooLarge { size: head_len, limit: MAX_HEAD_BYTES }
    );

    let version = match parsed.version {
        Some(1) => Version::HTTP_11,
        Some(0) => Version::HTTP_10,
        _ => return Err(ParseError::UnsupportedVersion),
    };

    let mut builder = Request::builder()
        .method(parsed.method.ok_or_else(|| ParseError::invalid_head("missing method"))?)
        .uri(parsed.path.ok_or_else(|| ParseError::invalid_head("missing request target"))?)
        .version(version);

    if let Some(map) = builder.headers_mut() {
        map.reserve(parsed.headers.len());
        for field in parsed.headers.iter() {
            let name = HeaderName::from_bytes(field.name.as_bytes())
                .map_err(|e| ParseError::invalid_head(e.to_string()))?;
            let value = HeaderValue::from_bytes(field.value)
                .map_err(|e| ParseError::invalid_head(e.to_string()))?;
            map.append(name, value);
        }
    }

    let head = RequestHead::new(
        builder.body(()).map_err(|e| ParseError::invalid_head(e.to_string()))?,
    );
    src.advance(head_len);
    trace!(head_len, method = %head.method(), path = head.path(), "decoded request head");

    let payload = PayloadDecoder::for_head(&head)?;
    Ok(Some((head, payload)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;
    use indoc::indoc;

    #[test]
    fn simple_get() {
        let raw = indoc! {r"
        GET /index.html HTTP/1.1
        Host: 127.0.0.1:8080
        Accept: */*

        "};
        let mut src = BytesMut::from(raw);

        let (head, payload) = decode_head(&mut src).unwrap().unwrap();
        assert!(payload.is_empty());
        assert_eq!(head.method(), &Method::GET);
        assert_eq!(head.path(), "/index.html");
        assert_eq!(head.version(), Version::HTTP_11);
        assert_eq!(head.headers().len(), 2);
        assert_eq!(head.headers().get("host").unwrap(), "127.0.0.1:8080");
        assert!(src.is_empty());
    }

    #[test]
    fn head_bytes_are_consumed_but_body_is_left() {
        let raw = indoc! {r"
        POST /submit HTTP/1.1
        Content-Length: 3

        abc"};
        let mut src = BytesMut::from(raw);

        let (head, payload) = decode_head(&mut src).unwrap().unwrap();
        assert_eq!(head.method(), &Method::POST);
        assert!(!payload.is_empty());
        assert_eq!(src.as_ref(), b"abc");
    }

    #[test]
    fn partial_head_returns_none() {
        let mut src = BytesMut::from("GET /partial HTTP/1.1\r\nHost: x");
        assert!(decode_head(&mut src).unwrap().is_none());
        assert_eq!(src.len(), 30);
    }

    #[test]
    fn oversized_partial_head_is_rejected() {
        let mut src = BytesMut::from(&b"GET /a HTTP/1.1\r\n"[..]);
        let filler = format!("x-filler: {}\r\n", "a".repeat(MAX_HEAD_BYTES));
        src.extend_from_slice(filler.as_bytes());
        assert!(matches!(
            decode_head(&mut src),
            Err(ParseError::HeadTooLarge { .. })
        ));
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let mut src = BytesMut::from("GET / HTTP/0.9\r\n\r\n");
        assert!(decode_head(&mut src).is_err());
    }

    #[test]
    fn garbage_is_rejected() {
        let mut src = BytesMut::from("ab\0cd\r\n\r\n");
        assert!(matches!(decode_head(&mut src), Err(ParseError::InvalidHead { .. })));
    }

    #[test]
    fn query_is_preserved_on_the_uri() {
        let mut src = BytesMut::from("GET /search?q=cork&x=1 HTTP/1.1\r\n\r\n");
        let (head, _) = decode_head(&mut src).unwrap().unwrap();
        assert_eq!(head.path(), "/search");
        assert_eq!(head.query(), Some("q=cork&x=1"));
    }
}
