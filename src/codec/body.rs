//! Request payload framing.
//!
//! One [`PayloadDecoder`] is produced per request head and drains that
//! request's body from the inbound buffer: fixed Content-Length, chunked
//! transfer encoding, or nothing at all. Every request terminates with a
//! single [`PayloadItem::Done`], including bodiless ones, so the connection
//! layer always observes a final body event.

use bytes::{Buf, Bytes, BytesMut};
use http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};

use crate::protocol::{ParseError, RequestHead};

/// Longest accepted chunk-size line, digits plus extensions.
const MAX_CHUNK_LINE: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PayloadItem {
    Chunk(Bytes),
    Done,
}

#[derive(Debug)]
pub(crate) enum PayloadDecoder {
    Empty,
    Length { remaining: u64 },
    Chunked(ChunkState),
}

impl PayloadDecoder {
    /// Picks the framing for a parsed head per RFC 7230 §3.3: chunked
    /// Transfer-Encoding when `chunked` is the final encoding, otherwise
    /// Content-Length, otherwise no body. Both present is fatal.
    pub(crate) fn for_head(head: &RequestHead) -> Result<Self, ParseError> {
        let te = head.headers().get(TRANSFER_ENCODING);
        let cl = head.headers().get(CONTENT_LENGTH);

        match (te, cl) {
            (Some(_), Some(_)) => Err(ParseError::ConflictingFraming),
            (Some(te), None) => {
                let chunked = te
                    .to_str()
                    .ok()
                    .and_then(|encodings| encodings.rsplit(',').next())
                    .map(|last| last.trim().eq_ignore_ascii_case("chunked"))
                    .unwrap_or(false);
                if chunked {
                    Ok(Self::Chunked(ChunkState::Size))
                } else {
                    Ok(Self::Empty)
                }
            }
            (None, Some(cl)) => {
                let length = cl
                    .to_str()
                    .map_err(|_| ParseError::invalid_content_length("not visible ascii"))?
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| ParseError::invalid_content_length("not an unsigned integer"))?;
                Ok(Self::Length { remaining: length })
            }
            (None, None) => Ok(Self::Empty),
        }
    }

    /// Pulls the next payload item out of `src`, or `None` when more bytes
    /// are needed. After `Done` the decoder must not be polled again.
    pub(crate) fn decode(&mut self, src: &mut BytesMut) -> Result<Option<PayloadItem>, ParseError> {
        match self {
            Self::Empty => Ok(Some(PayloadItem::Done)),
            Self::Length { remaining } => {
                if *remaining == 0 {
                    return Ok(Some(PayloadItem::Done));
                }
                if src.is_empty() {
                    return Ok(None);
                }
                let take = (*remaining).min(src.len() as u64) as usize;
                *remaining -= take as u64;
                Ok(Some(PayloadItem::Chunk(src.split_to(take).freeze())))
            }
            Self::Chunked(state) => state.decode(src),
        }
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    #[cfg(test)]
    pub(crate) fn is_chunked(&self) -> bool {
        matches!(self, Self::Chunked(_))
    }
}

/// State machine for chunked transfer decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChunkState {
    /// Reading a `<hex-size>[;extensions]\r\n` line.
    Size,
    /// Reading chunk data.
    Data { remaining: u64 },
    /// Expecting the CRLF that terminates a data chunk.
    DataEnd,
    /// After the zero-size chunk: skipping trailers up to the blank line.
    Trailers,
}

impl ChunkState {
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<PayloadItem>, ParseError> {
        loop {
            match self {
                Self::Size => {
                    let Some(line_end) = find_line_end(src)? else {
                        return Ok(None);
                    };
                    let size = parse_chunk_size(&src[..line_end])?;
                    src.advance(line_end + 1);
                    *self = if size == 0 { Self::Trailers } else { Self::Data { remaining: size } };
                }
                Self::Data { remaining } => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    let take = (*remaining).min(src.len() as u64) as usize;
                    *remaining -= take as u64;
                    if *remaining == 0 {
                        *self = Self::DataEnd;
                    }
                    return Ok(Some(PayloadItem::Chunk(src.split_to(take).freeze())));
                }
                Self::DataEnd => {
                    if src.len() < 2 {
                        return Ok(None);
                    }
                    if &src[..2] != b"\r\n" {
                        return Err(ParseError::invalid_chunk("missing CRLF after chunk data"));
                    }
                    src.advance(2);
                    *self = Self::Size;
                }
                Self::Trailers => {
                    let Some(line_end) = find_line_end(src)? else {
                        return Ok(None);
                    };
                    let line = &src[..line_end];
                    let blank = line.is_empty() || line == b"\r";
                    src.advance(line_end + 1);
                    if blank {
                        return Ok(Some(PayloadItem::Done));
                    }
                }
            }
        }
    }
}

/// Index of the next LF, or `None` if the line is still incomplete.
fn find_line_end(src: &[u8]) -> Result<Option<usize>, ParseError> {
    match src.iter().position(|&b| b == b'\n') {
        Some(pos) => Ok(Some(pos)),
        None if src.len() > MAX_CHUNK_LINE => {
            Err(ParseError::invalid_chunk("chunk line too long"))
        }
        None => Ok(None),
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<u64, ParseError> {
    let digits = line
        .split(|&b| b == b';' || b == b'\r')
        .next()
        .unwrap_or_default();
    if digits.is_empty() || digits.len() > 16 {
        return Err(ParseError::invalid_chunk("bad chunk size"));
    }
    let mut size: u64 = 0;
    for &b in digits {
        let digit = match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'f' => b - b'a' + 10,
            b'A'..=b'F' => b - b'A' + 10,
            _ => return Err(ParseError::invalid_chunk("bad chunk size")),
        };
        size = size << 4 | u64::from(digit);
    }
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(decoder: &mut PayloadDecoder, src: &mut BytesMut) -> (Vec<u8>, bool) {
        let mut body = Vec::new();
        loop {
            match decoder.decode(src).unwrap() {
                Some(PayloadItem::Chunk(chunk)) => body.extend_from_slice(&chunk),
                Some(PayloadItem::Done) => return (body, true),
                None => return (body, false),
            }
        }
    }

    #[test]
    fn empty_decoder_finishes_immediately() {
        let mut decoder = PayloadDecoder::Empty;
        let mut src = BytesMut::new();
        assert_eq!(decoder.decode(&mut src).unwrap(), Some(PayloadItem::Done));
    }

    #[test]
    fn length_decoder_across_reads() {
        let mut decoder = PayloadDecoder::Length { remaining: 6 };
        let mut src = BytesMut::from("abc");
        let (body, done) = drain(&mut decoder, &mut src);
        assert_eq!(body, b"abc");
        assert!(!done);

        src.extend_from_slice(b"defGET /next");
        let (body, done) = drain(&mut decoder, &mut src);
        assert_eq!(body, b"def");
        assert!(done);
        assert_eq!(src.as_ref(), b"GET /next");
    }

    #[test]
    fn zero_length_is_done_without_input() {
        let mut decoder = PayloadDecoder::Length { remaining: 0 };
        let mut src = BytesMut::new();
        assert_eq!(decoder.decode(&mut src).unwrap(), Some(PayloadItem::Done));
    }

    #[test]
    fn chunked_round_trip() {
        let mut decoder = PayloadDecoder::Chunked(ChunkState::Size);
        let mut src = BytesMut::from("4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\nleftover");
        let (body, done) = drain(&mut decoder, &mut src);
        assert_eq!(body, b"Wikipedia");
        assert!(done);
        assert_eq!(src.as_ref(), b"leftover");
    }

    #[test]
    fn chunked_split_across_reads() {
        let mut decoder = PayloadDecoder::Chunked(ChunkState::Size);
        let mut src = BytesMut::from("6;ext=1\r\nab");
        let (body, done) = drain(&mut decoder, &mut src);
        assert_eq!(body, b"ab");
        assert!(!done);

        src.extend_from_slice(b"cdef\r\n0\r\n");
        let (body, done) = drain(&mut decoder, &mut src);
        assert_eq!(body, b"cdef");
        assert!(!done);

        src.extend_from_slice(b"\r\n");
        let (body, done) = drain(&mut decoder, &mut src);
        assert!(body.is_empty());
        assert!(done);
    }

    #[test]
    fn chunked_skips_trailers() {
        let mut decoder = PayloadDecoder::Chunked(ChunkState::Size);
        let mut src = BytesMut::from("1\r\nx\r\n0\r\nExpires: never\r\n\r\n");
        let (body, done) = drain(&mut decoder, &mut src);
        assert_eq!(body, b"x");
        assert!(done);
    }

    #[test]
    fn missing_chunk_crlf_is_fatal() {
        let mut decoder = PayloadDecoder::Chunked(ChunkState::Size);
        let mut src = BytesMut::from("2\r\nabXX");
        assert_eq!(
            decoder.decode(&mut src).unwrap(),
            Some(PayloadItem::Chunk(Bytes::from_static(b"ab")))
        );
        assert!(decoder.decode(&mut src).is_err());
    }

    #[test]
    fn bad_chunk_size_is_fatal() {
        let mut decoder = PayloadDecoder::Chunked(ChunkState::Size);
        let mut src = BytesMut::from("zz\r\n");
        assert!(decoder.decode(&mut src).is_err());
    }

    #[test]
    fn framing_selection() {
        use http::Request;
        let head = |builder: http::request::Builder| {
            RequestHead::from(builder.body(()).unwrap())
        };

        let plain = head(Request::builder().method("GET").uri("/"));
        assert!(PayloadDecoder::for_head(&plain).unwrap().is_empty());

        let sized = head(Request::builder().method("POST").uri("/").header("content-length", "12"));
        assert!(matches!(
            PayloadDecoder::for_head(&sized).unwrap(),
            PayloadDecoder::Length { remaining: 12 }
        ));

        let chunked = head(
            Request::builder().method("POST").uri("/").header("transfer-encoding", "gzip, chunked"),
        );
        assert!(PayloadDecoder::for_head(&chunked).unwrap().is_chunked());

        let not_last = head(
            Request::builder().method("POST").uri("/").header("transfer-encoding", "chunked, gzip"),
        );
        assert!(PayloadDecoder::for_head(&not_last).unwrap().is_empty());

        let both = head(
            Request::builder()
                .method("POST")
                .uri("/")
                .header("transfer-encoding", "chunked")
                .header("content-length", "3"),
        );
        assert!(matches!(
            PayloadDecoder::for_head(&both),
            Err(ParseError::ConflictingFraming)
        ));

        let bad_cl = head(Request::builder().method("POST").uri("/").header("content-length", "x"));
        assert!(PayloadDecoder::for_head(&bad_cl).is_err());
    }
}
