//! Incremental HTTP/1.1 request decoding.
//!
//! [`RequestParser`] is the per-connection parser: fed the raw inbound byte
//! stream, it emits one [`HttpFrame::Head`] per request, the request's body
//! as zero or more [`HttpFrame::Body`] chunks, and always a terminal
//! [`HttpFrame::BodyDone`] (even when the body is empty) before moving on
//! to the next pipelined request. It decodes from its caller's `BytesMut`
//! accumulation buffer and needs no padded input.

mod body;
mod head;

pub(crate) use body::{PayloadDecoder, PayloadItem};
pub(crate) use head::{MAX_HEADERS, MAX_HEAD_BYTES};

use bytes::{Bytes, BytesMut};
use tokio_util::codec::Decoder;

use crate::protocol::{ParseError, RequestHead};

/// One event decoded from the request stream.
#[derive(Debug)]
pub enum HttpFrame {
    /// A complete request head.
    Head(RequestHead),
    /// A chunk of the current request's body.
    Body(Bytes),
    /// The current request's body is complete (possibly empty).
    BodyDone,
}

/// Streaming request parser; alternates between decoding a head and
/// draining the payload that head announced.
pub struct RequestParser {
    payload: Option<PayloadDecoder>,
}

impl RequestParser {
    pub fn new() -> Self {
        Self { payload: None }
    }
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for RequestParser {
    type Item = HttpFrame;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<HttpFrame>, ParseError> {
        if let Some(payload) = &mut self.payload {
            return Ok(match payload.decode(src)? {
                Some(PayloadItem::Chunk(data)) => Some(HttpFrame::Body(data)),
                Some(PayloadItem::Done) => {
                    self.payload = None;
                    Some(HttpFrame::BodyDone)
                }
                None => None,
            });
        }

        match head::decode_head(src)? {
            Some((head, payload)) => {
                self.payload = Some(payload);
                Ok(Some(HttpFrame::Head(head)))
            }
            None => Ok(None),
        }
    }
}
