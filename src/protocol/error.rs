//! Error types for HTTP request parsing.
//!
//! Parse failures never surface to handlers: the connection context reacts
//! to any [`ParseError`] by force-closing the connection. The type still
//! carries enough detail to be useful in traces and in codec tests.

use std::io;
use thiserror::Error;

/// Errors produced while decoding an HTTP/1.1 request stream.
#[derive(Error, Debug)]
pub enum ParseError {
    /// Request head exceeds the maximum allowed size
    #[error("request head too large: {size} exceeds the {limit} byte limit")]
    HeadTooLarge { size: usize, limit: usize },

    /// Number of header fields exceeds the maximum allowed
    #[error("too many headers: limit is {limit}")]
    TooManyHeaders { limit: usize },

    /// Malformed request line or header field
    #[error("invalid request head: {reason}")]
    InvalidHead { reason: String },

    /// HTTP version other than 1.0 or 1.1
    #[error("unsupported http version")]
    UnsupportedVersion,

    /// Invalid Content-Length header
    #[error("invalid content-length: {reason}")]
    InvalidContentLength { reason: String },

    /// Malformed chunked transfer encoding
    #[error("invalid chunked framing: {reason}")]
    InvalidChunk { reason: String },

    /// Transfer-Encoding and Content-Length both present
    #[error("conflicting transfer-encoding and content-length")]
    ConflictingFraming,

    /// I/O error surfaced through the decoder interface
    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ParseError {
    /// Creates a new InvalidHead error
    pub fn invalid_head<S: ToString>(reason: S) -> Self {
        Self::InvalidHead { reason: reason.to_string() }
    }

    /// Creates a new InvalidContentLength error
    pub fn invalid_content_length<S: ToString>(reason: S) -> Self {
        Self::InvalidContentLength { reason: reason.to_string() }
    }

    /// Creates a new InvalidChunk error
    pub fn invalid_chunk<S: ToString>(reason: S) -> Self {
        Self::InvalidChunk { reason: reason.to_string() }
    }
}
