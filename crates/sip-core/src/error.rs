//! Error types for the sip-core crate.

use thiserror::Error;

/// Errors produced while parsing or building SIP messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Generic parse failure with context.
    #[error("parse error: {0}")]
    ParseError(String),

    /// The start line was neither a valid request line nor a status line.
    #[error("invalid start line: {0}")]
    InvalidStartLine(String),

    /// A numeric status code outside 100..=699.
    #[error("invalid status code: {0}")]
    InvalidStatusCode(u16),

    /// Method token could not be recognized or was empty.
    #[error("invalid method: {0}")]
    InvalidMethod(String),

    /// A URI failed to parse.
    #[error("invalid URI: {0}")]
    InvalidUri(String),

    /// A single header line failed to parse.
    #[error("invalid header {name}: {message}")]
    InvalidHeader { name: String, message: String },

    /// One of To, From, CSeq, Call-ID was absent.
    #[error("missing mandatory header: {0}")]
    MissingHeader(&'static str),

    /// Body length disagrees with Content-Length beyond the tolerated skew.
    #[error("body length {actual} does not match Content-Length {declared}")]
    BodyLengthMismatch { declared: usize, actual: usize },

    /// Input was not valid UTF-8 where text was required.
    #[error("invalid UTF-8 in message")]
    InvalidUtf8,
}

impl From<std::str::Utf8Error> for Error {
    fn from(_: std::str::Utf8Error) -> Self {
        Error::InvalidUtf8
    }
}

pub type Result<T> = std::result::Result<T, Error>;
