//! Full SIP message parsing and serialization (RFC 3261 Section 7).

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{Error, Result};
use crate::types::header::{Header, HeaderValue};
use crate::types::header_name::HeaderName;
use crate::types::method::Method;
use crate::types::status::StatusCode;
use crate::types::uri::Uri;
use crate::types::version::Version;
use crate::types::via::Via;

/// Trailing-CRLF slop tolerated between Content-Length and the actual
/// body. A compatibility allowance, not a protocol guarantee.
const BODY_LENGTH_TOLERANCE: usize = 2;

/// Request line or status line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartLine {
    Request {
        method: Method,
        uri: Uri,
        version: Version,
    },
    Response {
        version: Version,
        status: StatusCode,
        reason: String,
    },
}

/// A parsed SIP request or response.
///
/// Headers are kept as an ordered list; a name may repeat (Via, Route).
/// `header_errors` records per-header parse failures that did not abort
/// the message (see the error-handling policy: a bad optional header must
/// not take the whole datagram down with it).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SipMessage {
    pub start_line: StartLine,
    pub headers: Vec<Header>,
    pub body: Bytes,
    #[serde(skip)]
    pub header_errors: Vec<String>,
}

impl SipMessage {
    /// A new request with empty headers and body.
    pub fn new_request(method: Method, uri: Uri) -> Self {
        SipMessage {
            start_line: StartLine::Request {
                method,
                uri,
                version: Version::SIP_2_0,
            },
            headers: Vec::new(),
            body: Bytes::new(),
            header_errors: Vec::new(),
        }
    }

    /// A new response with the canonical reason phrase.
    pub fn new_response(status: StatusCode) -> Self {
        SipMessage {
            start_line: StartLine::Response {
                version: Version::SIP_2_0,
                status,
                reason: status.canonical_reason().to_string(),
            },
            headers: Vec::new(),
            body: Bytes::new(),
            header_errors: Vec::new(),
        }
    }

    /// Build a response to `request` per RFC 3261 Section 8.2.6: Via, To,
    /// From, Call-ID and CSeq are deep-copied across.
    pub fn response_to(request: &SipMessage, status: StatusCode) -> SipMessage {
        let mut response = SipMessage::new_response(status);
        for name in [
            HeaderName::Via,
            HeaderName::To,
            HeaderName::From,
            HeaderName::CallId,
            HeaderName::CSeq,
        ] {
            for header in request.headers_named(&name) {
                response.headers.push(header.clone());
            }
        }
        response
    }

    pub fn is_request(&self) -> bool {
        matches!(self.start_line, StartLine::Request { .. })
    }

    /// Request method, or for responses the method echoed in CSeq.
    pub fn method(&self) -> Option<Method> {
        match &self.start_line {
            StartLine::Request { method, .. } => Some(method.clone()),
            StartLine::Response { .. } => self.cseq().map(|(_, m)| m),
        }
    }

    pub fn request_uri(&self) -> Option<&Uri> {
        match &self.start_line {
            StartLine::Request { uri, .. } => Some(uri),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match &self.start_line {
            StartLine::Response { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_provisional(&self) -> bool {
        self.status().is_some_and(|s| s.is_provisional())
    }

    pub fn is_success(&self) -> bool {
        self.status().is_some_and(|s| s.is_success())
    }

    pub fn is_final(&self) -> bool {
        self.status().is_some_and(|s| s.is_final())
    }

    /// First header with this name.
    pub fn header(&self, name: &HeaderName) -> Option<&Header> {
        self.headers.iter().find(|h| &h.name == name)
    }

    pub fn header_mut(&mut self, name: &HeaderName) -> Option<&mut Header> {
        self.headers.iter_mut().find(|h| &h.name == name)
    }

    /// All headers with this name, in insertion order.
    pub fn headers_named(&self, name: &HeaderName) -> Vec<&Header> {
        self.headers.iter().filter(|h| &h.name == name).collect()
    }

    pub fn push_header(&mut self, header: Header) {
        self.headers.push(header);
    }

    /// Insert a Via on top (first position), as a new hop must.
    pub fn push_via_front(&mut self, via: Via) {
        self.headers.insert(0, Header::via(via));
    }

    pub fn remove_headers(&mut self, name: &HeaderName) {
        self.headers.retain(|h| &h.name != name);
    }

    /// Topmost Via, if any.
    pub fn via_top(&self) -> Option<&Via> {
        self.header(&HeaderName::Via).and_then(|h| h.as_via())
    }

    pub fn to_header(&self) -> Option<&Header> {
        self.header(&HeaderName::To)
    }

    pub fn from_header(&self) -> Option<&Header> {
        self.header(&HeaderName::From)
    }

    pub fn call_id(&self) -> Option<String> {
        self.header(&HeaderName::CallId)
            .and_then(|h| h.as_raw())
            .map(|s| s.to_string())
    }

    pub fn cseq(&self) -> Option<(u32, Method)> {
        match self.header(&HeaderName::CSeq).map(|h| &h.value) {
            Some(HeaderValue::CSeq { seq, method }) => Some((*seq, method.clone())),
            _ => None,
        }
    }

    pub fn to_tag(&self) -> Option<String> {
        self.to_header().and_then(|h| h.tag())
    }

    pub fn from_tag(&self) -> Option<String> {
        self.from_header().and_then(|h| h.tag())
    }

    /// URI of the first Contact header, if present.
    pub fn contact_uri(&self) -> Option<Uri> {
        self.header(&HeaderName::Contact)
            .and_then(|h| h.as_address())
            .map(|a| a.uri.clone())
    }

    /// Replace the body and recompute Content-Length.
    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = body.into();
        let len = self.body.len();
        self.remove_headers(&HeaderName::ContentLength);
        self.push_header(Header::raw(HeaderName::ContentLength, len));
    }

    /// Serialize to wire bytes. Headers go out in insertion order except
    /// Content-Length, which is always emitted last before the blank line
    /// (required for byte-compatible output).
    pub fn to_bytes(&self) -> Bytes {
        let mut out = String::new();
        match &self.start_line {
            StartLine::Request {
                method,
                uri,
                version,
            } => {
                out.push_str(&format!("{method} {uri} {version}\r\n"));
            }
            StartLine::Response {
                version,
                status,
                reason,
            } => {
                out.push_str(&format!("{version} {status} {reason}\r\n"));
            }
        }
        for header in &self.headers {
            if header.name == HeaderName::ContentLength {
                continue;
            }
            out.push_str(&header.to_string());
            out.push_str("\r\n");
        }
        out.push_str(&format!("Content-Length: {}\r\n\r\n", self.body.len()));

        let mut bytes = Vec::with_capacity(out.len() + self.body.len());
        bytes.extend_from_slice(out.as_bytes());
        bytes.extend_from_slice(&self.body);
        Bytes::from(bytes)
    }
}

impl fmt::Display for SipMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.start_line {
            StartLine::Request { method, uri, .. } => write!(f, "{method} {uri}"),
            StartLine::Response { status, reason, .. } => write!(f, "{status} {reason}"),
        }
    }
}

/// Parse a complete SIP message from wire bytes.
pub fn parse_message(input: &[u8]) -> Result<SipMessage> {
    let (head, body) = split_head_body(input);
    let head = std::str::from_utf8(head)?;

    let mut lines = unfold_lines(head);
    if lines.is_empty() {
        return Err(Error::InvalidStartLine(String::new()));
    }
    let start_line = parse_start_line(&lines.remove(0))?;

    let mut headers = Vec::new();
    let mut header_errors = Vec::new();
    for line in &lines {
        let Some((name, value)) = line.split_once(':') else {
            header_errors.push(format!("header line without colon: {line}"));
            continue;
        };
        match Header::parse_all(name, value) {
            Ok(mut parsed) => headers.append(&mut parsed),
            Err(e) => {
                trace!(error = %e, "skipping malformed header");
                header_errors.push(e.to_string());
            }
        }
    }

    let mut message = SipMessage {
        start_line,
        headers,
        body: Bytes::new(),
        header_errors,
    };

    for (name, variant) in [
        ("To", HeaderName::To),
        ("From", HeaderName::From),
        ("CSeq", HeaderName::CSeq),
        ("Call-ID", HeaderName::CallId),
    ] {
        if message.header(&variant).is_none() {
            return Err(Error::MissingHeader(name));
        }
    }

    message.body = check_body_length(&message, body)?;
    Ok(message)
}

/// Split at the first blank line; the body is everything after it.
fn split_head_body(input: &[u8]) -> (&[u8], &[u8]) {
    if let Some(pos) = find_subslice(input, b"\r\n\r\n") {
        (&input[..pos], &input[pos + 4..])
    } else if let Some(pos) = find_subslice(input, b"\n\n") {
        (&input[..pos], &input[pos + 2..])
    } else {
        (input, &[][..])
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Split the head into lines, folding continuation lines (leading WSP)
/// into their predecessor.
fn unfold_lines(head: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for raw in head.split('\n') {
        let raw = raw.strip_suffix('\r').unwrap_or(raw);
        if raw.is_empty() {
            continue;
        }
        if raw.starts_with(' ') || raw.starts_with('\t') {
            if let Some(last) = lines.last_mut() {
                last.push(' ');
                last.push_str(raw.trim_start());
                continue;
            }
        }
        lines.push(raw.to_string());
    }
    lines
}

/// Disambiguate request line vs status line: if the second token parses
/// as an integer the line is a status line.
fn parse_start_line(line: &str) -> Result<StartLine> {
    let mut tokens = line.splitn(3, ' ');
    let first = tokens.next().unwrap_or_default();
    let second = tokens
        .next()
        .ok_or_else(|| Error::InvalidStartLine(line.to_string()))?;
    let third = tokens.next().unwrap_or_default();

    if let Ok(code) = second.parse::<u16>() {
        let version = Version::from_str(first)?;
        let status = StatusCode::from_u16(code)?;
        Ok(StartLine::Response {
            version,
            status,
            reason: third.to_string(),
        })
    } else {
        let method = Method::from_str(first)?;
        let uri = Uri::from_str(second)?;
        let version = if third.is_empty() {
            return Err(Error::InvalidStartLine(line.to_string()));
        } else {
            Version::from_str(third)?
        };
        Ok(StartLine::Request {
            method,
            uri,
            version,
        })
    }
}

/// Validate the received body against Content-Length, tolerating the
/// trailing-CRLF skew. The declared length wins inside the tolerance.
fn check_body_length(message: &SipMessage, body: &[u8]) -> Result<Bytes> {
    let declared = message
        .header(&HeaderName::ContentLength)
        .and_then(|h| h.as_raw())
        .and_then(|v| v.trim().parse::<usize>().ok());

    let Some(declared) = declared else {
        return Ok(Bytes::copy_from_slice(body));
    };

    let actual = body.len();
    if actual >= declared {
        if actual - declared <= BODY_LENGTH_TOLERANCE {
            Ok(Bytes::copy_from_slice(&body[..declared]))
        } else {
            Err(Error::BodyLengthMismatch { declared, actual })
        }
    } else if declared - actual <= BODY_LENGTH_TOLERANCE {
        Ok(Bytes::copy_from_slice(body))
    } else {
        Err(Error::BodyLengthMismatch { declared, actual })
    }
}
