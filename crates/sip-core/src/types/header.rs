//! Typed SIP headers.
//!
//! Every header name has a fixed classification that drives both parsing
//! and serialization; the two directions must stay exact inverses of each
//! other, so both sides go through [`HeaderKind::of`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::parser::address::parse_address;
use crate::types::address::Address;
use crate::types::header_name::HeaderName;
use crate::types::method::Method;
use crate::types::uri::Param;
use crate::types::via::Via;

/// How a header's value is parsed and serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderKind {
    /// Display-name/URI value with trailing `;k=v` header attributes.
    Address,
    /// `Scheme k="v", k=v, ...` credential lists.
    Credentials,
    /// Structured Via decoding.
    Via,
    /// `<number> <METHOD>`.
    CSeq,
    /// Raw string value.
    Unstructured,
}

impl HeaderKind {
    /// The fixed classification table.
    pub fn of(name: &HeaderName) -> HeaderKind {
        match name {
            HeaderName::Contact
            | HeaderName::From
            | HeaderName::RecordRoute
            | HeaderName::ReferTo
            | HeaderName::ReferredBy
            | HeaderName::Route
            | HeaderName::ServiceRoute
            | HeaderName::To => HeaderKind::Address,
            HeaderName::Authorization
            | HeaderName::ProxyAuthorization
            | HeaderName::ProxyAuthenticate
            | HeaderName::WwwAuthenticate => HeaderKind::Credentials,
            HeaderName::Via => HeaderKind::Via,
            HeaderName::CSeq => HeaderKind::CSeq,
            _ => HeaderKind::Unstructured,
        }
    }

    /// Headers whose wire value may hold several comma-separated instances.
    fn splits_on_commas(name: &HeaderName) -> bool {
        matches!(
            name,
            HeaderName::Via
                | HeaderName::Route
                | HeaderName::RecordRoute
                | HeaderName::ServiceRoute
                | HeaderName::Contact
        )
    }
}

/// A parsed header value, one variant per [`HeaderKind`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeaderValue {
    Address(Address),
    /// Credential scheme plus ordered attribute pairs; values keep their
    /// original quoting so serialization is faithful.
    Credentials {
        scheme: String,
        params: Vec<(String, String)>,
    },
    Via(Via),
    CSeq {
        seq: u32,
        method: Method,
    },
    Raw(String),
}

/// One header instance: canonical name, typed value, header attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: HeaderName,
    pub value: HeaderValue,
    /// Attributes trailing an address value (`tag`, `expires`, `q`, ...).
    pub params: Vec<Param>,
}

impl Header {
    pub fn new(name: HeaderName, value: HeaderValue) -> Self {
        Header {
            name,
            value,
            params: Vec::new(),
        }
    }

    /// An address-kind header.
    pub fn address(name: HeaderName, address: Address) -> Self {
        Header::new(name, HeaderValue::Address(address))
    }

    /// An unstructured header from any displayable value.
    pub fn raw(name: HeaderName, value: impl ToString) -> Self {
        Header::new(name, HeaderValue::Raw(value.to_string()))
    }

    pub fn cseq(seq: u32, method: Method) -> Self {
        Header::new(HeaderName::CSeq, HeaderValue::CSeq { seq, method })
    }

    pub fn via(via: Via) -> Self {
        Header::new(HeaderName::Via, HeaderValue::Via(via))
    }

    /// Parse one raw header line value into one or more header instances
    /// (multi-valued names split on top-level commas).
    pub fn parse_all(raw_name: &str, raw_value: &str) -> Result<Vec<Header>> {
        let name = HeaderName::from_str(raw_name)?;
        let raw_value = raw_value.trim();
        if raw_value.is_empty() {
            return Err(Error::InvalidHeader {
                name: name.as_str().to_string(),
                message: "empty value".to_string(),
            });
        }

        let pieces: Vec<&str> = if HeaderKind::splits_on_commas(&name) && raw_value != "*" {
            split_top_level_commas(raw_value)
        } else {
            vec![raw_value]
        };

        pieces
            .into_iter()
            .map(|piece| Header::parse_one(name.clone(), piece.trim()))
            .collect()
    }

    fn parse_one(name: HeaderName, value: &str) -> Result<Header> {
        let invalid = |message: String| Error::InvalidHeader {
            name: name.as_str().to_string(),
            message,
        };
        match HeaderKind::of(&name) {
            HeaderKind::Address => {
                let (address, rest) = parse_address(value).map_err(|e| invalid(e.to_string()))?;
                let params = parse_semi_params(rest).map_err(|e| invalid(e.to_string()))?;
                Ok(Header {
                    name,
                    value: HeaderValue::Address(address),
                    params,
                })
            }
            HeaderKind::Credentials => {
                let (scheme, rest) = value
                    .split_once(|c: char| c.is_ascii_whitespace())
                    .ok_or_else(|| invalid(format!("credentials without parameters: {value}")))?;
                let mut params = Vec::new();
                for piece in split_top_level_commas(rest) {
                    let (k, v) = piece
                        .trim()
                        .split_once('=')
                        .ok_or_else(|| invalid(format!("malformed credential attribute: {piece}")))?;
                    params.push((k.trim().to_string(), v.trim().to_string()));
                }
                Ok(Header::new(
                    name,
                    HeaderValue::Credentials {
                        scheme: scheme.to_string(),
                        params,
                    },
                ))
            }
            HeaderKind::Via => {
                let via = Via::from_str(value).map_err(|e| invalid(e.to_string()))?;
                Ok(Header::via(via))
            }
            HeaderKind::CSeq => {
                let (seq, method) = value
                    .split_once(|c: char| c.is_ascii_whitespace())
                    .ok_or_else(|| invalid(format!("malformed CSeq: {value}")))?;
                let seq = seq
                    .trim()
                    .parse()
                    .map_err(|_| invalid(format!("bad CSeq number: {value}")))?;
                let method = Method::from_str(method.trim()).map_err(|e| invalid(e.to_string()))?;
                Ok(Header::cseq(seq, method))
            }
            HeaderKind::Unstructured => Ok(Header::raw(name, value)),
        }
    }

    /// First attribute parameter with this key.
    pub fn param(&self, key: &str) -> Option<&Param> {
        self.params.iter().find(|p| p.matches_key(key))
    }

    /// Insert or replace an attribute parameter.
    pub fn set_param(&mut self, param: Param) {
        if let Some(existing) = self.params.iter_mut().find(|p| p.matches_key(param.key())) {
            *existing = param;
        } else {
            self.params.push(param);
        }
    }

    /// The `tag` attribute, for To/From headers.
    pub fn tag(&self) -> Option<String> {
        self.param("tag").and_then(|p| p.value())
    }

    /// The address value, when this is an address-kind header.
    pub fn as_address(&self) -> Option<&Address> {
        match &self.value {
            HeaderValue::Address(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_via(&self) -> Option<&Via> {
        match &self.value {
            HeaderValue::Via(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_raw(&self) -> Option<&str> {
        match &self.value {
            HeaderValue::Raw(s) => Some(s),
            _ => None,
        }
    }

    /// Credential attribute lookup with quote stripping (`realm`, `nonce`).
    pub fn credential_param(&self, key: &str) -> Option<String> {
        match &self.value {
            HeaderValue::Credentials { params, .. } => params
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v.trim_matches('"').to_string()),
            _ => None,
        }
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.name)?;
        match &self.value {
            HeaderValue::Address(address) => {
                write!(f, "{address}")?;
                for param in &self.params {
                    write!(f, ";{param}")?;
                }
                Ok(())
            }
            HeaderValue::Credentials { scheme, params } => {
                write!(f, "{scheme} ")?;
                for (i, (k, v)) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{k}={v}")?;
                }
                Ok(())
            }
            HeaderValue::Via(via) => write!(f, "{via}"),
            HeaderValue::CSeq { seq, method } => write!(f, "{seq} {method}"),
            HeaderValue::Raw(value) => f.write_str(value),
        }
    }
}

/// Split on commas outside quoted strings and angle brackets.
fn split_top_level_commas(input: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut depth = 0usize;
    let mut in_quotes = false;
    let mut escaped = false;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            '<' if !in_quotes => depth += 1,
            '>' if !in_quotes => depth = depth.saturating_sub(1),
            ',' if !in_quotes && depth == 0 => {
                pieces.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    pieces.push(&input[start..]);
    pieces
}

/// Parse a `;k=v;k2` attribute tail into parameters.
fn parse_semi_params(rest: &str) -> Result<Vec<Param>> {
    let rest = rest.trim();
    if rest.is_empty() {
        return Ok(Vec::new());
    }
    let rest = rest
        .strip_prefix(';')
        .ok_or_else(|| Error::ParseError(format!("expected ;params, got: {rest}")))?;
    let mut params = Vec::new();
    for piece in rest.split(';') {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        match piece.split_once('=') {
            Some((k, v)) => params.push(Param::parse(k.trim(), Some(v.trim()))),
            None => params.push(Param::parse(piece, None)),
        }
    }
    Ok(params)
}
