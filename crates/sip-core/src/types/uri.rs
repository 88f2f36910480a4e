//! SIP and TEL URIs (RFC 3261 Section 19.1, RFC 3966).
//!
//! A [`Uri`] keeps its parameters as an ordered list so that a
//! parse/serialize round trip is stable, and parameter keys stay unique:
//! [`Uri::set_param`] replaces any previous parameter with the same key.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::parser;

/// URI scheme. `sips:` is carried but given no TLS semantics by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scheme {
    Sip,
    Sips,
    Tel,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Sip => "sip",
            Scheme::Sips => "sips",
            Scheme::Tel => "tel",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sip" => Ok(Scheme::Sip),
            "sips" => Ok(Scheme::Sips),
            "tel" => Ok(Scheme::Tel),
            other => Err(Error::InvalidUri(format!("unsupported scheme: {other}"))),
        }
    }
}

/// A URI or header parameter.
///
/// Well-known parameters get their own variant; everything else lands in
/// `Other`. Key comparison is case-insensitive, canonical output lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Param {
    Transport(String),
    /// Loose-routing flag, serialized without a value.
    Lr,
    Tag(String),
    Branch(String),
    Maddr(String),
    Received(String),
    /// `rport` with no value asks the peer to fill it in.
    Rport(Option<u16>),
    Ttl(u8),
    Expires(u32),
    Other(String, Option<String>),
}

impl Param {
    /// Build a parameter from a raw key/value pair. Typed variants are
    /// only produced for the forms they can re-serialize losslessly;
    /// everything else stays `Other` with the value form preserved.
    pub fn parse(key: &str, value: Option<&str>) -> Param {
        let v = value.map(|v| v.to_string());
        match (key.to_ascii_lowercase().as_str(), v) {
            ("transport", Some(v)) => Param::Transport(v),
            ("lr", None) => Param::Lr,
            ("tag", Some(v)) => Param::Tag(v),
            ("branch", Some(v)) => Param::Branch(v),
            ("maddr", Some(v)) => Param::Maddr(v),
            ("received", Some(v)) => Param::Received(v),
            ("rport", None) => Param::Rport(None),
            ("rport", Some(v)) => match v.parse() {
                Ok(port) => Param::Rport(Some(port)),
                Err(_) => Param::Other("rport".to_string(), Some(v)),
            },
            ("ttl", Some(v)) => match v.parse() {
                Ok(ttl) => Param::Ttl(ttl),
                Err(_) => Param::Other("ttl".to_string(), Some(v)),
            },
            ("expires", Some(v)) => match v.parse() {
                Ok(exp) => Param::Expires(exp),
                Err(_) => Param::Other("expires".to_string(), Some(v)),
            },
            (k, v) => Param::Other(k.to_string(), v),
        }
    }

    /// Canonical key for this parameter.
    pub fn key(&self) -> &str {
        match self {
            Param::Transport(_) => "transport",
            Param::Lr => "lr",
            Param::Tag(_) => "tag",
            Param::Branch(_) => "branch",
            Param::Maddr(_) => "maddr",
            Param::Received(_) => "received",
            Param::Rport(_) => "rport",
            Param::Ttl(_) => "ttl",
            Param::Expires(_) => "expires",
            Param::Other(k, _) => k,
        }
    }

    /// The parameter value, if it carries one.
    pub fn value(&self) -> Option<String> {
        match self {
            Param::Transport(v) | Param::Tag(v) | Param::Branch(v) | Param::Maddr(v)
            | Param::Received(v) => Some(v.clone()),
            Param::Lr => None,
            Param::Rport(v) => v.map(|p| p.to_string()),
            Param::Ttl(t) => Some(t.to_string()),
            Param::Expires(e) => Some(e.to_string()),
            Param::Other(_, v) => v.clone(),
        }
    }

    pub fn matches_key(&self, key: &str) -> bool {
        self.key().eq_ignore_ascii_case(key)
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // An empty value (`key=`) is distinct from a bare flag (`key`).
        match self.value() {
            Some(v) => write!(f, "{}={}", self.key(), v),
            None => f.write_str(self.key()),
        }
    }
}

/// A parsed `sip:`, `sips:` or `tel:` URI.
///
/// For `tel:` URIs the subscriber number lives in `user` and `host` is
/// `None`. The type is a plain value: cloning it is the deep-duplication
/// contract callers rely on when moving URIs between messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Uri {
    pub scheme: Scheme,
    pub user: Option<String>,
    pub password: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub params: Vec<Param>,
    pub headers: Vec<(String, String)>,
}

impl Uri {
    /// A `sip:` URI with just a host.
    pub fn sip(host: impl Into<String>) -> Self {
        Uri {
            scheme: Scheme::Sip,
            user: None,
            password: None,
            host: Some(host.into()),
            port: None,
            params: Vec::new(),
            headers: Vec::new(),
        }
    }

    /// A `sip:user@host` URI.
    pub fn sip_user(user: impl Into<String>, host: impl Into<String>) -> Self {
        let mut uri = Uri::sip(host);
        uri.user = Some(user.into());
        uri
    }

    /// A `tel:` URI; the subscriber lives in the user field.
    pub fn tel(subscriber: impl Into<String>) -> Self {
        Uri {
            scheme: Scheme::Tel,
            user: Some(subscriber.into()),
            password: None,
            host: None,
            port: None,
            params: Vec::new(),
            headers: Vec::new(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_param(mut self, param: Param) -> Self {
        self.set_param(param);
        self
    }

    /// First parameter with the given key.
    pub fn param(&self, key: &str) -> Option<&Param> {
        self.params.iter().find(|p| p.matches_key(key))
    }

    /// Insert or replace a parameter, keeping keys unique and order stable.
    pub fn set_param(&mut self, param: Param) {
        if let Some(existing) = self.params.iter_mut().find(|p| p.matches_key(param.key())) {
            *existing = param;
        } else {
            self.params.push(param);
        }
    }

    pub fn remove_param(&mut self, key: &str) {
        self.params.retain(|p| !p.matches_key(key));
    }

    /// Whether this URI carries the loose-routing flag.
    pub fn is_loose_routing(&self) -> bool {
        self.param("lr").is_some()
    }

    pub fn transport(&self) -> Option<String> {
        self.param("transport").and_then(|p| p.value())
    }

    /// Host and port as a resolvable endpoint, defaulting the SIP port.
    pub fn host_port(&self) -> Option<(String, u16)> {
        self.host
            .as_ref()
            .map(|h| (h.clone(), self.port.unwrap_or(5060)))
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.scheme)?;
        if let Some(user) = &self.user {
            write!(f, "{user}")?;
            if let Some(password) = &self.password {
                write!(f, ":{password}")?;
            }
            if self.host.is_some() {
                write!(f, "@")?;
            }
        }
        if let Some(host) = &self.host {
            write!(f, "{host}")?;
            if let Some(port) = self.port {
                write!(f, ":{port}")?;
            }
        }
        for param in &self.params {
            write!(f, ";{param}")?;
        }
        for (i, (k, v)) in self.headers.iter().enumerate() {
            write!(f, "{}{}={}", if i == 0 { '?' } else { '&' }, k, v)?;
        }
        Ok(())
    }
}

impl FromStr for Uri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parser::uri::parse_uri(s.trim())
    }
}
