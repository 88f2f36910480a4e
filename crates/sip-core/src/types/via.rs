//! The Via header value (RFC 3261 Section 20.42).
//!
//! One `Via` models a single hop; a message with several hops carries one
//! header instance per hop, in order.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::uri::Param;
use crate::types::version::Version;

/// RFC 3261 magic cookie every compliant branch starts with.
pub const BRANCH_MAGIC_COOKIE: &str = "z9hG4bK";

/// A single Via hop: sent-protocol, sent-by, and parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Via {
    pub version: Version,
    /// Transport token as sent, canonically uppercase (`UDP`, `TCP`, ...).
    pub transport: String,
    pub host: String,
    pub port: Option<u16>,
    pub params: Vec<Param>,
}

impl Via {
    pub fn new(transport: impl Into<String>, host: impl Into<String>, port: Option<u16>) -> Self {
        Via {
            version: Version::SIP_2_0,
            transport: transport.into().to_ascii_uppercase(),
            host: host.into(),
            port,
            params: Vec::new(),
        }
    }

    /// A Via for a fresh request: sent-by plus a newly generated branch.
    pub fn for_request(transport: &str, host: &str, port: Option<u16>) -> Self {
        let mut via = Via::new(transport, host, port);
        via.params.push(Param::Branch(generate_branch()));
        via
    }

    pub fn branch(&self) -> Option<String> {
        self.param_value("branch")
    }

    pub fn set_branch(&mut self, branch: impl Into<String>) {
        self.set_param(Param::Branch(branch.into()));
    }

    pub fn received(&self) -> Option<String> {
        self.param_value("received")
    }

    pub fn maddr(&self) -> Option<String> {
        self.param_value("maddr")
    }

    pub fn rport(&self) -> Option<u16> {
        match self.params.iter().find(|p| p.matches_key("rport")) {
            Some(Param::Rport(port)) => *port,
            _ => None,
        }
    }

    pub fn set_param(&mut self, param: Param) {
        if let Some(existing) = self.params.iter_mut().find(|p| p.matches_key(param.key())) {
            *existing = param;
        } else {
            self.params.push(param);
        }
    }

    fn param_value(&self, key: &str) -> Option<String> {
        self.params.iter().find(|p| p.matches_key(key)).and_then(|p| p.value())
    }

    /// Connection-oriented transports keep their established connection;
    /// `received`/`maddr` substitution only applies to the rest.
    pub fn is_connection_oriented(&self) -> bool {
        matches!(self.transport.as_str(), "TCP" | "TLS" | "SCTP")
    }

    /// Host and port a response to this hop should be delivered to:
    /// `maddr`/`received` override the sent-by host on datagram transports,
    /// `rport` overrides the port, and the port defaults to 5060.
    pub fn delivery_target(&self) -> (String, u16) {
        let host = if self.is_connection_oriented() {
            self.host.clone()
        } else {
            self.maddr()
                .or_else(|| self.received())
                .unwrap_or_else(|| self.host.clone())
        };
        let port = self.rport().or(self.port).unwrap_or(5060);
        (host, port)
    }

}

impl fmt::Display for Via {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} {}", self.version, self.transport, self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        for param in &self.params {
            write!(f, ";{param}")?;
        }
        Ok(())
    }
}

impl FromStr for Via {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (protocol, rest) = s
            .split_once(|c: char| c == ' ' || c == '\t')
            .ok_or_else(|| Error::ParseError(format!("malformed Via: {s}")))?;

        let mut proto_parts = protocol.splitn(3, '/');
        let name = proto_parts.next().unwrap_or_default();
        let ver = proto_parts.next().unwrap_or_default();
        let transport = proto_parts
            .next()
            .ok_or_else(|| Error::ParseError(format!("Via missing transport: {s}")))?;
        let version = Version::from_str(&format!("{name}/{ver}"))?;

        let rest = rest.trim_start();
        let (sent_by, param_str) = match rest.find(';') {
            Some(i) => (&rest[..i], &rest[i + 1..]),
            None => (rest, ""),
        };

        let sent_by = sent_by.trim();
        let (host, port) = split_host_port(sent_by)?;

        let mut params = Vec::new();
        if !param_str.is_empty() {
            for piece in param_str.split(';') {
                let piece = piece.trim();
                if piece.is_empty() {
                    continue;
                }
                match piece.split_once('=') {
                    Some((k, v)) => params.push(Param::parse(k.trim(), Some(v.trim()))),
                    None => params.push(Param::parse(piece, None)),
                }
            }
        }

        Ok(Via {
            version,
            transport: transport.to_ascii_uppercase(),
            host,
            port,
            params,
        })
    }
}

fn split_host_port(sent_by: &str) -> Result<(String, Option<u16>)> {
    if sent_by.is_empty() {
        return Err(Error::ParseError("Via missing sent-by".to_string()));
    }
    // Bracketed IPv6 references keep their colons.
    if let Some(close) = sent_by.find(']') {
        let host = sent_by[..=close].to_string();
        let port = match sent_by[close + 1..].strip_prefix(':') {
            Some(p) => Some(
                p.parse()
                    .map_err(|_| Error::ParseError(format!("bad Via port: {sent_by}")))?,
            ),
            None => None,
        };
        return Ok((host, port));
    }
    match sent_by.rsplit_once(':') {
        Some((host, port)) => Ok((
            host.to_string(),
            Some(
                port.parse()
                    .map_err(|_| Error::ParseError(format!("bad Via port: {sent_by}")))?,
            ),
        )),
        None => Ok((sent_by.to_string(), None)),
    }
}

/// A fresh RFC 3261 branch token: magic cookie plus random suffix.
pub fn generate_branch() -> String {
    let mut rng = rand::thread_rng();
    format!("{}{:016x}", BRANCH_MAGIC_COOKIE, rng.gen::<u64>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_serializes() {
        let s = "SIP/2.0/UDP pc33.atlanta.com:5060;branch=z9hG4bK776asdhds";
        let via: Via = s.parse().unwrap();
        assert_eq!(via.transport, "UDP");
        assert_eq!(via.host, "pc33.atlanta.com");
        assert_eq!(via.port, Some(5060));
        assert_eq!(via.branch().as_deref(), Some("z9hG4bK776asdhds"));
        assert_eq!(via.to_string(), s);
    }

    #[test]
    fn received_overrides_delivery_host_on_udp() {
        let via: Via = "SIP/2.0/UDP pc33.atlanta.com;branch=z9hG4bKx;received=192.0.2.4"
            .parse()
            .unwrap();
        assert_eq!(via.delivery_target(), ("192.0.2.4".to_string(), 5060));
    }

    #[test]
    fn received_ignored_on_tcp() {
        let via: Via = "SIP/2.0/TCP pc33.atlanta.com:5061;received=192.0.2.4"
            .parse()
            .unwrap();
        assert_eq!(via.delivery_target(), ("pc33.atlanta.com".to_string(), 5061));
    }

    #[test]
    fn rport_overrides_port() {
        let via: Via = "SIP/2.0/UDP host.example.com:5060;rport=40444;received=192.0.2.4"
            .parse()
            .unwrap();
        assert_eq!(via.delivery_target(), ("192.0.2.4".to_string(), 40444));
    }

    #[test]
    fn generated_branches_carry_the_cookie() {
        let b = generate_branch();
        assert!(b.starts_with(BRANCH_MAGIC_COOKIE));
        assert_ne!(b, generate_branch());
    }
}
