//! Canonical SIP header names with compact-form expansion.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A SIP header name.
///
/// Parsing is case-insensitive and expands the single-letter compact forms
/// of RFC 3261 Section 20. Unknown names are kept in `Other`, title-cased
/// per hyphen-separated segment (so `x-custom-id` becomes `X-Custom-Id`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HeaderName {
    Allow,
    Authorization,
    CallId,
    Contact,
    ContentEncoding,
    ContentLength,
    ContentType,
    CSeq,
    Date,
    Expires,
    From,
    MaxForwards,
    ProxyAuthenticate,
    ProxyAuthorization,
    RecordRoute,
    ReferTo,
    ReferredBy,
    Route,
    ServiceRoute,
    Subject,
    Supported,
    To,
    UserAgent,
    Via,
    WwwAuthenticate,
    Other(String),
}

impl HeaderName {
    /// Canonical wire form.
    pub fn as_str(&self) -> &str {
        match self {
            HeaderName::Allow => "Allow",
            HeaderName::Authorization => "Authorization",
            HeaderName::CallId => "Call-ID",
            HeaderName::Contact => "Contact",
            HeaderName::ContentEncoding => "Content-Encoding",
            HeaderName::ContentLength => "Content-Length",
            HeaderName::ContentType => "Content-Type",
            HeaderName::CSeq => "CSeq",
            HeaderName::Date => "Date",
            HeaderName::Expires => "Expires",
            HeaderName::From => "From",
            HeaderName::MaxForwards => "Max-Forwards",
            HeaderName::ProxyAuthenticate => "Proxy-Authenticate",
            HeaderName::ProxyAuthorization => "Proxy-Authorization",
            HeaderName::RecordRoute => "Record-Route",
            HeaderName::ReferTo => "Refer-To",
            HeaderName::ReferredBy => "Referred-By",
            HeaderName::Route => "Route",
            HeaderName::ServiceRoute => "Service-Route",
            HeaderName::Subject => "Subject",
            HeaderName::Supported => "Supported",
            HeaderName::To => "To",
            HeaderName::UserAgent => "User-Agent",
            HeaderName::Via => "Via",
            HeaderName::WwwAuthenticate => "WWW-Authenticate",
            HeaderName::Other(name) => name,
        }
    }

    /// Expand an RFC 3261 compact form, if `name` is one.
    fn expand_compact(name: &str) -> Option<HeaderName> {
        if name.len() != 1 {
            return None;
        }
        match name.chars().next()?.to_ascii_lowercase() {
            'v' => Some(HeaderName::Via),
            'f' => Some(HeaderName::From),
            't' => Some(HeaderName::To),
            'm' => Some(HeaderName::Contact),
            'i' => Some(HeaderName::CallId),
            'k' => Some(HeaderName::Supported),
            'l' => Some(HeaderName::ContentLength),
            'c' => Some(HeaderName::ContentType),
            'e' => Some(HeaderName::ContentEncoding),
            's' => Some(HeaderName::Subject),
            _ => None,
        }
    }

    /// Title-case each hyphen-separated segment of an unknown name.
    fn title_case(name: &str) -> String {
        name.split('-')
            .map(|segment| {
                let mut chars = segment.chars();
                match chars.next() {
                    Some(first) => {
                        first.to_ascii_uppercase().to_string()
                            + &chars.as_str().to_ascii_lowercase()
                    }
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join("-")
    }
}

impl fmt::Display for HeaderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HeaderName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::ParseError("empty header name".to_string()));
        }
        if let Some(expanded) = Self::expand_compact(s) {
            return Ok(expanded);
        }
        // Byte-exact canonical forms that title-casing would mangle
        // (Call-ID, CSeq, WWW-Authenticate) are covered by the variants.
        Ok(match s.to_ascii_lowercase().as_str() {
            "allow" => HeaderName::Allow,
            "authorization" => HeaderName::Authorization,
            "call-id" => HeaderName::CallId,
            "contact" => HeaderName::Contact,
            "content-encoding" => HeaderName::ContentEncoding,
            "content-length" => HeaderName::ContentLength,
            "content-type" => HeaderName::ContentType,
            "cseq" => HeaderName::CSeq,
            "date" => HeaderName::Date,
            "expires" => HeaderName::Expires,
            "from" => HeaderName::From,
            "max-forwards" => HeaderName::MaxForwards,
            "proxy-authenticate" => HeaderName::ProxyAuthenticate,
            "proxy-authorization" => HeaderName::ProxyAuthorization,
            "record-route" => HeaderName::RecordRoute,
            "refer-to" => HeaderName::ReferTo,
            "referred-by" => HeaderName::ReferredBy,
            "route" => HeaderName::Route,
            "service-route" => HeaderName::ServiceRoute,
            "subject" => HeaderName::Subject,
            "supported" => HeaderName::Supported,
            "to" => HeaderName::To,
            "user-agent" => HeaderName::UserAgent,
            "via" => HeaderName::Via,
            "www-authenticate" => HeaderName::WwwAuthenticate,
            _ => HeaderName::Other(Self::title_case(s)),
        })
    }
}
