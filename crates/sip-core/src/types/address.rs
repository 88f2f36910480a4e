//! Display-name-plus-URI values used by To, From, Contact, Route and
//! friends (RFC 3261 Section 20.10 `name-addr` / `addr-spec`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::parser;
use crate::types::uri::Uri;

/// An address value: optional display name plus URI, or the `*` wildcard
/// Contact form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub display_name: Option<String>,
    pub uri: Uri,
    /// `Contact: *`
    pub wildcard: bool,
    /// Forces quoting of the display name even when it is a plain token.
    pub needs_quotes: bool,
}

impl Address {
    pub fn new(uri: Uri) -> Self {
        Address {
            display_name: None,
            uri,
            wildcard: false,
            needs_quotes: false,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// The `Contact: *` wildcard. The URI slot holds a placeholder that is
    /// never serialized.
    pub fn wildcard() -> Self {
        Address {
            display_name: None,
            uri: Uri::sip("*"),
            wildcard: true,
            needs_quotes: false,
        }
    }

    fn name_requires_quoting(name: &str) -> bool {
        name.chars().any(|c| {
            !(c.is_ascii_alphanumeric()
                || matches!(c, '-' | '.' | '!' | '%' | '*' | '_' | '+' | '`' | '\'' | '~' | ' '))
        })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.wildcard {
            return f.write_str("*");
        }
        if let Some(name) = &self.display_name {
            if self.needs_quotes || Self::name_requires_quoting(name) {
                write!(f, "\"{}\" ", name.replace('\\', "\\\\").replace('"', "\\\""))?;
            } else {
                write!(f, "{name} ")?;
            }
        }
        write!(f, "<{}>", self.uri)
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (addr, rest) = parser::address::parse_address(s)?;
        if rest.trim().is_empty() {
            Ok(addr)
        } else {
            Err(Error::ParseError(format!("trailing input after address: {rest}")))
        }
    }
}
