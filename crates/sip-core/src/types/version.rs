//! SIP protocol version.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Protocol version carried in start lines and Via headers, e.g. `SIP/2.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl Version {
    pub const SIP_2_0: Version = Version { major: 2, minor: 0 };

    pub fn new(major: u8, minor: u8) -> Self {
        Version { major, minor }
    }
}

impl Default for Version {
    fn default() -> Self {
        Version::SIP_2_0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIP/{}.{}", self.major, self.minor)
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let rest = s
            .strip_prefix("SIP/")
            .ok_or_else(|| Error::ParseError(format!("not a SIP version: {s}")))?;
        let (major, minor) = rest
            .split_once('.')
            .ok_or_else(|| Error::ParseError(format!("malformed SIP version: {s}")))?;
        Ok(Version {
            major: major
                .parse()
                .map_err(|_| Error::ParseError(format!("bad major version: {s}")))?,
            minor: minor
                .parse()
                .map_err(|_| Error::ParseError(format!("bad minor version: {s}")))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let v = Version::from_str("SIP/2.0").unwrap();
        assert_eq!(v, Version::SIP_2_0);
        assert_eq!(v.to_string(), "SIP/2.0");
    }

    #[test]
    fn rejects_http() {
        assert!(Version::from_str("HTTP/1.1").is_err());
    }
}
