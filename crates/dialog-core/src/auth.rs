//! Authentication retry boundary (RFC 3261 Section 22).
//!
//! The stack never computes digests itself. It parses the challenge out
//! of a 401/407, asks the application for credentials, and delegates the
//! credential header value to an [`Authenticator`] supplied by the
//! embedder. One retry per realm: a second challenge for a realm that was
//! already answered is surfaced to the application untouched.

use sipline_sip_core::{Header, HeaderName, HeaderValue, Method, StatusCode, Uri};

/// A parsed `WWW-Authenticate` / `Proxy-Authenticate` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    /// Challenge scheme, e.g. `Digest`.
    pub scheme: String,
    pub realm: Option<String>,
    /// All challenge attributes with quotes stripped, in header order.
    pub params: Vec<(String, String)>,
}

impl Challenge {
    pub fn from_header(header: &Header) -> Option<Challenge> {
        let HeaderValue::Credentials { scheme, params } = &header.value else {
            return None;
        };
        let params: Vec<(String, String)> = params
            .iter()
            .map(|(k, v)| (k.clone(), v.trim_matches('"').to_string()))
            .collect();
        let realm = params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("realm"))
            .map(|(_, v)| v.clone());
        Some(Challenge {
            scheme: scheme.clone(),
            realm,
            params,
        })
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

/// Username/password pair supplied by the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// External credential computation (digest, basic, ...).
///
/// Given a challenge, credentials and the request being retried, returns
/// the full value of the `Authorization`/`Proxy-Authorization` header, or
/// `None` when the scheme is unsupported.
pub trait Authenticator: Send + Sync {
    fn credential_value(
        &self,
        challenge: &Challenge,
        credentials: &Credentials,
        method: &Method,
        uri: &Uri,
    ) -> Option<String>;
}

/// Which challenge/credential header pair a status code uses.
pub fn challenge_headers(status: StatusCode) -> Option<(HeaderName, HeaderName)> {
    match status {
        StatusCode::UNAUTHORIZED => Some((HeaderName::WwwAuthenticate, HeaderName::Authorization)),
        StatusCode::PROXY_AUTHENTICATION_REQUIRED => Some((
            HeaderName::ProxyAuthenticate,
            HeaderName::ProxyAuthorization,
        )),
        _ => None,
    }
}
