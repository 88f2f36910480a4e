//! Out-of-dialog client attempts.
//!
//! A `UserAgent` tracks one request the application originated outside
//! any dialog: the request itself (kept Via-less so every attempt gets a
//! fresh branch), the remaining destination candidates for failover, and
//! the realms already answered during authentication retry.

use std::net::SocketAddr;

use rand::Rng;
use sipline_sip_core::{HeaderName, SipMessage};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct UserAgent {
    /// The request as the application handed it over, without Via.
    pub request: SipMessage,
    /// Destinations not yet attempted.
    pub candidates: Vec<SocketAddr>,
    /// (realm, credential header) pairs already answered once.
    pub attempted_realms: Vec<(String, HeaderName)>,
    pub last_response: Option<SipMessage>,
}

impl UserAgent {
    pub fn new(mut request: SipMessage, candidates: Vec<SocketAddr>) -> Self {
        // The transaction layer stamps a branch per attempt; a stale Via
        // from the caller would pin every retry to one transaction.
        request.remove_headers(&HeaderName::Via);
        UserAgent {
            request,
            candidates,
            attempted_realms: Vec::new(),
            last_response: None,
        }
    }

    /// Pop the next destination to try, if any remain.
    pub fn next_candidate(&mut self) -> Option<SocketAddr> {
        if self.candidates.is_empty() {
            None
        } else {
            Some(self.candidates.remove(0))
        }
    }

    pub fn mark_realm_attempted(&mut self, realm: String, header: HeaderName) {
        self.attempted_realms.push((realm, header));
    }

    pub fn realm_already_attempted(&self, realm: &str, header: &HeaderName) -> bool {
        self.attempted_realms
            .iter()
            .any(|(r, h)| r == realm && h == header)
    }
}

/// Fresh From/To tag value.
pub fn generate_tag() -> String {
    let n: u64 = rand::thread_rng().gen();
    format!("{n:016x}")
}

/// Fresh Call-ID value.
pub fn generate_call_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sipline_sip_core::parse_message;

    #[test]
    fn candidates_drain_in_order() {
        let raw = b"OPTIONS sip:a@b SIP/2.0\r\n\
            Via: SIP/2.0/UDP 1.2.3.4;branch=z9hG4bKstale\r\n\
            From: <sip:a@b>;tag=1\r\nTo: <sip:a@b>\r\nCall-ID: c\r\nCSeq: 1 OPTIONS\r\n\
            Content-Length: 0\r\n\r\n";
        let request = parse_message(raw).unwrap();
        let mut ua = UserAgent::new(
            request,
            vec!["127.0.0.1:5060".parse().unwrap(), "127.0.0.1:5062".parse().unwrap()],
        );
        // The stale Via is stripped on adoption.
        assert!(ua.request.via_top().is_none());
        assert_eq!(ua.next_candidate().unwrap().port(), 5060);
        assert_eq!(ua.next_candidate().unwrap().port(), 5062);
        assert!(ua.next_candidate().is_none());
    }

    #[test]
    fn realm_retry_is_recorded_once() {
        let raw = b"REGISTER sip:r SIP/2.0\r\n\
            From: <sip:a@b>;tag=1\r\nTo: <sip:a@b>\r\nCall-ID: c\r\nCSeq: 1 REGISTER\r\n\
            Content-Length: 0\r\n\r\n";
        let mut ua = UserAgent::new(parse_message(raw).unwrap(), Vec::new());
        assert!(!ua.realm_already_attempted("example.com", &HeaderName::Authorization));
        ua.mark_realm_attempted("example.com".into(), HeaderName::Authorization);
        assert!(ua.realm_already_attempted("example.com", &HeaderName::Authorization));
        assert!(!ua.realm_already_attempted("example.com", &HeaderName::ProxyAuthorization));
    }
}
