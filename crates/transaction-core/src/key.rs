//! Transaction identity (RFC 3261 Section 17.1.3 / 17.2.3).

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use sipline_sip_core::{HeaderName, Method, SipMessage};

use crate::error::{Error, Result};

/// Uniquely identifies a transaction within the registry.
///
/// The registry id is the branch alone, except that ACK and CANCEL,
/// which reuse the branch of the INVITE they refer to, fold the method in as
/// `branch|METHOD` to stay distinct from the original INVITE transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionKey {
    pub branch: String,
    pub method: Method,
    pub is_server: bool,
}

impl TransactionKey {
    pub fn new(branch: impl Into<String>, method: Method, is_server: bool) -> Self {
        TransactionKey {
            branch: branch.into(),
            method,
            is_server,
        }
    }

    /// Registry id string for this key.
    pub fn id(&self) -> String {
        if self.method.needs_method_in_key() {
            format!("{}|{}", self.branch, self.method)
        } else {
            self.branch.clone()
        }
    }

    /// Registry id for a message that would match this transaction.
    ///
    /// For requests the method is the request method; for responses it is
    /// taken from CSeq. Messages without a Via branch fall back to a
    /// deterministic hash of (To, From, Call-ID, CSeq number, role) for
    /// pre-RFC3261 peers.
    pub fn from_message(message: &SipMessage, is_server: bool) -> Result<TransactionKey> {
        let method = message.method().ok_or(Error::MissingHeader("CSeq"))?;
        let branch = match message.via_top().and_then(|v| v.branch()) {
            Some(branch) if !branch.is_empty() => branch,
            _ => derive_branch(message, is_server)?,
        };
        Ok(TransactionKey::new(branch, method, is_server))
    }
}

impl fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}",
            if self.is_server { "uas" } else { "uac" },
            self.id()
        )
    }
}

/// Deterministic branch for branch-less messages: hash of
/// (To, From, Call-ID, CSeq number, role).
fn derive_branch(message: &SipMessage, is_server: bool) -> Result<String> {
    let to = message
        .header(&HeaderName::To)
        .ok_or(Error::MissingHeader("To"))?;
    let from = message
        .header(&HeaderName::From)
        .ok_or(Error::MissingHeader("From"))?;
    let call_id = message.call_id().ok_or(Error::MissingHeader("Call-ID"))?;
    let (seq, _) = message.cseq().ok_or(Error::MissingHeader("CSeq"))?;

    let mut hasher = DefaultHasher::new();
    to.to_string().hash(&mut hasher);
    from.to_string().hash(&mut hasher);
    call_id.hash(&mut hasher);
    seq.hash(&mut hasher);
    is_server.hash(&mut hasher);
    Ok(format!("derived.{:016x}", hasher.finish()))
}

/// The tuple RFC 3261 Section 8.2.2.2 compares for loop detection: two
/// transactions are duplicates when To-URI, From-URI, Call-ID, CSeq
/// number, From-tag and role all match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopDetectionTuple {
    pub to_uri: String,
    pub from_uri: String,
    pub call_id: String,
    pub cseq: u32,
    pub from_tag: Option<String>,
    pub is_server: bool,
}

impl LoopDetectionTuple {
    pub fn from_message(message: &SipMessage, is_server: bool) -> Option<LoopDetectionTuple> {
        let to_uri = message.to_header()?.as_address()?.uri.to_string();
        let from_uri = message.from_header()?.as_address()?.uri.to_string();
        Some(LoopDetectionTuple {
            to_uri,
            from_uri,
            call_id: message.call_id()?,
            cseq: message.cseq()?.0,
            from_tag: message.from_tag(),
            is_server,
        })
    }
}
