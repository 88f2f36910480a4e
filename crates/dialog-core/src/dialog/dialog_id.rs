//! Dialog identity: `Call-ID | local tag | remote tag`.

use std::fmt;

use serde::{Deserialize, Serialize};
use sipline_sip_core::SipMessage;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DialogId {
    pub call_id: String,
    pub local_tag: String,
    pub remote_tag: String,
}

impl DialogId {
    pub fn new(
        call_id: impl Into<String>,
        local_tag: impl Into<String>,
        remote_tag: impl Into<String>,
    ) -> Self {
        DialogId {
            call_id: call_id.into(),
            local_tag: local_tag.into(),
            remote_tag: remote_tag.into(),
        }
    }

    /// Id of the dialog an inbound request belongs to: from the receiving
    /// side's perspective the To tag is local and the From tag remote.
    pub fn from_inbound_request(request: &SipMessage) -> Option<DialogId> {
        Some(DialogId::new(
            request.call_id()?,
            request.to_tag()?,
            request.from_tag()?,
        ))
    }

    /// Id of the dialog an inbound response belongs to: the From tag is
    /// ours, the To tag is the peer's.
    pub fn from_inbound_response(response: &SipMessage) -> Option<DialogId> {
        Some(DialogId::new(
            response.call_id()?,
            response.from_tag()?,
            response.to_tag()?,
        ))
    }
}

impl fmt::Display for DialogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.call_id, self.local_tag, self.remote_tag)
    }
}
