//! Call-leg state and the in-dialog request/response rules.
//!
//! A dialog correlates the transactions of one call leg: tags, a route
//! set learned from Record-Route, the remote target from Contact, and
//! strictly monotonic CSeq counters in both directions. It owns no
//! transport or timers; the stack router feeds it messages and acts on
//! the verdicts it returns.

use sipline_sip_core::{
    Address, Header, HeaderName, Method, Param, SipMessage, StatusCode, Uri,
};
use sipline_transaction_core::TransactionKey;
use tracing::debug;

use crate::errors::{DialogError, DialogResult};

use super::{DialogId, DialogState};

/// What the router should do with an in-dialog request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestVerdict {
    /// CSeq went backwards; answer 500 and change nothing.
    RejectOutOfOrder,
    /// The dialog's ACK arrived; forward to the application.
    Ack,
    /// The peer cancelled a pending request.
    Cancelled,
    /// A regular in-dialog request for the application.
    Deliver,
}

#[derive(Debug, Clone)]
pub struct Dialog {
    pub id: DialogId,
    pub state: DialogState,
    pub local_address: Address,
    pub remote_address: Address,
    pub call_id: String,
    /// Highest CSeq we have used on requests we sent.
    pub local_cseq: u32,
    /// Highest CSeq seen from the peer.
    pub remote_cseq: u32,
    /// Route set in traversal order (already reversed on the UAC side).
    pub route_set: Vec<Uri>,
    pub remote_target: Uri,
    pub is_initiator: bool,
    /// CSeq of the INVITE this dialog answers with ACK.
    pub invite_cseq: u32,
    /// In-flight transactions belonging to this leg.
    pub client_transactions: Vec<TransactionKey>,
    pub server_transactions: Vec<TransactionKey>,
}

impl Dialog {
    /// Build the UAC side of a dialog from the sent request and the
    /// establishing response (RFC 3261 12.1.2).
    pub fn create_as_uac(request: &SipMessage, response: &SipMessage) -> DialogResult<Dialog> {
        let call_id = request
            .call_id()
            .ok_or(DialogError::MissingHeader("Call-ID"))?;
        let local_tag = request
            .from_tag()
            .ok_or(DialogError::IncompleteDialog { reason: "request has no From tag" })?;
        let remote_tag = response
            .to_tag()
            .ok_or(DialogError::IncompleteDialog { reason: "response has no To tag" })?;
        let (cseq, _) = request.cseq().ok_or(DialogError::MissingHeader("CSeq"))?;

        let local_address = address_of(request, &HeaderName::From)?;
        let remote_address = address_of(request, &HeaderName::To)?;

        // Record-Route arrives proxy-nearest-to-UAS first; the UAC
        // traverses it in reverse.
        let mut route_set = record_route_uris(response);
        route_set.reverse();

        let remote_target = response
            .contact_uri()
            .unwrap_or_else(|| remote_address.uri.clone());

        let state = if response.is_provisional() {
            DialogState::Early
        } else {
            DialogState::Confirmed
        };

        Ok(Dialog {
            id: DialogId::new(call_id.clone(), local_tag, remote_tag),
            state,
            local_address,
            remote_address,
            call_id,
            local_cseq: cseq,
            remote_cseq: 0,
            route_set,
            remote_target,
            is_initiator: true,
            invite_cseq: cseq,
            client_transactions: Vec::new(),
            server_transactions: Vec::new(),
        })
    }

    /// Build the UAS side from the received request and the response we
    /// are sending (RFC 3261 12.1.1). The response must carry our tag.
    pub fn create_as_uas(request: &SipMessage, response: &SipMessage) -> DialogResult<Dialog> {
        let call_id = request
            .call_id()
            .ok_or(DialogError::MissingHeader("Call-ID"))?;
        let local_tag = response
            .to_tag()
            .ok_or(DialogError::IncompleteDialog { reason: "response has no To tag" })?;
        let remote_tag = request
            .from_tag()
            .ok_or(DialogError::IncompleteDialog { reason: "request has no From tag" })?;
        let (cseq, _) = request.cseq().ok_or(DialogError::MissingHeader("CSeq"))?;

        // Mirrored roles: the peer's From is our remote, their To is us.
        let local_address = address_of(request, &HeaderName::To)?;
        let remote_address = address_of(request, &HeaderName::From)?;

        let route_set = record_route_uris(request);
        let remote_target = request
            .contact_uri()
            .unwrap_or_else(|| remote_address.uri.clone());

        let state = if response.is_provisional() {
            DialogState::Early
        } else {
            DialogState::Confirmed
        };

        Ok(Dialog {
            id: DialogId::new(call_id.clone(), local_tag, remote_tag),
            state,
            local_address,
            remote_address,
            call_id,
            local_cseq: 0,
            remote_cseq: cseq,
            route_set,
            remote_target,
            is_initiator: false,
            invite_cseq: cseq,
            client_transactions: Vec::new(),
            server_transactions: Vec::new(),
        })
    }

    /// Apply an in-dialog request to the dialog's bookkeeping and tell
    /// the router what to do with it.
    pub fn received_request(&mut self, request: &SipMessage, key: &TransactionKey) -> RequestVerdict {
        let Some((cseq, method)) = request.cseq() else {
            return RequestVerdict::RejectOutOfOrder;
        };

        // ACK and CANCEL share the INVITE's CSeq; everything else must
        // advance strictly.
        let shares_invite_cseq = matches!(method, Method::Ack | Method::Cancel);
        if !shares_invite_cseq && self.remote_cseq != 0 && cseq <= self.remote_cseq {
            debug!(dialog = %self.id, cseq, last = self.remote_cseq, "CSeq regression");
            return RequestVerdict::RejectOutOfOrder;
        }
        if !shares_invite_cseq {
            self.remote_cseq = cseq;
        }

        match method {
            Method::Ack => {
                self.server_transactions.retain(|k| k != key);
                RequestVerdict::Ack
            }
            Method::Cancel => RequestVerdict::Cancelled,
            _ => {
                if let Some(contact) = request.contact_uri() {
                    // Target refresh (re-INVITE and friends).
                    self.remote_target = contact;
                }
                self.server_transactions.push(key.clone());
                RequestVerdict::Deliver
            }
        }
    }

    /// Apply a response for one of this dialog's client transactions.
    /// Returns true when the dialog was torn down by it.
    pub fn received_response(&mut self, response: &SipMessage, key: &TransactionKey) -> bool {
        if response.is_final() {
            self.client_transactions.retain(|k| k != key);
        }
        match response.status() {
            Some(StatusCode::REQUEST_TIMEOUT) | Some(StatusCode::CALL_TRANSACTION_DOES_NOT_EXIST) => {
                self.state = DialogState::Terminated;
                true
            }
            Some(status) if status.is_success() && response.method() == Some(Method::Bye) => {
                self.state = DialogState::Terminated;
                true
            }
            _ => {
                if response.is_success() {
                    self.state = DialogState::Confirmed;
                    if let Some(contact) = response.contact_uri() {
                        self.remote_target = contact;
                    }
                }
                false
            }
        }
    }

    /// Prepare a UAS response within this dialog: our tag on To and the
    /// request's Record-Route reflected back (deep copies).
    pub fn prepare_response(
        &self,
        request: &SipMessage,
        status: StatusCode,
        contact: Option<Uri>,
    ) -> SipMessage {
        let mut response = SipMessage::response_to(request, status);
        if let Some(to) = response.header_mut(&HeaderName::To) {
            to.set_param(Param::Tag(self.id.local_tag.clone()));
        }
        for rr in request.headers_named(&HeaderName::RecordRoute) {
            response.push_header(rr.clone());
        }
        if let Some(contact) = contact {
            response.push_header(Header::address(HeaderName::Contact, Address::new(contact)));
        }
        response
    }

    /// A final response went out on one of our server transactions.
    pub fn sent_response(&mut self, response: &SipMessage, key: &TransactionKey) {
        if response.is_final() {
            self.server_transactions.retain(|k| k != key);
        }
    }

    /// Build the next in-dialog request (RFC 3261 12.2.1.1).
    ///
    /// CSeq advances for everything except ACK and CANCEL, which reuse
    /// the INVITE's number. When the first route is strict (no `lr`) the
    /// request-URI becomes that route and the remote target moves to the
    /// end of the Route list.
    pub fn create_request(&mut self, method: Method) -> DialogResult<SipMessage> {
        if self.state == DialogState::Terminated {
            return Err(DialogError::DialogTerminated { id: self.id.clone() });
        }

        let cseq = match method {
            Method::Ack | Method::Cancel => self.invite_cseq,
            _ => {
                self.local_cseq += 1;
                self.local_cseq
            }
        };
        if method == Method::Invite {
            self.invite_cseq = cseq;
        }

        let mut target = self.remote_target.clone();
        let mut routes = self.route_set.clone();
        if let Some(first) = routes.first() {
            if !first.is_loose_routing() {
                target = routes.remove(0);
                routes.push(self.remote_target.clone());
            }
        }

        let mut request = SipMessage::new_request(method.clone(), target);
        request.push_header(Header::raw(HeaderName::MaxForwards, 70));

        let mut from = Header::address(HeaderName::From, self.local_address.clone());
        from.set_param(Param::Tag(self.id.local_tag.clone()));
        request.push_header(from);

        let mut to = Header::address(HeaderName::To, self.remote_address.clone());
        to.set_param(Param::Tag(self.id.remote_tag.clone()));
        request.push_header(to);

        request.push_header(Header::raw(HeaderName::CallId, &self.call_id));
        request.push_header(Header::cseq(cseq, method));
        for route in routes {
            request.push_header(Header::address(HeaderName::Route, Address::new(route)));
        }
        Ok(request)
    }

    /// Build the ACK for a 2xx within this dialog (RFC 3261 13.2.2.4).
    pub fn create_ack(&mut self) -> DialogResult<SipMessage> {
        self.create_request(Method::Ack)
    }

    /// Destination for the next in-dialog request: the first route when
    /// one exists, otherwise the remote target.
    pub fn next_hop(&self) -> &Uri {
        self.route_set.first().unwrap_or(&self.remote_target)
    }
}

fn address_of(message: &SipMessage, name: &HeaderName) -> DialogResult<Address> {
    message
        .header(name)
        .and_then(|h| h.as_address())
        .cloned()
        .ok_or(DialogError::IncompleteDialog {
            reason: "address header missing or unstructured",
        })
}

fn record_route_uris(message: &SipMessage) -> Vec<Uri> {
    message
        .headers_named(&HeaderName::RecordRoute)
        .iter()
        .filter_map(|h| h.as_address())
        .map(|a| a.uri.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sipline_sip_core::parse_message;

    fn invite() -> SipMessage {
        let raw = b"INVITE sip:bob@example.com SIP/2.0\r\n\
            Via: SIP/2.0/UDP 10.0.0.1:5060;branch=z9hG4bKd1\r\n\
            Max-Forwards: 70\r\n\
            From: Alice <sip:alice@example.com>;tag=uac-1\r\n\
            To: Bob <sip:bob@example.com>\r\n\
            Call-ID: dlg-call-1\r\n\
            CSeq: 10 INVITE\r\n\
            Contact: <sip:alice@10.0.0.1:5060>\r\n\
            Record-Route: <sip:p2.example.com;lr>\r\n\
            Record-Route: <sip:p1.example.com;lr>\r\n\
            Content-Length: 0\r\n\r\n";
        parse_message(raw).unwrap()
    }

    fn ok_response(request: &SipMessage) -> SipMessage {
        let mut response = SipMessage::response_to(request, StatusCode::OK);
        if let Some(to) = response.header_mut(&HeaderName::To) {
            to.set_param(Param::Tag("uas-1".into()));
        }
        let contact: Uri = "sip:bob@10.0.0.2:5060".parse().unwrap();
        response.push_header(Header::address(HeaderName::Contact, Address::new(contact)));
        for rr in request.headers_named(&HeaderName::RecordRoute) {
            response.push_header(rr.clone());
        }
        response
    }

    #[test]
    fn uac_and_uas_sides_agree_on_identity() {
        let request = invite();
        let response = ok_response(&request);

        let uac = Dialog::create_as_uac(&request, &response).unwrap();
        let uas = Dialog::create_as_uas(&request, &response).unwrap();

        assert_eq!(uac.id.call_id, uas.id.call_id);
        assert_eq!(uac.id.local_tag, uas.id.remote_tag);
        assert_eq!(uac.id.remote_tag, uas.id.local_tag);
        assert!(uac.is_initiator);
        assert!(!uas.is_initiator);
        assert_eq!(uac.state, DialogState::Confirmed);
    }

    #[test]
    fn uac_route_set_is_reversed_uas_is_not() {
        let request = invite();
        let response = ok_response(&request);

        let uac = Dialog::create_as_uac(&request, &response).unwrap();
        assert_eq!(uac.route_set[0].host.as_deref(), Some("p1.example.com"));
        assert_eq!(uac.route_set[1].host.as_deref(), Some("p2.example.com"));

        let uas = Dialog::create_as_uas(&request, &response).unwrap();
        assert_eq!(uas.route_set[0].host.as_deref(), Some("p2.example.com"));
    }

    #[test]
    fn cseq_regression_is_rejected_without_state_change() {
        let request = invite();
        let response = ok_response(&request);
        let mut dialog = Dialog::create_as_uas(&request, &response).unwrap();
        assert_eq!(dialog.remote_cseq, 10);

        let raw = b"BYE sip:bob@example.com SIP/2.0\r\n\
            Via: SIP/2.0/UDP 10.0.0.1:5060;branch=z9hG4bKd2\r\n\
            From: <sip:alice@example.com>;tag=uac-1\r\n\
            To: <sip:bob@example.com>;tag=uas-1\r\n\
            Call-ID: dlg-call-1\r\n\
            CSeq: 5 BYE\r\n\
            Content-Length: 0\r\n\r\n";
        let stale = parse_message(raw).unwrap();
        let key = TransactionKey::new("z9hG4bKd2", Method::Bye, true);

        assert_eq!(
            dialog.received_request(&stale, &key),
            RequestVerdict::RejectOutOfOrder
        );
        assert_eq!(dialog.remote_cseq, 10);
    }

    #[test]
    fn create_request_bumps_cseq_and_carries_tags() {
        let request = invite();
        let response = ok_response(&request);
        let mut dialog = Dialog::create_as_uac(&request, &response).unwrap();

        let bye = dialog.create_request(Method::Bye).unwrap();
        assert_eq!(bye.cseq(), Some((11, Method::Bye)));
        assert_eq!(bye.to_tag().as_deref(), Some("uas-1"));
        assert_eq!(bye.from_tag().as_deref(), Some("uac-1"));
        assert_eq!(bye.headers_named(&HeaderName::Route).len(), 2);

        let bye2 = dialog.create_request(Method::Bye).unwrap();
        assert_eq!(bye2.cseq(), Some((12, Method::Bye)));
    }

    #[test]
    fn ack_reuses_invite_cseq() {
        let request = invite();
        let response = ok_response(&request);
        let mut dialog = Dialog::create_as_uac(&request, &response).unwrap();

        let ack = dialog.create_ack().unwrap();
        assert_eq!(ack.cseq(), Some((10, Method::Ack)));
    }

    #[test]
    fn strict_route_rewrites_request_uri() {
        let request = invite();
        let response = ok_response(&request);
        let mut dialog = Dialog::create_as_uac(&request, &response).unwrap();
        // First hop without lr: strict router.
        dialog.route_set[0].remove_param("lr");

        let bye = dialog.create_request(Method::Bye).unwrap();
        assert_eq!(
            bye.request_uri().unwrap().host.as_deref(),
            Some("p1.example.com")
        );
        // The remote target moves to the end of the Route list.
        let routes = bye.headers_named(&HeaderName::Route);
        assert_eq!(routes.len(), 2);
        let last = routes.last().unwrap().as_address().unwrap();
        assert_eq!(last.uri.host.as_deref(), Some("10.0.0.2"));
    }
}
