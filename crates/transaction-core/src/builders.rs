//! Requests the transaction layer constructs itself.
//!
//! The ACK for a non-2xx final response belongs to the INVITE
//! transaction (RFC 3261 17.1.1.3); CANCEL reuses the identifiers of
//! the request it cancels (Section 9.1). Headers copied between
//! messages are deep clones, never shared.

use sipline_sip_core::{Header, HeaderName, Method, SipMessage};

use crate::error::{Error, Result};

/// Build the ACK for a non-2xx final response to `request`.
///
/// The To header comes from the response so the ACK carries the tag the
/// UAS assigned; everything else mirrors the original INVITE, including
/// its top Via branch so the ACK matches the same transaction.
pub fn ack_for_non_2xx(request: &SipMessage, response: &SipMessage) -> Result<SipMessage> {
    let uri = request
        .request_uri()
        .ok_or(Error::MissingHeader("Request-URI"))?
        .clone();
    let (seq, _) = request.cseq().ok_or(Error::MissingHeader("CSeq"))?;
    let via = request
        .via_top()
        .ok_or(Error::MissingHeader("Via"))?
        .clone();
    let to = response
        .to_header()
        .or_else(|| request.to_header())
        .ok_or(Error::MissingHeader("To"))?
        .clone();
    let from = request
        .from_header()
        .ok_or(Error::MissingHeader("From"))?
        .clone();
    let call_id = request
        .header(&HeaderName::CallId)
        .ok_or(Error::MissingHeader("Call-ID"))?
        .clone();

    let mut ack = SipMessage::new_request(Method::Ack, uri);
    ack.push_header(Header::via(via));
    ack.push_header(Header::raw(HeaderName::MaxForwards, 70));
    ack.push_header(from);
    ack.push_header(to);
    ack.push_header(call_id);
    ack.push_header(Header::cseq(seq, Method::Ack));
    for route in request.headers_named(&HeaderName::Route) {
        ack.push_header(route.clone());
    }
    Ok(ack)
}

/// Build a CANCEL for a pending `request`.
///
/// Same Request-URI, Via branch, From, To (without any tag learned from
/// responses), Call-ID and CSeq number as the request being cancelled,
/// with the method swapped to CANCEL.
pub fn cancel_for(request: &SipMessage) -> Result<SipMessage> {
    let uri = request
        .request_uri()
        .ok_or(Error::MissingHeader("Request-URI"))?
        .clone();
    let (seq, _) = request.cseq().ok_or(Error::MissingHeader("CSeq"))?;
    let via = request
        .via_top()
        .ok_or(Error::MissingHeader("Via"))?
        .clone();
    let to = request
        .to_header()
        .ok_or(Error::MissingHeader("To"))?
        .clone();
    let from = request
        .from_header()
        .ok_or(Error::MissingHeader("From"))?
        .clone();
    let call_id = request
        .header(&HeaderName::CallId)
        .ok_or(Error::MissingHeader("Call-ID"))?
        .clone();

    let mut cancel = SipMessage::new_request(Method::Cancel, uri);
    cancel.push_header(Header::via(via));
    cancel.push_header(Header::raw(HeaderName::MaxForwards, 70));
    cancel.push_header(from);
    cancel.push_header(to);
    cancel.push_header(call_id);
    cancel.push_header(Header::cseq(seq, Method::Cancel));
    for route in request.headers_named(&HeaderName::Route) {
        cancel.push_header(route.clone());
    }
    Ok(cancel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sipline_sip_core::parse_message;

    fn invite() -> SipMessage {
        let raw = b"INVITE sip:bob@example.com SIP/2.0\r\n\
            Via: SIP/2.0/UDP client.example.com:5060;branch=z9hG4bK74bf9\r\n\
            Max-Forwards: 70\r\n\
            From: Alice <sip:alice@example.com>;tag=9fxced76sl\r\n\
            To: Bob <sip:bob@example.com>\r\n\
            Call-ID: 3848276298220188511@client.example.com\r\n\
            CSeq: 1 INVITE\r\n\
            Route: <sip:proxy.example.com;lr>\r\n\
            Content-Length: 0\r\n\r\n";
        parse_message(raw).unwrap()
    }

    #[test]
    fn ack_copies_branch_and_response_to_tag() {
        let request = invite();
        let mut response =
            SipMessage::response_to(&request, sipline_sip_core::StatusCode::BUSY_HERE);
        response
            .header_mut(&HeaderName::To)
            .unwrap()
            .set_param(sipline_sip_core::Param::Tag("8321234356".into()));

        let ack = ack_for_non_2xx(&request, &response).unwrap();
        assert_eq!(ack.method(), Some(Method::Ack));
        assert_eq!(
            ack.via_top().unwrap().branch().as_deref(),
            Some("z9hG4bK74bf9")
        );
        assert_eq!(ack.to_tag().as_deref(), Some("8321234356"));
        assert_eq!(ack.cseq(), Some((1, Method::Ack)));
        assert_eq!(ack.headers_named(&HeaderName::Route).len(), 1);
    }

    #[test]
    fn cancel_keeps_identifiers_and_swaps_method() {
        let request = invite();
        let cancel = cancel_for(&request).unwrap();
        assert_eq!(cancel.method(), Some(Method::Cancel));
        assert_eq!(
            cancel.via_top().unwrap().branch(),
            request.via_top().unwrap().branch()
        );
        assert_eq!(cancel.cseq(), Some((1, Method::Cancel)));
        assert_eq!(cancel.to_tag(), None);
        assert_eq!(cancel.call_id(), request.call_id());
    }
}
