//! Stack-level integration tests. Most run two full `SipStack`s against
//! each other over the in-memory transport; a couple drive one stack
//! from a hand-operated raw endpoint to control exact wire contents.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::timeout;

use sipline_dialog_core::{
    AppHandler, Authenticator, Challenge, Credentials, DialogId, SipStack, StackConfig,
};
use sipline_sip_core::{
    parse_message, Address, Header, HeaderName, Method, Param, SipMessage, StatusCode, Uri,
};
use sipline_sip_transport::{ChannelTransport, Transport, TransportEvent};
use sipline_transaction_core::{ResponseArg, TimerSettings, TransactionKey};

const WAIT: Duration = Duration::from_secs(5);

fn addr(port: u16) -> SocketAddr {
    format!("127.0.0.1:{port}").parse().unwrap()
}

#[derive(Debug)]
enum StackEvent {
    Request {
        key: TransactionKey,
        message: SipMessage,
    },
    Response {
        key: TransactionKey,
        message: SipMessage,
    },
    DialogCreated(DialogId),
    DialogTerminated(DialogId),
    Cancelled(TransactionKey),
    Timeout(TransactionKey),
}

/// Forwards every callback to the test body as a [`StackEvent`].
struct Recorder {
    events: mpsc::UnboundedSender<StackEvent>,
    accept_requests: bool,
    credentials: Option<Credentials>,
}

fn recorder(
    accept_requests: bool,
    credentials: Option<Credentials>,
) -> (Arc<Recorder>, mpsc::UnboundedReceiver<StackEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = Arc::new(Recorder {
        events: tx,
        accept_requests,
        credentials,
    });
    (handler, rx)
}

#[async_trait]
impl AppHandler for Recorder {
    async fn received_request(&self, key: TransactionKey, request: SipMessage) {
        let _ = self.events.send(StackEvent::Request {
            key,
            message: request,
        });
    }

    async fn received_response(&self, key: TransactionKey, response: SipMessage) {
        let _ = self.events.send(StackEvent::Response {
            key,
            message: response,
        });
    }

    async fn timeout(&self, key: TransactionKey) {
        let _ = self.events.send(StackEvent::Timeout(key));
    }

    async fn create_server_user_agent(&self, _request: &SipMessage) -> bool {
        self.accept_requests
    }

    async fn dialog_created(&self, id: DialogId) {
        let _ = self.events.send(StackEvent::DialogCreated(id));
    }

    async fn dialog_terminated(&self, id: DialogId) {
        let _ = self.events.send(StackEvent::DialogTerminated(id));
    }

    async fn cancelled(&self, key: TransactionKey) {
        let _ = self.events.send(StackEvent::Cancelled(key));
    }

    async fn authenticate(&self, _challenge: &Challenge) -> Option<Credentials> {
        self.credentials.clone()
    }
}

/// Emits a syntactically valid credential header without computing a
/// real digest; the stack treats the value as opaque either way.
struct StubAuthenticator;

impl Authenticator for StubAuthenticator {
    fn credential_value(
        &self,
        challenge: &Challenge,
        credentials: &Credentials,
        _method: &Method,
        uri: &Uri,
    ) -> Option<String> {
        let realm = challenge.realm.as_deref()?;
        Some(format!(
            "Digest username=\"{}\", realm=\"{realm}\", uri=\"{uri}\", response=\"deadbeef\"",
            credentials.username
        ))
    }
}

fn fast_config() -> StackConfig {
    StackConfig::default().with_timers(TimerSettings::fast_for_tests())
}

fn build_stack(
    transport: ChannelTransport,
    rx: mpsc::Receiver<TransportEvent>,
    accept_requests: bool,
    credentials: Option<Credentials>,
) -> (SipStack, mpsc::UnboundedReceiver<StackEvent>) {
    let (handler, events) = recorder(accept_requests, credentials);
    let authenticator: Option<Arc<dyn Authenticator>> = Some(Arc::new(StubAuthenticator));
    let stack = SipStack::new(
        Arc::new(transport),
        rx,
        fast_config(),
        handler,
        authenticator,
    );
    (stack, events)
}

fn invite_from_alice(a_port: u16, b_port: u16) -> SipMessage {
    let raw = format!(
        "INVITE sip:bob@127.0.0.1:{b_port} SIP/2.0\r\n\
         Max-Forwards: 70\r\n\
         From: <sip:alice@127.0.0.1:{a_port}>;tag=alice-tag-1\r\n\
         To: <sip:bob@127.0.0.1:{b_port}>\r\n\
         Call-ID: call-{a_port}-{b_port}@127.0.0.1\r\n\
         CSeq: 1 INVITE\r\n\
         Contact: <sip:alice@127.0.0.1:{a_port}>\r\n\
         Content-Length: 0\r\n\r\n"
    );
    parse_message(raw.as_bytes()).unwrap()
}

fn answer_ok(request: &SipMessage, to_tag: &str, contact_port: u16) -> SipMessage {
    let mut response = SipMessage::response_to(request, StatusCode::OK);
    response
        .header_mut(&HeaderName::To)
        .unwrap()
        .set_param(Param::Tag(to_tag.to_string()));
    let contact: Uri = format!("sip:bob@127.0.0.1:{contact_port}")
        .parse()
        .unwrap();
    response.push_header(Header::address(HeaderName::Contact, Address::new(contact)));
    response
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<StackEvent>) -> StackEvent {
    timeout(WAIT, rx.recv())
        .await
        .expect("stack event timed out")
        .expect("handler dropped")
}

async fn next_request(
    rx: &mut mpsc::UnboundedReceiver<StackEvent>,
) -> (TransactionKey, SipMessage) {
    loop {
        if let StackEvent::Request { key, message } = next_event(rx).await {
            return (key, message);
        }
    }
}

async fn next_response(rx: &mut mpsc::UnboundedReceiver<StackEvent>) -> SipMessage {
    loop {
        if let StackEvent::Response { message, .. } = next_event(rx).await {
            return message;
        }
    }
}

async fn next_dialog_created(rx: &mut mpsc::UnboundedReceiver<StackEvent>) -> DialogId {
    loop {
        if let StackEvent::DialogCreated(id) = next_event(rx).await {
            return id;
        }
    }
}

async fn recv_message(rx: &mut mpsc::Receiver<TransportEvent>) -> SipMessage {
    loop {
        match timeout(WAIT, rx.recv()).await.expect("peer timed out") {
            Some(TransportEvent::MessageReceived { message, .. }) => return message,
            Some(_) => continue,
            None => panic!("peer channel closed"),
        }
    }
}

/// Drive a full call setup between two stacks and return both sides.
async fn establish_call(
    a_port: u16,
    b_port: u16,
) -> (
    SipStack,
    mpsc::UnboundedReceiver<StackEvent>,
    SipStack,
    mpsc::UnboundedReceiver<StackEvent>,
    DialogId,
    DialogId,
) {
    let ((ta, rxa), (tb, rxb)) = ChannelTransport::pair(addr(a_port), addr(b_port));
    let (stack_a, mut events_a) = build_stack(ta, rxa, false, None);
    let (stack_b, mut events_b) = build_stack(tb, rxb, true, None);

    stack_a
        .send_request(invite_from_alice(a_port, b_port), addr(b_port))
        .unwrap();

    let (invite_key, invite) = next_request(&mut events_b).await;
    assert_eq!(invite.method(), Some(Method::Invite));

    stack_b
        .send_response(
            &invite_key,
            ResponseArg::Message(answer_ok(&invite, "bob-tag-1", b_port)),
        )
        .await
        .unwrap();

    let id_b = next_dialog_created(&mut events_b).await;
    let id_a = next_dialog_created(&mut events_a).await;

    // The ACK for the 2xx reaches the callee through the dialog.
    let (_, ack) = next_request(&mut events_b).await;
    assert_eq!(ack.method(), Some(Method::Ack));

    (stack_a, events_a, stack_b, events_b, id_a, id_b)
}

#[tokio::test]
async fn call_setup_establishes_mirrored_dialogs() {
    let (stack_a, _events_a, stack_b, _events_b, id_a, id_b) = establish_call(6000, 6001).await;

    // Same peering, opposite perspective.
    assert_eq!(id_a.call_id, id_b.call_id);
    assert_eq!(id_a.local_tag, id_b.remote_tag);
    assert_eq!(id_a.remote_tag, id_b.local_tag);
    assert_eq!(id_a.local_tag, "alice-tag-1");
    assert_eq!(id_a.remote_tag, "bob-tag-1");

    assert_eq!(stack_a.dialog_count(), 1);
    assert_eq!(stack_b.dialog_count(), 1);

    let dialog_a = stack_a.dialog(&id_a).unwrap();
    assert!(dialog_a.is_initiator);
    let dialog_b = stack_b.dialog(&id_b).unwrap();
    assert!(!dialog_b.is_initiator);
}

#[tokio::test]
async fn bye_tears_down_both_sides_with_monotonic_cseq() {
    let (stack_a, mut events_a, stack_b, mut events_b, id_a, _id_b) =
        establish_call(6002, 6003).await;

    stack_a.send_dialog_request(&id_a, Method::Bye).unwrap();

    let (bye_key, bye) = next_request(&mut events_b).await;
    assert_eq!(bye.method(), Some(Method::Bye));
    // The INVITE used CSeq 1; the next in-dialog request must advance.
    assert_eq!(bye.cseq(), Some((2, Method::Bye)));

    stack_b
        .send_response(&bye_key, ResponseArg::Status(StatusCode::OK))
        .await
        .unwrap();

    loop {
        if let StackEvent::DialogTerminated(_) = next_event(&mut events_b).await {
            break;
        }
    }
    loop {
        if let StackEvent::DialogTerminated(id) = next_event(&mut events_a).await {
            assert_eq!(id, id_a);
            break;
        }
    }
    assert_eq!(stack_a.dialog_count(), 0);
    assert_eq!(stack_b.dialog_count(), 0);
}

#[tokio::test]
async fn cancel_gets_487_on_invite_and_200_on_cancel() {
    let ((ta, rxa), (tb, rxb)) = ChannelTransport::pair(addr(6004), addr(6005));
    let (stack_a, mut events_a) = build_stack(ta, rxa, false, None);
    let (_stack_b, mut events_b) = build_stack(tb, rxb, true, None);

    let invite_key = stack_a
        .send_request(invite_from_alice(6004, 6005), addr(6005))
        .unwrap();

    // Callee sees the INVITE but never answers; caller gives up.
    let (_, invite) = next_request(&mut events_b).await;
    assert_eq!(invite.method(), Some(Method::Invite));

    stack_a.cancel(&invite_key).unwrap();

    match next_event(&mut events_b).await {
        StackEvent::Cancelled(key) => {
            assert_eq!(key.method, Method::Invite);
            assert!(key.is_server);
        }
        other => panic!("expected cancellation, got {other:?}"),
    }

    // The caller sees 200 on the CANCEL and 487 on the INVITE itself.
    let mut saw_cancel_ok = false;
    loop {
        let response = next_response(&mut events_a).await;
        match (response.status(), response.cseq()) {
            (Some(StatusCode::OK), Some((_, Method::Cancel))) => saw_cancel_ok = true,
            (Some(StatusCode::REQUEST_TERMINATED), Some((_, Method::Invite))) => break,
            (Some(StatusCode::TRYING), _) => {}
            other => panic!("unexpected response: {other:?}"),
        }
    }
    assert!(saw_cancel_ok);
    assert_eq!(stack_a.dialog_count(), 0);
}

#[tokio::test]
async fn digest_challenge_is_retried_once_per_realm() {
    let ((ta, rxa), (tb, rxb)) = ChannelTransport::pair(addr(6006), addr(6007));
    let (stack_a, mut events_a) =
        build_stack(ta, rxa, false, Some(Credentials::new("alice", "secret")));
    let (stack_b, mut events_b) = build_stack(tb, rxb, true, None);

    let raw = "REGISTER sip:127.0.0.1:6007 SIP/2.0\r\n\
        Max-Forwards: 70\r\n\
        From: <sip:alice@127.0.0.1:6006>;tag=reg-tag-1\r\n\
        To: <sip:alice@127.0.0.1:6006>\r\n\
        Call-ID: reg-call-1@127.0.0.1\r\n\
        CSeq: 1 REGISTER\r\n\
        Content-Length: 0\r\n\r\n";
    stack_a
        .send_request(parse_message(raw.as_bytes()).unwrap(), addr(6007))
        .unwrap();

    let (first_key, first) = next_request(&mut events_b).await;
    assert_eq!(first.method(), Some(Method::Register));
    assert!(first.header(&HeaderName::Authorization).is_none());

    let challenge =
        "Digest realm=\"sip.example.com\", nonce=\"abc123\", algorithm=MD5";
    let mut unauthorized = SipMessage::response_to(&first, StatusCode::UNAUTHORIZED);
    unauthorized.push_header(Header::raw(HeaderName::WwwAuthenticate, challenge));
    stack_b
        .send_response(&first_key, ResponseArg::Message(unauthorized))
        .await
        .unwrap();

    // The retry carries credentials and a bumped CSeq, transparently to
    // the application.
    let (second_key, second) = next_request(&mut events_b).await;
    assert_eq!(second.method(), Some(Method::Register));
    assert_eq!(second.cseq(), Some((2, Method::Register)));
    assert!(second.header(&HeaderName::Authorization).is_some());
    assert_ne!(second_key.branch, first_key.branch);
    assert!(
        events_a.try_recv().is_err(),
        "first challenge must be consumed, not surfaced"
    );

    // A second challenge for the same realm is surfaced untouched.
    let mut unauthorized = SipMessage::response_to(&second, StatusCode::UNAUTHORIZED);
    unauthorized.push_header(Header::raw(HeaderName::WwwAuthenticate, challenge));
    stack_b
        .send_response(&second_key, ResponseArg::Message(unauthorized))
        .await
        .unwrap();

    let surfaced = next_response(&mut events_a).await;
    assert_eq!(surfaced.status(), Some(StatusCode::UNAUTHORIZED));
}

#[tokio::test]
async fn stale_cseq_in_dialog_request_is_rejected() {
    let ((ts, rxs), (peer, mut peer_rx)) = ChannelTransport::pair(addr(6008), addr(6009));
    let (stack, mut events) = build_stack(ts, rxs, true, None);

    let raw = "INVITE sip:service@127.0.0.1:6008 SIP/2.0\r\n\
        Via: SIP/2.0/UDP 127.0.0.1:6009;branch=z9hG4bK-raw-1\r\n\
        Max-Forwards: 70\r\n\
        From: <sip:alice@127.0.0.1:6009>;tag=raw-from-1\r\n\
        To: <sip:service@127.0.0.1:6008>\r\n\
        Call-ID: raw-call-1@127.0.0.1\r\n\
        CSeq: 1 INVITE\r\n\
        Contact: <sip:alice@127.0.0.1:6009>\r\n\
        Content-Length: 0\r\n\r\n";
    let invite = parse_message(raw.as_bytes()).unwrap();
    peer.send_message(invite, addr(6008)).await.unwrap();

    let (invite_key, invite) = next_request(&mut events).await;
    let trying = recv_message(&mut peer_rx).await;
    assert_eq!(trying.status(), Some(StatusCode::TRYING));

    stack
        .send_response(
            &invite_key,
            ResponseArg::Message(answer_ok(&invite, "svc-tag-1", 6008)),
        )
        .await
        .unwrap();
    let ok = recv_message(&mut peer_rx).await;
    assert_eq!(ok.status(), Some(StatusCode::OK));

    let ack = "ACK sip:service@127.0.0.1:6008 SIP/2.0\r\n\
        Via: SIP/2.0/UDP 127.0.0.1:6009;branch=z9hG4bK-raw-2\r\n\
        Max-Forwards: 70\r\n\
        From: <sip:alice@127.0.0.1:6009>;tag=raw-from-1\r\n\
        To: <sip:service@127.0.0.1:6008>;tag=svc-tag-1\r\n\
        Call-ID: raw-call-1@127.0.0.1\r\n\
        CSeq: 1 ACK\r\n\
        Content-Length: 0\r\n\r\n";
    peer.send_message(parse_message(ack.as_bytes()).unwrap(), addr(6008))
        .await
        .unwrap();
    let (_, delivered) = next_request(&mut events).await;
    assert_eq!(delivered.method(), Some(Method::Ack));

    // A BYE that reuses the INVITE's sequence number must be rejected
    // without reaching the application.
    let stale = "BYE sip:service@127.0.0.1:6008 SIP/2.0\r\n\
        Via: SIP/2.0/UDP 127.0.0.1:6009;branch=z9hG4bK-raw-3\r\n\
        Max-Forwards: 70\r\n\
        From: <sip:alice@127.0.0.1:6009>;tag=raw-from-1\r\n\
        To: <sip:service@127.0.0.1:6008>;tag=svc-tag-1\r\n\
        Call-ID: raw-call-1@127.0.0.1\r\n\
        CSeq: 1 BYE\r\n\
        Content-Length: 0\r\n\r\n";
    peer.send_message(parse_message(stale.as_bytes()).unwrap(), addr(6008))
        .await
        .unwrap();
    let rejection = recv_message(&mut peer_rx).await;
    assert_eq!(rejection.status(), Some(StatusCode::SERVER_INTERNAL_ERROR));
    assert_eq!(rejection.cseq(), Some((1, Method::Bye)));

    // The same BYE with the next sequence number goes through.
    let fresh = stale
        .replace("CSeq: 1 BYE", "CSeq: 2 BYE")
        .replace("z9hG4bK-raw-3", "z9hG4bK-raw-4");
    peer.send_message(parse_message(fresh.as_bytes()).unwrap(), addr(6008))
        .await
        .unwrap();
    let (bye_key, bye) = next_request(&mut events).await;
    assert_eq!(bye.cseq(), Some((2, Method::Bye)));
    stack
        .send_response(&bye_key, ResponseArg::Status(StatusCode::OK))
        .await
        .unwrap();
    let ok = recv_message(&mut peer_rx).await;
    assert_eq!(ok.status(), Some(StatusCode::OK));
    assert_eq!(stack.dialog_count(), 0);
}

#[tokio::test]
async fn unwanted_requests_get_canned_responses() {
    let ((ts, rxs), (peer, mut peer_rx)) = ChannelTransport::pair(addr(6010), addr(6011));
    let (_stack, _events) = build_stack(ts, rxs, false, None);

    let options = "OPTIONS sip:service@127.0.0.1:6010 SIP/2.0\r\n\
        Via: SIP/2.0/UDP 127.0.0.1:6011;branch=z9hG4bK-opt-1\r\n\
        Max-Forwards: 70\r\n\
        From: <sip:probe@127.0.0.1:6011>;tag=opt-tag-1\r\n\
        To: <sip:service@127.0.0.1:6010>\r\n\
        Call-ID: opt-call-1@127.0.0.1\r\n\
        CSeq: 1 OPTIONS\r\n\
        Content-Length: 0\r\n\r\n";
    peer.send_message(parse_message(options.as_bytes()).unwrap(), addr(6010))
        .await
        .unwrap();
    let response = recv_message(&mut peer_rx).await;
    assert_eq!(response.status(), Some(StatusCode::OK));
    assert!(response.header(&HeaderName::Allow).is_some());

    let register = "REGISTER sip:127.0.0.1:6010 SIP/2.0\r\n\
        Via: SIP/2.0/UDP 127.0.0.1:6011;branch=z9hG4bK-reg-1\r\n\
        Max-Forwards: 70\r\n\
        From: <sip:probe@127.0.0.1:6011>;tag=reg-tag-1\r\n\
        To: <sip:probe@127.0.0.1:6011>\r\n\
        Call-ID: reg-call-2@127.0.0.1\r\n\
        CSeq: 1 REGISTER\r\n\
        Content-Length: 0\r\n\r\n";
    peer.send_message(parse_message(register.as_bytes()).unwrap(), addr(6010))
        .await
        .unwrap();
    let response = recv_message(&mut peer_rx).await;
    assert_eq!(response.status(), Some(StatusCode::METHOD_NOT_ALLOWED));
}

#[tokio::test]
async fn in_dialog_request_for_unknown_dialog_gets_481() {
    let ((ts, rxs), (peer, mut peer_rx)) = ChannelTransport::pair(addr(6012), addr(6013));
    let (_stack, _events) = build_stack(ts, rxs, true, None);

    // Both tags present but no matching dialog state.
    let bye = "BYE sip:service@127.0.0.1:6012 SIP/2.0\r\n\
        Via: SIP/2.0/UDP 127.0.0.1:6013;branch=z9hG4bK-ghost-1\r\n\
        Max-Forwards: 70\r\n\
        From: <sip:ghost@127.0.0.1:6013>;tag=ghost-from\r\n\
        To: <sip:service@127.0.0.1:6012>;tag=ghost-to\r\n\
        Call-ID: ghost-call-1@127.0.0.1\r\n\
        CSeq: 2 BYE\r\n\
        Content-Length: 0\r\n\r\n";
    peer.send_message(parse_message(bye.as_bytes()).unwrap(), addr(6012))
        .await
        .unwrap();
    let response = recv_message(&mut peer_rx).await;
    assert_eq!(
        response.status(),
        Some(StatusCode::CALL_TRANSACTION_DOES_NOT_EXIST)
    );
}
