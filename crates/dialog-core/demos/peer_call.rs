//! Two stacks call each other over the in-memory transport: INVITE,
//! 200 with an answer tag, automatic ACK, then a BYE teardown.
//!
//! Run with `cargo run -p sipline-dialog-core --example peer_call`.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

use sipline_dialog_core::{AppHandler, DialogId, SipStack, StackConfig};
use sipline_sip_core::{
    parse_message, Address, Header, HeaderName, Method, Param, SipMessage, StatusCode, Uri,
};
use sipline_sip_transport::ChannelTransport;
use sipline_transaction_core::{ResponseArg, TransactionKey};

const ALICE: u16 = 5060;
const BOB: u16 = 5061;

fn addr(port: u16) -> SocketAddr {
    format!("127.0.0.1:{port}").parse().unwrap()
}

enum PeerEvent {
    Request(TransactionKey, SipMessage),
    DialogCreated(DialogId),
    DialogTerminated(DialogId),
}

struct Peer {
    name: &'static str,
    events: mpsc::UnboundedSender<PeerEvent>,
}

#[async_trait]
impl AppHandler for Peer {
    async fn received_request(&self, key: TransactionKey, request: SipMessage) {
        info!(peer = self.name, method = ?request.method(), "request");
        let _ = self.events.send(PeerEvent::Request(key, request));
    }

    async fn received_response(&self, _key: TransactionKey, response: SipMessage) {
        info!(peer = self.name, status = ?response.status(), "response");
    }

    async fn create_server_user_agent(&self, _request: &SipMessage) -> bool {
        true
    }

    async fn dialog_created(&self, id: DialogId) {
        info!(peer = self.name, dialog = %id, "dialog created");
        let _ = self.events.send(PeerEvent::DialogCreated(id));
    }

    async fn dialog_terminated(&self, id: DialogId) {
        info!(peer = self.name, dialog = %id, "dialog terminated");
        let _ = self.events.send(PeerEvent::DialogTerminated(id));
    }
}

fn peer(name: &'static str) -> (Arc<Peer>, mpsc::UnboundedReceiver<PeerEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(Peer { name, events: tx }), rx)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let ((alice_transport, alice_rx), (bob_transport, bob_rx)) =
        ChannelTransport::pair(addr(ALICE), addr(BOB));

    let (alice_handler, mut alice_events) = peer("alice");
    let alice = SipStack::new(
        Arc::new(alice_transport),
        alice_rx,
        StackConfig::default(),
        alice_handler,
        None,
    );

    let (bob_handler, mut bob_events) = peer("bob");
    let bob = SipStack::new(
        Arc::new(bob_transport),
        bob_rx,
        StackConfig::default(),
        bob_handler,
        None,
    );

    let raw = format!(
        "INVITE sip:bob@127.0.0.1:{BOB} SIP/2.0\r\n\
         Max-Forwards: 70\r\n\
         From: <sip:alice@127.0.0.1:{ALICE}>;tag=alice-1\r\n\
         To: <sip:bob@127.0.0.1:{BOB}>\r\n\
         Call-ID: demo-call-1@127.0.0.1\r\n\
         CSeq: 1 INVITE\r\n\
         Contact: <sip:alice@127.0.0.1:{ALICE}>\r\n\
         Content-Length: 0\r\n\r\n"
    );
    let invite = parse_message(raw.as_bytes()).expect("well-formed INVITE");
    alice
        .send_request(invite, addr(BOB))
        .expect("INVITE accepted by the stack");

    // Bob answers the INVITE with a tagged 200 and a Contact.
    let invite_key = loop {
        match bob_events.recv().await.expect("bob handler alive") {
            PeerEvent::Request(key, request) if request.method() == Some(Method::Invite) => {
                let mut ok = SipMessage::response_to(&request, StatusCode::OK);
                ok.header_mut(&HeaderName::To)
                    .expect("To header present")
                    .set_param(Param::Tag("bob-1".to_string()));
                let contact: Uri = format!("sip:bob@127.0.0.1:{BOB}").parse().unwrap();
                ok.push_header(Header::address(HeaderName::Contact, Address::new(contact)));
                bob.send_response(&key, ResponseArg::Message(ok))
                    .await
                    .expect("200 sent");
                break key;
            }
            _ => continue,
        }
    };
    info!(key = %invite_key, "bob answered");

    // Wait for the caller's dialog, then hang up from the caller side.
    let dialog_id = loop {
        match alice_events.recv().await.expect("alice handler alive") {
            PeerEvent::DialogCreated(id) => break id,
            _ => continue,
        }
    };
    alice
        .send_dialog_request(&dialog_id, Method::Bye)
        .expect("BYE accepted by the stack");

    // Bob confirms the BYE; both dialogs disappear.
    loop {
        match bob_events.recv().await.expect("bob handler alive") {
            PeerEvent::Request(key, request) if request.method() == Some(Method::Bye) => {
                bob.send_response(&key, ResponseArg::Status(StatusCode::OK))
                    .await
                    .expect("200 to BYE sent");
            }
            PeerEvent::DialogTerminated(_) => break,
            _ => continue,
        }
    }
    loop {
        match alice_events.recv().await.expect("alice handler alive") {
            PeerEvent::DialogTerminated(_) => break,
            _ => continue,
        }
    }

    info!(
        alice_dialogs = alice.dialog_count(),
        bob_dialogs = bob.dialog_count(),
        "call complete"
    );
}
