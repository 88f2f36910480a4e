//! The transport abstraction the transaction layer sends through.

pub mod channel;
pub mod udp;

use std::fmt::Debug;
use std::net::SocketAddr;

use async_trait::async_trait;
use sipline_sip_core::SipMessage;

use crate::error::Result;

/// Events a transport delivers to the stack.
#[derive(Debug)]
pub enum TransportEvent {
    /// A complete, parseable SIP message arrived.
    MessageReceived {
        message: SipMessage,
        source: SocketAddr,
        destination: SocketAddr,
    },
    /// The transport hit an error it could not attribute to one send.
    Error { error: String },
    /// The transport shut down.
    Closed,
}

/// A bidirectional SIP transport.
///
/// Sending is fire-and-forget from the state machines' point of view;
/// inbound traffic arrives on the event channel returned at bind time.
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Serialize and send a message to the destination.
    async fn send_message(&self, message: SipMessage, destination: SocketAddr) -> Result<()>;

    /// Local address this transport is bound to.
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Reliable transports (TCP, TLS, SCTP) suppress the retransmission
    /// timers and collapse the wait states.
    fn is_reliable(&self) -> bool {
        false
    }

    fn is_closed(&self) -> bool;

    /// Close the transport; subsequent sends fail.
    async fn close(&self) -> Result<()>;
}
