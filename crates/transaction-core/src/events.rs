//! Events the transaction layer reports to its user (the dialog layer
//! or the application).

use std::net::SocketAddr;

use sipline_sip_core::SipMessage;

use crate::key::TransactionKey;
use crate::transaction::TransactionState;

/// Transaction User events.
#[derive(Debug)]
pub enum TransactionEvent {
    /// A transaction changed state.
    StateChanged {
        key: TransactionKey,
        previous: TransactionState,
        new: TransactionState,
    },
    /// A new server transaction accepted a request (sent exactly once;
    /// retransmissions are absorbed by the transaction).
    NewRequest {
        key: TransactionKey,
        request: SipMessage,
        source: SocketAddr,
    },
    /// A client transaction received a provisional response.
    ProvisionalResponse {
        key: TransactionKey,
        response: SipMessage,
    },
    /// A client transaction received a final response.
    FinalResponse {
        key: TransactionKey,
        response: SipMessage,
    },
    /// An INVITE server transaction received its ACK.
    AckReceived {
        key: TransactionKey,
        request: SipMessage,
    },
    /// Timer B or F fired without a final response.
    Timeout { key: TransactionKey },
    /// The transport failed while this transaction was sending.
    TransportError { key: TransactionKey, error: String },
    /// The transaction reached Terminated and left the registry.
    Terminated { key: TransactionKey },
    /// An inbound request matched no transaction; the router above must
    /// classify it (dialog, new server transaction, or canned response).
    UnmatchedRequest {
        request: SipMessage,
        source: SocketAddr,
    },
    /// An inbound response matched no transaction (e.g. a 2xx
    /// retransmission after the INVITE client transaction terminated).
    UnmatchedResponse {
        response: SipMessage,
        source: SocketAddr,
    },
}
