//! Transaction kinds, states, shared data and the per-transaction task.
//!
//! Each transaction is a small actor: a spawned task owning a mailbox of
//! [`InternalTransactionCommand`]s. Inbound messages, TU-initiated
//! responses and timer expiries all enter through the mailbox, so a
//! transaction's state and timer table have exactly one writer.

pub mod client_invite;
pub mod client_non_invite;
pub mod runner;
pub mod server_invite;
pub mod server_non_invite;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use sipline_sip_core::{Method, SipMessage, StatusCode};
use sipline_sip_transport::Transport;

use crate::error::{Error, Result};
use crate::events::TransactionEvent;
use crate::key::TransactionKey;
use crate::timer::TimerSettings;

/// Capacity of a transaction's command mailbox.
const COMMAND_CAPACITY: usize = 32;

/// Which of the four RFC 3261 Section 17 machines a transaction runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    InviteClient,
    NonInviteClient,
    InviteServer,
    NonInviteServer,
}

impl TransactionKind {
    pub fn is_server(&self) -> bool {
        matches!(
            self,
            TransactionKind::InviteServer | TransactionKind::NonInviteServer
        )
    }

    /// The state a freshly created transaction starts in.
    pub fn initial_state(&self) -> TransactionState {
        match self {
            TransactionKind::InviteClient => TransactionState::Calling,
            TransactionKind::NonInviteClient => TransactionState::Trying,
            TransactionKind::InviteServer => TransactionState::Proceeding,
            TransactionKind::NonInviteServer => TransactionState::Trying,
        }
    }

    /// For a request, pick the machine from the method and role.
    pub fn for_request(method: &Method, is_server: bool) -> TransactionKind {
        match (method, is_server) {
            (Method::Invite, false) => TransactionKind::InviteClient,
            (Method::Invite, true) => TransactionKind::InviteServer,
            (_, false) => TransactionKind::NonInviteClient,
            (_, true) => TransactionKind::NonInviteServer,
        }
    }
}

/// Transaction states across all four machines. Each machine uses its
/// own subset; `validate_transition` rejects moves a machine never makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionState {
    Calling,
    Trying,
    Proceeding,
    Completed,
    Confirmed,
    Terminated,
}

/// Lock-free state cell shared between the runner task and observers.
#[derive(Debug)]
pub struct AtomicTransactionState(AtomicU8);

impl AtomicTransactionState {
    pub fn new(state: TransactionState) -> Self {
        AtomicTransactionState(AtomicU8::new(state as u8))
    }

    pub fn get(&self) -> TransactionState {
        match self.0.load(Ordering::SeqCst) {
            0 => TransactionState::Calling,
            1 => TransactionState::Trying,
            2 => TransactionState::Proceeding,
            3 => TransactionState::Completed,
            4 => TransactionState::Confirmed,
            _ => TransactionState::Terminated,
        }
    }

    /// Set and return the previous state.
    pub fn set(&self, state: TransactionState) -> TransactionState {
        let previous = self.0.swap(state as u8, Ordering::SeqCst);
        match previous {
            0 => TransactionState::Calling,
            1 => TransactionState::Trying,
            2 => TransactionState::Proceeding,
            3 => TransactionState::Completed,
            4 => TransactionState::Confirmed,
            _ => TransactionState::Terminated,
        }
    }

    /// Reject transitions no machine of this kind ever makes.
    pub fn validate_transition(
        kind: TransactionKind,
        from: TransactionState,
        to: TransactionState,
    ) -> Result<()> {
        use TransactionKind::*;
        use TransactionState::*;
        let valid = match (kind, from, to) {
            // Terminated is absorbing; anything may reach it.
            (_, _, Terminated) => true,
            (InviteClient, Calling, Proceeding) => true,
            (InviteClient, Calling, Completed) => true,
            (InviteClient, Proceeding, Completed) => true,
            (NonInviteClient, Trying, Proceeding) => true,
            (NonInviteClient, Trying, Completed) => true,
            (NonInviteClient, Proceeding, Completed) => true,
            (InviteServer, Proceeding, Completed) => true,
            (InviteServer, Completed, Confirmed) => true,
            (NonInviteServer, Trying, Proceeding) => true,
            (NonInviteServer, Trying, Completed) => true,
            (NonInviteServer, Proceeding, Completed) => true,
            _ => false,
        };
        if valid {
            Ok(())
        } else {
            Err(Error::InvalidTransition { from, to })
        }
    }
}

/// A response handed to the single response-sending entry point: either
/// a bare status (the transaction builds the response from its request)
/// or a fully prebuilt message.
#[derive(Debug)]
pub enum ResponseArg {
    Status(StatusCode),
    Message(SipMessage),
}

/// Commands entering a transaction's mailbox.
#[derive(Debug)]
pub enum InternalTransactionCommand {
    /// A matched inbound message (request retransmission, ACK, response).
    ProcessMessage(SipMessage),
    /// A named timer fired.
    Timer(&'static str),
    /// The TU wants a response sent (server transactions only).
    SendResponse(ResponseArg),
    /// A transport-level send failed outside the mailbox context.
    TransportError(String),
    /// Tear down immediately.
    Terminate,
}

/// Data shared between a transaction's runner task, its manager entry
/// and its timers.
pub struct TransactionData {
    pub key: TransactionKey,
    pub kind: TransactionKind,
    pub state: AtomicTransactionState,
    /// The request this transaction owns (client: the one sent; server:
    /// the one received).
    pub request: SipMessage,
    /// Where client requests and ACKs go.
    pub destination: SocketAddr,
    pub transport: Arc<dyn Transport>,
    /// Last response sent (server side), resent on retransmitted requests.
    pub last_response: Mutex<Option<SipMessage>>,
    pub events_tx: mpsc::Sender<TransactionEvent>,
    pub cmd_tx: mpsc::Sender<InternalTransactionCommand>,
    pub settings: TimerSettings,
    /// Source address of the original request (server side).
    pub source: SocketAddr,
}

impl TransactionData {
    pub fn reliable(&self) -> bool {
        self.transport.is_reliable()
    }

    /// Send the owned request to the transaction's destination.
    pub async fn send_request(&self) -> Result<()> {
        self.transport
            .send_message(self.request.clone(), self.destination)
            .await?;
        Ok(())
    }

    /// Send a response back toward the request's source, honoring the
    /// top Via's received/rport on the way out.
    pub async fn send_response(&self, response: &SipMessage) -> Result<()> {
        let destination = response_destination(response).unwrap_or(self.source);
        self.transport
            .send_message(response.clone(), destination)
            .await?;
        Ok(())
    }

    /// Store and send a response, remembering it for retransmissions.
    pub async fn send_and_store_response(&self, response: SipMessage) -> Result<()> {
        self.send_response(&response).await?;
        let mut last = self.last_response.lock().expect("last_response poisoned");
        *last = Some(response);
        Ok(())
    }

    /// Resend the stored last response, if any.
    pub async fn resend_last_response(&self) -> Result<()> {
        let response = {
            let last = self.last_response.lock().expect("last_response poisoned");
            last.clone()
        };
        if let Some(response) = response {
            self.send_response(&response).await?;
        }
        Ok(())
    }

    /// Materialize a `ResponseArg` against the owned request.
    pub fn build_response(&self, arg: ResponseArg) -> SipMessage {
        match arg {
            ResponseArg::Status(status) => SipMessage::response_to(&self.request, status),
            ResponseArg::Message(message) => message,
        }
    }
}

/// Destination a response should be sent to, from its top Via.
pub fn response_destination(response: &SipMessage) -> Option<SocketAddr> {
    let via = response.via_top()?;
    let (host, port) = via.delivery_target();
    // The transport collaborator owns DNS; here only literal addresses
    // resolve. Non-literal hosts fall back to the request's source.
    let ip = host.trim_matches(|c| c == '[' || c == ']').parse().ok()?;
    Some(SocketAddr::new(ip, port))
}

/// Spawn the runner task for a transaction. Returns the mailbox sender.
pub fn spawn(
    data: Arc<TransactionData>,
    cmd_rx: mpsc::Receiver<InternalTransactionCommand>,
) -> mpsc::Sender<InternalTransactionCommand> {
    let cmd_tx = data.cmd_tx.clone();
    tokio::spawn(runner::run_transaction_loop(data, cmd_rx));
    cmd_tx
}

/// Create the shared data plus its mailbox for a new transaction.
#[allow(clippy::too_many_arguments)]
pub fn new_transaction_data(
    key: TransactionKey,
    kind: TransactionKind,
    request: SipMessage,
    destination: SocketAddr,
    source: SocketAddr,
    transport: Arc<dyn Transport>,
    events_tx: mpsc::Sender<TransactionEvent>,
    settings: TimerSettings,
) -> (Arc<TransactionData>, mpsc::Receiver<InternalTransactionCommand>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CAPACITY);
    let data = Arc::new(TransactionData {
        key,
        state: AtomicTransactionState::new(kind.initial_state()),
        kind,
        request,
        destination,
        transport,
        last_response: Mutex::new(None),
        events_tx,
        cmd_tx,
        settings,
        source,
    });
    (data, cmd_rx)
}
