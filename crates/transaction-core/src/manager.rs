//! Transaction registry and message router.
//!
//! The manager owns one transport, keeps every live transaction in a
//! registry keyed by its branch id, pumps transport events into the
//! matching transaction mailbox, and forwards transaction events to the
//! TU. Anything that matches no transaction is surfaced as an
//! `UnmatchedRequest`/`UnmatchedResponse` event for the layer above to
//! classify.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use sipline_sip_core::{HeaderName, HeaderValue, Method, Param, SipMessage, Via};
use sipline_sip_transport::{Transport, TransportEvent};

use crate::error::{Error, Result};
use crate::events::TransactionEvent;
use crate::key::{LoopDetectionTuple, TransactionKey};
use crate::timer::TimerSettings;
use crate::transaction::{
    new_transaction_data, spawn, InternalTransactionCommand, ResponseArg, TransactionData,
    TransactionKind, TransactionState,
};

/// Capacity of the event channels between transactions, manager and TU.
const EVENT_CAPACITY: usize = 128;

struct TransactionHandle {
    data: Arc<TransactionData>,
    cmd_tx: mpsc::Sender<InternalTransactionCommand>,
}

type Registry = Arc<Mutex<HashMap<String, TransactionHandle>>>;

/// The transaction layer entry point.
pub struct TransactionManager {
    transport: Arc<dyn Transport>,
    registry: Registry,
    events_tx: mpsc::Sender<TransactionEvent>,
    settings: TimerSettings,
}

impl TransactionManager {
    /// Create a manager over `transport`, consuming its event stream.
    /// Returns the manager and the TU-facing event receiver.
    pub fn new(
        transport: Arc<dyn Transport>,
        transport_rx: mpsc::Receiver<TransportEvent>,
        settings: TimerSettings,
    ) -> (Arc<TransactionManager>, mpsc::Receiver<TransactionEvent>) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        let (tu_tx, tu_rx) = mpsc::channel(EVENT_CAPACITY);

        let manager = Arc::new(TransactionManager {
            transport,
            registry: Arc::new(Mutex::new(HashMap::new())),
            events_tx,
            settings,
        });

        tokio::spawn(pump_events(manager.registry.clone(), events_rx, tu_tx));
        tokio::spawn(pump_transport(manager.clone(), transport_rx));

        (manager, tu_rx)
    }

    pub fn settings(&self) -> TimerSettings {
        self.settings
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }

    /// Start a client transaction for `request` toward `destination`.
    ///
    /// If the request carries no Via it gets one stamped with the
    /// transport's local address and a fresh branch.
    pub fn create_client_transaction(
        &self,
        mut request: SipMessage,
        destination: SocketAddr,
    ) -> Result<TransactionKey> {
        self.ensure_via(&mut request)?;
        let method = request.method().ok_or(Error::MissingHeader("request line"))?;
        let key = TransactionKey::from_message(&request, false)?;
        let kind = TransactionKind::for_request(&method, false);
        self.start_transaction(key.clone(), kind, request, destination, destination)?;
        Ok(key)
    }

    /// Adopt an unmatched inbound request as a new server transaction.
    pub fn create_server_transaction(
        &self,
        request: SipMessage,
        source: SocketAddr,
    ) -> Result<TransactionKey> {
        let method = request.method().ok_or(Error::MissingHeader("request line"))?;
        let key = TransactionKey::from_message(&request, true)?;
        let kind = TransactionKind::for_request(&method, true);
        self.start_transaction(key.clone(), kind, request, source, source)?;
        Ok(key)
    }

    /// Hand a response to a server transaction for sending.
    pub async fn send_response(&self, key: &TransactionKey, response: ResponseArg) -> Result<()> {
        let cmd_tx = self
            .lookup(key)
            .ok_or_else(|| Error::TransactionNotFound(key.clone()))?;
        cmd_tx
            .send(InternalTransactionCommand::SendResponse(response))
            .await
            .map_err(|_| Error::ChannelClosed)
    }

    /// Force a transaction to Terminated.
    pub async fn terminate(&self, key: &TransactionKey) -> Result<()> {
        let cmd_tx = self
            .lookup(key)
            .ok_or_else(|| Error::TransactionNotFound(key.clone()))?;
        cmd_tx
            .send(InternalTransactionCommand::Terminate)
            .await
            .map_err(|_| Error::ChannelClosed)
    }

    /// Current state of a transaction, if it is still registered.
    pub fn state(&self, key: &TransactionKey) -> Option<TransactionState> {
        let registry = self.registry.lock().expect("registry poisoned");
        registry.get(&key.to_string()).map(|h| h.data.state.get())
    }

    /// The request a registered transaction owns (deep copy).
    pub fn request(&self, key: &TransactionKey) -> Option<SipMessage> {
        let registry = self.registry.lock().expect("registry poisoned");
        registry.get(&key.to_string()).map(|h| h.data.request.clone())
    }

    /// The destination a registered client transaction sends toward.
    pub fn destination(&self, key: &TransactionKey) -> Option<SocketAddr> {
        let registry = self.registry.lock().expect("registry poisoned");
        registry.get(&key.to_string()).map(|h| h.data.destination)
    }

    /// True when a live server transaction carries the same
    /// (To-URI, From-URI, Call-ID, CSeq, From-tag) tuple as `request`
    /// under a different branch: the request looped through us.
    pub fn is_looped_request(&self, request: &SipMessage) -> bool {
        let Some(tuple) = LoopDetectionTuple::from_message(request, true) else {
            return false;
        };
        let branch = request.via_top().and_then(|v| v.branch());
        let registry = self.registry.lock().expect("registry poisoned");
        registry.values().any(|handle| {
            handle.data.key.is_server
                && Some(&handle.data.key.branch) != branch.as_ref()
                && LoopDetectionTuple::from_message(&handle.data.request, true).as_ref()
                    == Some(&tuple)
        })
    }

    /// Route one inbound message to its transaction, or report it up.
    pub async fn handle_message(&self, mut message: SipMessage, source: SocketAddr) {
        if message.is_request() {
            stamp_received(&mut message, source);
            self.handle_request(message, source).await;
        } else {
            self.handle_response(message, source).await;
        }
    }

    async fn handle_request(&self, request: SipMessage, source: SocketAddr) {
        let branch = request.via_top().and_then(|v| v.branch());
        let method = request.method();

        // An ACK for a non-2xx final matches the INVITE server
        // transaction it acknowledges (same branch, Completed state).
        if method == Some(Method::Ack) {
            if let Some(branch) = &branch {
                let invite_key = TransactionKey::new(branch.clone(), Method::Invite, true);
                if let Some(cmd_tx) = self.lookup(&invite_key) {
                    let _ = cmd_tx
                        .send(InternalTransactionCommand::ProcessMessage(request))
                        .await;
                    return;
                }
            }
            // ACK for a 2xx: the dialog layer owns it.
            self.report_unmatched_request(request, source).await;
            return;
        }

        match TransactionKey::from_message(&request, true) {
            Ok(key) => {
                if let Some(cmd_tx) = self.lookup(&key) {
                    trace!(key = %key, "request retransmission absorbed");
                    let _ = cmd_tx
                        .send(InternalTransactionCommand::ProcessMessage(request))
                        .await;
                } else {
                    self.report_unmatched_request(request, source).await;
                }
            }
            Err(error) => {
                warn!(%error, "dropping unkeyable request");
            }
        }
    }

    async fn handle_response(&self, response: SipMessage, source: SocketAddr) {
        match TransactionKey::from_message(&response, false) {
            Ok(key) => {
                if let Some(cmd_tx) = self.lookup(&key) {
                    let _ = cmd_tx
                        .send(InternalTransactionCommand::ProcessMessage(response))
                        .await;
                } else {
                    debug!(key = %key, "response matched no transaction");
                    let _ = self
                        .events_tx
                        .send(TransactionEvent::UnmatchedResponse { response, source })
                        .await;
                }
            }
            Err(error) => {
                warn!(%error, "dropping unkeyable response");
            }
        }
    }

    async fn report_unmatched_request(&self, request: SipMessage, source: SocketAddr) {
        let _ = self
            .events_tx
            .send(TransactionEvent::UnmatchedRequest { request, source })
            .await;
    }

    fn start_transaction(
        &self,
        key: TransactionKey,
        kind: TransactionKind,
        request: SipMessage,
        destination: SocketAddr,
        source: SocketAddr,
    ) -> Result<()> {
        let (data, cmd_rx) = new_transaction_data(
            key.clone(),
            kind,
            request,
            destination,
            source,
            self.transport.clone(),
            self.events_tx.clone(),
            self.settings,
        );
        let cmd_tx = spawn(data.clone(), cmd_rx);
        debug!(key = %key, ?kind, "transaction started");
        let mut registry = self.registry.lock().expect("registry poisoned");
        registry.insert(key.to_string(), TransactionHandle { data, cmd_tx });
        Ok(())
    }

    fn lookup(&self, key: &TransactionKey) -> Option<mpsc::Sender<InternalTransactionCommand>> {
        let registry = self.registry.lock().expect("registry poisoned");
        registry.get(&key.to_string()).map(|h| h.cmd_tx.clone())
    }

    fn ensure_via(&self, request: &mut SipMessage) -> Result<()> {
        if request.via_top().is_none() {
            let local = self.transport.local_addr()?;
            let protocol = if self.transport.is_reliable() {
                "TCP"
            } else {
                "UDP"
            };
            let via = Via::for_request(protocol, &local.ip().to_string(), Some(local.port()));
            request.push_via_front(via);
        }
        Ok(())
    }
}

/// Stamp the top Via of an inbound request per RFC 3261 18.2.1: record
/// the actual source address in `received` when it differs from the
/// sent-by host, and fill in `rport` when the sender asked for it.
fn stamp_received(request: &mut SipMessage, source: SocketAddr) {
    let Some(header) = request.header_mut(&HeaderName::Via) else {
        return;
    };
    let HeaderValue::Via(via) = &mut header.value else {
        return;
    };
    let host_matches_source = via
        .host
        .trim_matches(|c| c == '[' || c == ']')
        .parse::<std::net::IpAddr>()
        .map(|ip| ip == source.ip())
        .unwrap_or(false);
    if !host_matches_source {
        via.set_param(Param::Received(source.ip().to_string()));
    }
    let rport_requested = via.params.iter().any(|p| p.matches_key("rport"));
    if rport_requested {
        via.set_param(Param::Rport(Some(source.port())));
    }
}

/// Forward transaction events to the TU, unregistering transactions as
/// they terminate.
async fn pump_events(
    registry: Registry,
    mut events_rx: mpsc::Receiver<TransactionEvent>,
    tu_tx: mpsc::Sender<TransactionEvent>,
) {
    while let Some(event) = events_rx.recv().await {
        if let TransactionEvent::Terminated { key } = &event {
            let mut registry = registry.lock().expect("registry poisoned");
            registry.remove(&key.to_string());
        }
        if tu_tx.send(event).await.is_err() {
            break;
        }
    }
}

/// Feed transport traffic into the manager.
async fn pump_transport(
    manager: Arc<TransactionManager>,
    mut transport_rx: mpsc::Receiver<TransportEvent>,
) {
    while let Some(event) = transport_rx.recv().await {
        match event {
            TransportEvent::MessageReceived {
                message, source, ..
            } => {
                manager.handle_message(message, source).await;
            }
            TransportEvent::Error { error } => {
                warn!(%error, "transport error");
            }
            TransportEvent::Closed => break,
        }
    }
}
