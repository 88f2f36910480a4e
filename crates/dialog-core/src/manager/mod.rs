//! The stack router: dialogs, out-of-dialog user agents, and the
//! classification of everything the transaction layer could not match.
//!
//! One pump task consumes `TransactionEvent`s. Application callbacks run
//! on that task, so every registry guard is dropped before a callback is
//! awaited; the registries themselves are sharded maps and safe to touch
//! from API calls made inside a callback.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use sipline_sip_core::{Header, HeaderName, Method, SipMessage, StatusCode, Uri, Via};
use sipline_sip_transport::{Transport, TransportEvent};
use sipline_transaction_core::{
    ResponseArg, TransactionEvent, TransactionKey, TransactionManager,
};

use crate::auth::{challenge_headers, Authenticator, Challenge};
use crate::config::StackConfig;
use crate::dialog::{Dialog, DialogId, RequestVerdict};
use crate::errors::{DialogError, DialogResult};
use crate::events::AppHandler;
use crate::user_agent::UserAgent;

/// Methods advertised in canned `Allow` headers.
const ALLOWED_METHODS: &str = "INVITE, ACK, CANCEL, OPTIONS, BYE, REGISTER";

/// One SIP stack instance: transaction layer, dialog registry and the
/// application boundary, bound to a single transport.
#[derive(Clone)]
pub struct SipStack {
    inner: Arc<StackInner>,
}

struct StackInner {
    config: StackConfig,
    transactions: Arc<TransactionManager>,
    dialogs: DashMap<DialogId, Dialog>,
    /// Out-of-dialog client attempts, keyed by transaction key string.
    user_agents: DashMap<String, UserAgent>,
    /// Route headers learned from a 2xx REGISTER's Service-Route.
    service_route: Mutex<Vec<Header>>,
    handler: Arc<dyn AppHandler>,
    authenticator: Option<Arc<dyn Authenticator>>,
}

impl SipStack {
    pub fn new(
        transport: Arc<dyn Transport>,
        transport_rx: mpsc::Receiver<TransportEvent>,
        config: StackConfig,
        handler: Arc<dyn AppHandler>,
        authenticator: Option<Arc<dyn Authenticator>>,
    ) -> SipStack {
        let (transactions, events_rx) =
            TransactionManager::new(transport, transport_rx, config.timers);
        let inner = Arc::new(StackInner {
            config,
            transactions,
            dialogs: DashMap::new(),
            user_agents: DashMap::new(),
            service_route: Mutex::new(Vec::new()),
            handler,
            authenticator,
        });
        tokio::spawn(run_event_pump(inner.clone(), events_rx));
        SipStack { inner }
    }

    pub fn config(&self) -> &StackConfig {
        &self.inner.config
    }

    /// Send an out-of-dialog request to one destination.
    pub fn send_request(
        &self,
        request: SipMessage,
        destination: SocketAddr,
    ) -> DialogResult<TransactionKey> {
        self.send_request_with_candidates(request, vec![destination])
    }

    /// Send an out-of-dialog request; on timeout or transport failure the
    /// next candidate is tried with a fresh branch.
    pub fn send_request_with_candidates(
        &self,
        request: SipMessage,
        candidates: Vec<SocketAddr>,
    ) -> DialogResult<TransactionKey> {
        let mut ua = UserAgent::new(request, candidates);
        let destination = match self.inner.config.outbound_proxy {
            Some(proxy) => proxy,
            None => ua.next_candidate().ok_or(DialogError::NoDestination)?,
        };
        start_attempt(&self.inner, ua, destination)
    }

    /// Send the next request inside an established dialog.
    pub fn send_dialog_request(
        &self,
        id: &DialogId,
        method: Method,
    ) -> DialogResult<TransactionKey> {
        let (request, destination) = {
            let mut dialog = self
                .inner
                .dialogs
                .get_mut(id)
                .ok_or_else(|| DialogError::DialogNotFound(id.clone()))?;
            let request = dialog.create_request(method)?;
            let destination = self
                .inner
                .config
                .outbound_proxy
                .or_else(|| resolve_uri(dialog.next_hop()))
                .ok_or(DialogError::NoDestination)?;
            (request, destination)
        };
        let key = self
            .inner
            .transactions
            .create_client_transaction(request, destination)?;
        if let Some(mut dialog) = self.inner.dialogs.get_mut(id) {
            dialog.client_transactions.push(key.clone());
        }
        Ok(key)
    }

    /// Send a response on a server transaction, maintaining dialog state
    /// as a side effect: a 2xx to an INVITE establishes the UAS dialog,
    /// a 2xx to a BYE tears it down.
    pub async fn send_response(
        &self,
        key: &TransactionKey,
        response: ResponseArg,
    ) -> DialogResult<()> {
        let request = self.inner.transactions.request(key);
        let status = match &response {
            ResponseArg::Status(status) => *status,
            ResponseArg::Message(message) => {
                message.status().unwrap_or(StatusCode::SERVER_INTERNAL_ERROR)
            }
        };

        let mut created: Option<DialogId> = None;
        let mut terminated: Option<DialogId> = None;
        if let Some(request) = &request {
            let method = request.method();
            if status.is_success() && method == Some(Method::Invite) && key.is_server {
                if let ResponseArg::Message(message) = &response {
                    match Dialog::create_as_uas(request, message) {
                        Ok(dialog) => {
                            let id = dialog.id.clone();
                            info!(dialog = %id, "UAS dialog established");
                            self.inner.dialogs.insert(id.clone(), dialog);
                            created = Some(id);
                        }
                        Err(error) => {
                            debug!(%error, "2xx INVITE without dialog-forming headers");
                        }
                    }
                }
            }
            if let Some(id) = DialogId::from_inbound_request(request) {
                if status.is_success() && method == Some(Method::Bye) {
                    if let Some((_, mut dialog)) = self.inner.dialogs.remove(&id) {
                        dialog.sent_response(&SipMessage::response_to(request, status), key);
                        terminated = Some(id);
                    }
                } else if let Some(mut dialog) = self.inner.dialogs.get_mut(&id) {
                    if status.is_final() {
                        dialog.server_transactions.retain(|k| k != key);
                    }
                }
            }
        }

        self.inner.transactions.send_response(key, response).await?;
        if let Some(id) = created {
            self.inner.handler.dialog_created(id).await;
        }
        if let Some(id) = terminated {
            self.inner.handler.dialog_terminated(id).await;
        }
        Ok(())
    }

    /// Cancel a pending client INVITE. The CANCEL reuses the INVITE's
    /// branch and travels as its own transaction; the peer answers the
    /// INVITE itself with 487.
    pub fn cancel(&self, invite_key: &TransactionKey) -> DialogResult<TransactionKey> {
        let invite = self
            .inner
            .transactions
            .request(invite_key)
            .ok_or_else(|| {
                DialogError::Transaction(sipline_transaction_core::Error::TransactionNotFound(
                    invite_key.clone(),
                ))
            })?;
        let destination = self
            .inner
            .transactions
            .destination(invite_key)
            .ok_or(DialogError::NoDestination)?;
        let cancel = sipline_transaction_core::builders::cancel_for(&invite)
            .map_err(DialogError::Transaction)?;
        let key = self
            .inner
            .transactions
            .create_client_transaction(cancel, destination)?;
        Ok(key)
    }

    /// Snapshot of a dialog, mainly for tests and introspection.
    pub fn dialog(&self, id: &DialogId) -> Option<Dialog> {
        self.inner.dialogs.get(id).map(|d| d.clone())
    }

    pub fn dialog_count(&self) -> usize {
        self.inner.dialogs.len()
    }

    /// Drop a dialog without any signaling.
    pub async fn terminate_dialog(&self, id: &DialogId) {
        if self.inner.dialogs.remove(id).is_some() {
            self.inner.handler.dialog_terminated(id.clone()).await;
        }
    }
}

fn start_attempt(
    inner: &Arc<StackInner>,
    ua: UserAgent,
    destination: SocketAddr,
) -> DialogResult<TransactionKey> {
    let mut request = ua.request.clone();
    apply_service_route(inner, &mut request);
    if request.header(&HeaderName::UserAgent).is_none() {
        request.push_header(Header::raw(
            HeaderName::UserAgent,
            &inner.config.user_agent,
        ));
    }
    let key = inner
        .transactions
        .create_client_transaction(request, destination)?;
    inner.user_agents.insert(key.to_string(), ua);
    Ok(key)
}

/// Append captured Service-Route entries as Route headers on requests
/// that leave the dialog layer, unless the caller routed explicitly.
fn apply_service_route(inner: &Arc<StackInner>, request: &mut SipMessage) {
    match request.method() {
        Some(Method::Register) | Some(Method::Ack) | None => return,
        _ => {}
    }
    if !request.headers_named(&HeaderName::Route).is_empty() {
        return;
    }
    let routes = inner.service_route.lock().expect("service_route poisoned");
    for route in routes.iter() {
        request.push_header(route.clone());
    }
}

/// Literal-host resolution; DNS belongs to the transport collaborator.
fn resolve_uri(uri: &Uri) -> Option<SocketAddr> {
    let (host, port) = uri.host_port()?;
    let ip = host
        .trim_matches(|c| c == '[' || c == ']')
        .parse::<std::net::IpAddr>()
        .ok()?;
    Some(SocketAddr::new(ip, port))
}

fn stamp_via(inner: &Arc<StackInner>, message: &mut SipMessage) -> DialogResult<()> {
    let transport = inner.transactions.transport();
    let local = transport.local_addr()?;
    let protocol = if transport.is_reliable() { "TCP" } else { "UDP" };
    let via = Via::for_request(protocol, &local.ip().to_string(), Some(local.port()));
    message.push_via_front(via);
    Ok(())
}

/// ACK a 2xx on the dialog's behalf. The ACK is its own message outside
/// any transaction; 2xx retransmissions re-enter here and are re-ACKed.
async fn send_dialog_ack(
    inner: &Arc<StackInner>,
    id: &DialogId,
    fallback: Option<SocketAddr>,
) -> DialogResult<()> {
    let (ack, destination) = {
        let mut dialog = inner
            .dialogs
            .get_mut(id)
            .ok_or_else(|| DialogError::DialogNotFound(id.clone()))?;
        let mut ack = dialog.create_ack()?;
        stamp_via(inner, &mut ack)?;
        let destination = inner
            .config
            .outbound_proxy
            .or_else(|| resolve_uri(dialog.next_hop()))
            .or(fallback)
            .ok_or(DialogError::NoDestination)?;
        (ack, destination)
    };
    inner
        .transactions
        .transport()
        .send_message(ack, destination)
        .await?;
    Ok(())
}

async fn run_event_pump(
    inner: Arc<StackInner>,
    mut events_rx: mpsc::Receiver<TransactionEvent>,
) {
    while let Some(event) = events_rx.recv().await {
        match event {
            // State changes are observable through the manager; new
            // server requests were already dispatched when adopted.
            TransactionEvent::StateChanged { .. } | TransactionEvent::NewRequest { .. } => {}
            TransactionEvent::ProvisionalResponse { key, response } => {
                inner.handler.received_response(key, response).await;
            }
            TransactionEvent::FinalResponse { key, response } => {
                on_final_response(&inner, key, response).await;
            }
            TransactionEvent::AckReceived { key, request } => {
                if let Some(id) = DialogId::from_inbound_request(&request) {
                    if let Some(mut dialog) = inner.dialogs.get_mut(&id) {
                        dialog.received_request(&request, &key);
                    }
                }
                inner.handler.received_request(key, request).await;
            }
            TransactionEvent::Timeout { key } => {
                on_attempt_failure(&inner, key, None).await;
            }
            TransactionEvent::TransportError { key, error } => {
                on_attempt_failure(&inner, key, Some(error)).await;
            }
            TransactionEvent::Terminated { key } => {
                inner.user_agents.remove(&key.to_string());
            }
            TransactionEvent::UnmatchedRequest { request, source } => {
                if let Err(error) = on_unmatched_request(&inner, request, source).await {
                    warn!(%error, "failed to dispatch inbound request");
                }
            }
            TransactionEvent::UnmatchedResponse { response, source } => {
                on_unmatched_response(&inner, response, source).await;
            }
        }
    }
}

async fn on_final_response(inner: &Arc<StackInner>, key: TransactionKey, response: SipMessage) {
    let status = response.status().unwrap_or(StatusCode::SERVER_INTERNAL_ERROR);
    let method = response.method();

    // Out-of-dialog attempt?
    if let Some((_, mut ua)) = inner.user_agents.remove(&key.to_string()) {
        ua.last_response = Some(response.clone());

        if challenge_headers(status).is_some() {
            match try_auth_retry(inner, ua, &key, &response).await {
                Ok(true) => return,
                Ok(false) => {}
                Err(error) => warn!(%error, "authentication retry failed"),
            }
            inner.handler.received_response(key, response).await;
            return;
        }

        if status.is_success() && method == Some(Method::Register) {
            capture_service_route(inner, &response);
        }

        if status.is_success() && method == Some(Method::Invite) {
            match Dialog::create_as_uac(&ua.request, &response) {
                Ok(dialog) => {
                    let id = dialog.id.clone();
                    info!(dialog = %id, "UAC dialog established");
                    inner.dialogs.insert(id.clone(), dialog);
                    if inner.config.auto_ack {
                        let fallback = inner.transactions.destination(&key);
                        if let Err(error) = send_dialog_ack(inner, &id, fallback).await {
                            warn!(%error, dialog = %id, "failed to ACK 2xx");
                        }
                    }
                    inner.handler.dialog_created(id).await;
                }
                Err(error) => debug!(%error, "2xx INVITE without dialog-forming headers"),
            }
        }

        inner.handler.received_response(key, response).await;
        return;
    }

    // In-dialog client transaction.
    let mut torn_down: Option<DialogId> = None;
    if let Some(id) = DialogId::from_inbound_response(&response) {
        if let Some(mut dialog) = inner.dialogs.get_mut(&id) {
            if dialog.received_response(&response, &key) {
                torn_down = Some(id.clone());
            } else if status.is_success()
                && method == Some(Method::Invite)
                && inner.config.auto_ack
            {
                drop(dialog);
                if let Err(error) = send_dialog_ack(inner, &id, None).await {
                    warn!(%error, dialog = %id, "failed to ACK re-INVITE 2xx");
                }
            }
        }
    }
    if let Some(id) = torn_down {
        inner.dialogs.remove(&id);
        inner.handler.dialog_terminated(id).await;
    }
    inner.handler.received_response(key, response).await;
}

/// Timer B/F or a transport failure: advance to the next destination
/// candidate, or surface the failure.
async fn on_attempt_failure(inner: &Arc<StackInner>, key: TransactionKey, error: Option<String>) {
    if let Some((_, mut ua)) = inner.user_agents.remove(&key.to_string()) {
        if let Some(next) = ua.next_candidate() {
            debug!(key = %key, %next, "retrying on next destination candidate");
            match start_attempt(inner, ua, next) {
                Ok(_) => return,
                Err(retry_error) => {
                    warn!(%retry_error, "candidate retry failed to start");
                }
            }
        }
    }
    match error {
        Some(reason) => inner.handler.error(Some(key), reason).await,
        None => inner.handler.timeout(key).await,
    }
}

/// One credential retry per realm. Returns true when a retry was issued.
async fn try_auth_retry(
    inner: &Arc<StackInner>,
    mut ua: UserAgent,
    key: &TransactionKey,
    response: &SipMessage,
) -> DialogResult<bool> {
    let status = response.status().unwrap_or(StatusCode::SERVER_INTERNAL_ERROR);
    let Some((challenge_name, credential_name)) = challenge_headers(status) else {
        return Ok(false);
    };
    let Some(challenge) = response
        .header(&challenge_name)
        .and_then(Challenge::from_header)
    else {
        return Ok(false);
    };
    let Some(realm) = challenge.realm.clone() else {
        return Ok(false);
    };
    if ua.realm_already_attempted(&realm, &credential_name) {
        debug!(%realm, "realm already attempted, surfacing challenge");
        return Ok(false);
    }
    let Some(authenticator) = inner.authenticator.clone() else {
        return Ok(false);
    };
    let Some(credentials) = inner.handler.authenticate(&challenge).await else {
        return Ok(false);
    };
    let Some(method) = ua.request.method() else {
        return Ok(false);
    };
    let Some(uri) = ua.request.request_uri().cloned() else {
        return Ok(false);
    };
    let Some(value) = authenticator.credential_value(&challenge, &credentials, &method, &uri)
    else {
        return Ok(false);
    };

    let (seq, cseq_method) = ua
        .request
        .cseq()
        .ok_or(DialogError::MissingHeader("CSeq"))?;
    ua.request.remove_headers(&credential_name);
    ua.request
        .push_header(Header::raw(credential_name.clone(), value));
    ua.request.remove_headers(&HeaderName::CSeq);
    ua.request.push_header(Header::cseq(seq + 1, cseq_method));
    ua.mark_realm_attempted(realm, credential_name);

    let destination = inner
        .transactions
        .destination(key)
        .or(inner.config.outbound_proxy)
        .ok_or(DialogError::NoDestination)?;
    start_attempt(inner, ua, destination)?;
    Ok(true)
}

fn capture_service_route(inner: &Arc<StackInner>, response: &SipMessage) {
    let captured: Vec<Header> = response
        .headers_named(&HeaderName::ServiceRoute)
        .iter()
        .map(|h| {
            let mut route = (*h).clone();
            route.name = HeaderName::Route;
            route
        })
        .collect();
    if !captured.is_empty() {
        debug!(count = captured.len(), "service route captured from REGISTER");
        let mut routes = inner.service_route.lock().expect("service_route poisoned");
        *routes = captured;
    }
}

async fn on_unmatched_request(
    inner: &Arc<StackInner>,
    request: SipMessage,
    source: SocketAddr,
) -> DialogResult<()> {
    let Some(method) = request.method() else {
        return Ok(());
    };

    match method {
        // An ACK here acknowledges a 2xx; anything stray is dropped
        // silently per RFC 3261 17.2.1.
        Method::Ack => {
            if let Some(id) = DialogId::from_inbound_request(&request) {
                let delivered = {
                    match inner.dialogs.get_mut(&id) {
                        Some(mut dialog) => {
                            if let Ok(key) = TransactionKey::from_message(&request, true) {
                                dialog.received_request(&request, &key);
                            }
                            true
                        }
                        None => false,
                    }
                };
                if delivered {
                    let key = TransactionKey::from_message(&request, true)?;
                    inner.handler.received_request(key, request).await;
                    return Ok(());
                }
            }
            trace!("stray ACK dropped");
            return Ok(());
        }
        // A CANCEL answers 200 on its own transaction; the matched
        // INVITE answers 487 on its own, cooperatively.
        Method::Cancel => {
            let invite_key = request
                .via_top()
                .and_then(|v| v.branch())
                .map(|b| TransactionKey::new(b, Method::Invite, true))
                .filter(|k| inner.transactions.state(k).is_some());
            let cancel_key = inner
                .transactions
                .create_server_transaction(request, source)?;
            match invite_key {
                Some(invite_key) => {
                    inner
                        .transactions
                        .send_response(&cancel_key, ResponseArg::Status(StatusCode::OK))
                        .await?;
                    inner
                        .transactions
                        .send_response(
                            &invite_key,
                            ResponseArg::Status(StatusCode::REQUEST_TERMINATED),
                        )
                        .await?;
                    inner.handler.cancelled(invite_key).await;
                }
                None => {
                    inner
                        .transactions
                        .send_response(
                            &cancel_key,
                            ResponseArg::Status(StatusCode::CALL_TRANSACTION_DOES_NOT_EXIST),
                        )
                        .await?;
                }
            }
            return Ok(());
        }
        _ => {}
    }

    if inner.transactions.is_looped_request(&request) {
        let key = inner
            .transactions
            .create_server_transaction(request, source)?;
        inner
            .transactions
            .send_response(&key, ResponseArg::Status(StatusCode::LOOP_DETECTED))
            .await?;
        return Ok(());
    }

    // In-dialog request (To carries a tag).
    if let Some(id) = DialogId::from_inbound_request(&request) {
        if inner.dialogs.contains_key(&id) {
            let key = inner
                .transactions
                .create_server_transaction(request.clone(), source)?;
            let verdict = match inner.dialogs.get_mut(&id) {
                Some(mut dialog) => dialog.received_request(&request, &key),
                None => RequestVerdict::Deliver,
            };
            match verdict {
                RequestVerdict::RejectOutOfOrder => {
                    inner
                        .transactions
                        .send_response(
                            &key,
                            ResponseArg::Status(StatusCode::SERVER_INTERNAL_ERROR),
                        )
                        .await?;
                }
                _ => {
                    inner.handler.received_request(key, request).await;
                }
            }
            return Ok(());
        }
        let key = inner
            .transactions
            .create_server_transaction(request, source)?;
        inner
            .transactions
            .send_response(
                &key,
                ResponseArg::Status(StatusCode::CALL_TRANSACTION_DOES_NOT_EXIST),
            )
            .await?;
        return Ok(());
    }

    // New out-of-dialog request: the application decides first.
    if inner.handler.create_server_user_agent(&request).await {
        let key = inner
            .transactions
            .create_server_transaction(request.clone(), source)?;
        inner.handler.received_request(key, request).await;
        return Ok(());
    }

    // Canned handling for requests nobody wants.
    let key = inner
        .transactions
        .create_server_transaction(request.clone(), source)?;
    let mut response = SipMessage::response_to(
        &request,
        if method == Method::Options {
            StatusCode::OK
        } else {
            StatusCode::METHOD_NOT_ALLOWED
        },
    );
    response.push_header(Header::raw(HeaderName::Allow, ALLOWED_METHODS));
    inner
        .transactions
        .send_response(&key, ResponseArg::Message(response))
        .await?;
    Ok(())
}

/// A response with no transaction: the interesting case is a 2xx INVITE
/// retransmission after the client transaction terminated, which must
/// reach the dialog so the ACK is resent.
async fn on_unmatched_response(
    inner: &Arc<StackInner>,
    response: SipMessage,
    source: SocketAddr,
) {
    let is_invite_2xx =
        response.is_success() && response.method() == Some(Method::Invite);
    if is_invite_2xx {
        if let Some(id) = DialogId::from_inbound_response(&response) {
            if inner.dialogs.contains_key(&id) && inner.config.auto_ack {
                if let Err(error) = send_dialog_ack(inner, &id, Some(source)).await {
                    warn!(%error, dialog = %id, "failed to re-ACK 2xx retransmission");
                }
                return;
            }
        }
    }
    trace!(status = ?response.status(), "unmatched response dropped");
}
