//! In-memory transport pair for tests and loopback wiring.
//!
//! Two cross-connected endpoints: what one side sends shows up as a
//! `MessageReceived` event on the other. Loss is simulated by arming
//! `drop_next`, which swallows the next n sends without error, exactly
//! what a lost datagram looks like to the sender.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::trace;

use sipline_sip_core::SipMessage;

use crate::error::{Error, Result};
use crate::transport::{Transport, TransportEvent};

const CHANNEL_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct ChannelTransport {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    peer_tx: mpsc::Sender<TransportEvent>,
    closed: AtomicBool,
    reliable: bool,
    drop_next: AtomicUsize,
    sent: AtomicUsize,
}

impl ChannelTransport {
    /// Build a cross-connected pair of endpoints.
    pub fn pair(
        addr_a: SocketAddr,
        addr_b: SocketAddr,
    ) -> (
        (ChannelTransport, mpsc::Receiver<TransportEvent>),
        (ChannelTransport, mpsc::Receiver<TransportEvent>),
    ) {
        Self::pair_with_reliability(addr_a, addr_b, false)
    }

    /// Same as [`ChannelTransport::pair`] but reporting `is_reliable`,
    /// for exercising the reliable-transport timer rules.
    pub fn pair_with_reliability(
        addr_a: SocketAddr,
        addr_b: SocketAddr,
        reliable: bool,
    ) -> (
        (ChannelTransport, mpsc::Receiver<TransportEvent>),
        (ChannelTransport, mpsc::Receiver<TransportEvent>),
    ) {
        let (tx_a, rx_a) = mpsc::channel(CHANNEL_CAPACITY);
        let (tx_b, rx_b) = mpsc::channel(CHANNEL_CAPACITY);
        let a = ChannelTransport {
            inner: Arc::new(ChannelInner {
                local_addr: addr_a,
                peer_addr: addr_b,
                peer_tx: tx_b,
                closed: AtomicBool::new(false),
                reliable,
                drop_next: AtomicUsize::new(0),
                sent: AtomicUsize::new(0),
            }),
        };
        let b = ChannelTransport {
            inner: Arc::new(ChannelInner {
                local_addr: addr_b,
                peer_addr: addr_a,
                peer_tx: tx_a,
                closed: AtomicBool::new(false),
                reliable,
                drop_next: AtomicUsize::new(0),
                sent: AtomicUsize::new(0),
            }),
        };
        ((a, rx_a), (b, rx_b))
    }

    /// Swallow the next `n` sends from this endpoint.
    pub fn drop_next(&self, n: usize) {
        self.inner.drop_next.store(n, Ordering::SeqCst);
    }

    /// Number of sends attempted (including dropped ones).
    pub fn sent_count(&self) -> usize {
        self.inner.sent.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send_message(&self, message: SipMessage, destination: SocketAddr) -> Result<()> {
        if self.is_closed() {
            return Err(Error::TransportClosed);
        }
        self.inner.sent.fetch_add(1, Ordering::SeqCst);

        // Simulated loss: the send "succeeds" but nothing arrives.
        let pending_drops = self.inner.drop_next.load(Ordering::SeqCst);
        if pending_drops > 0 {
            self.inner.drop_next.store(pending_drops - 1, Ordering::SeqCst);
            trace!(%destination, "channel transport dropping message");
            return Ok(());
        }

        // Round trip through the wire form so tests see exactly what a
        // real peer would.
        let reparsed = sipline_sip_core::parse_message(&message.to_bytes())
            .map_err(|e| Error::SendFailed {
                destination,
                message: format!("unserializable message: {e}"),
            })?;

        self.inner
            .peer_tx
            .send(TransportEvent::MessageReceived {
                message: reparsed,
                source: self.inner.local_addr,
                destination: self.inner.peer_addr,
            })
            .await
            .map_err(|_| Error::SendFailed {
                destination,
                message: "peer endpoint dropped".to_string(),
            })
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr)
    }

    fn is_reliable(&self) -> bool {
        self.inner.reliable
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Relaxed)
    }

    async fn close(&self) -> Result<()> {
        self.inner.closed.store(true, Ordering::Relaxed);
        let _ = self.inner.peer_tx.send(TransportEvent::Closed).await;
        Ok(())
    }
}

impl fmt::Debug for ChannelTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelTransport")
            .field("local_addr", &self.inner.local_addr)
            .field("peer_addr", &self.inner.peer_addr)
            .field("reliable", &self.inner.reliable)
            .finish()
    }
}
