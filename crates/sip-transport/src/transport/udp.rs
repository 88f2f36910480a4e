//! UDP transport for SIP messages.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use sipline_sip_core::{parse_message, SipMessage};

use crate::error::{Error, Result};
use crate::transport::{Transport, TransportEvent};

// Default event channel capacity.
const DEFAULT_CHANNEL_CAPACITY: usize = 100;

// Conventional maximum SIP datagram (RFC 3261 Section 18.1.1 suggests
// staying under the path MTU; 65535 is the hard UDP bound we enforce).
const MAX_DATAGRAM: usize = 65_535;

/// UDP transport: one socket shared by the sender and the receive loop.
#[derive(Clone)]
pub struct UdpTransport {
    inner: Arc<UdpInner>,
}

struct UdpInner {
    socket: UdpSocket,
    local_addr: SocketAddr,
    closed: AtomicBool,
}

impl UdpTransport {
    /// Bind to `addr` and start the receive loop. Inbound messages arrive
    /// on the returned event channel.
    pub async fn bind(
        addr: SocketAddr,
        channel_capacity: Option<usize>,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        let capacity = channel_capacity.unwrap_or(DEFAULT_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(capacity);

        let socket = UdpSocket::bind(addr).await?;
        let local_addr = socket.local_addr()?;
        debug!(%local_addr, "SIP UDP transport bound");

        let transport = UdpTransport {
            inner: Arc::new(UdpInner {
                socket,
                local_addr,
                closed: AtomicBool::new(false),
            }),
        };
        transport.spawn_receive_loop(events_tx);
        Ok((transport, events_rx))
    }

    fn spawn_receive_loop(&self, events_tx: mpsc::Sender<TransportEvent>) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            while !inner.closed.load(Ordering::Relaxed) {
                let (len, source) = match inner.socket.recv_from(&mut buf).await {
                    Ok(received) => received,
                    Err(e) => {
                        if inner.closed.load(Ordering::Relaxed) {
                            break;
                        }
                        error!(error = %e, "UDP receive failed");
                        let _ = events_tx
                            .send(TransportEvent::Error {
                                error: e.to_string(),
                            })
                            .await;
                        continue;
                    }
                };

                // Keep-alive CRLF pings are silently ignored.
                let datagram = &buf[..len];
                if datagram.iter().all(|b| matches!(b, b'\r' | b'\n')) {
                    continue;
                }

                // A malformed datagram must never take the stack down:
                // log, count it against no one, and drop it.
                match parse_message(datagram) {
                    Ok(message) => {
                        let event = TransportEvent::MessageReceived {
                            message,
                            source,
                            destination: inner.local_addr,
                        };
                        if events_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(%source, error = %e, "dropping malformed datagram");
                    }
                }
            }
            let _ = events_tx.send(TransportEvent::Closed).await;
        });
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send_message(&self, message: SipMessage, destination: SocketAddr) -> Result<()> {
        if self.is_closed() {
            return Err(Error::TransportClosed);
        }
        let bytes = message.to_bytes();
        if bytes.len() > MAX_DATAGRAM {
            return Err(Error::MessageTooLarge(bytes.len()));
        }
        let sent = self
            .inner
            .socket
            .send_to(&bytes, destination)
            .await
            .map_err(|e| Error::SendFailed {
                destination,
                message: e.to_string(),
            })?;
        debug!(%destination, bytes = sent, "sent SIP message");
        Ok(())
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr)
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Relaxed)
    }

    async fn close(&self) -> Result<()> {
        self.inner.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

impl fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UdpTransport")
            .field("local_addr", &self.inner.local_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sipline_sip_core::prelude::*;

    fn options_request() -> SipMessage {
        let mut msg = SipMessage::new_request(Method::Options, Uri::sip_user("bob", "biloxi.com"));
        msg.push_via_front(Via::for_request("udp", "127.0.0.1", Some(5060)));
        msg.push_header(Header::address(
            HeaderName::To,
            Address::new(Uri::sip_user("bob", "biloxi.com")),
        ));
        let mut from = Header::address(
            HeaderName::From,
            Address::new(Uri::sip_user("alice", "atlanta.com")),
        );
        from.set_param(Param::Tag("xyz".into()));
        msg.push_header(from);
        msg.push_header(Header::raw(HeaderName::CallId, "udp-test@localhost"));
        msg.push_header(Header::cseq(1, Method::Options));
        msg
    }

    #[tokio::test]
    async fn sends_and_receives_between_sockets() {
        let (a, _rx_a) = UdpTransport::bind("127.0.0.1:0".parse().unwrap(), None)
            .await
            .unwrap();
        let (b, mut rx_b) = UdpTransport::bind("127.0.0.1:0".parse().unwrap(), None)
            .await
            .unwrap();

        a.send_message(options_request(), b.local_addr().unwrap())
            .await
            .unwrap();

        match rx_b.recv().await.unwrap() {
            TransportEvent::MessageReceived { message, .. } => {
                assert_eq!(message.method(), Some(Method::Options));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_datagrams_are_dropped() {
        let (a, _rx_a) = UdpTransport::bind("127.0.0.1:0".parse().unwrap(), None)
            .await
            .unwrap();
        let (b, mut rx_b) = UdpTransport::bind("127.0.0.1:0".parse().unwrap(), None)
            .await
            .unwrap();

        // Raw socket junk first, then a valid message.
        a.inner
            .socket
            .send_to(b"this is not sip\r\n\r\n", b.local_addr().unwrap())
            .await
            .unwrap();
        a.send_message(options_request(), b.local_addr().unwrap())
            .await
            .unwrap();

        match rx_b.recv().await.unwrap() {
            TransportEvent::MessageReceived { message, .. } => {
                assert_eq!(message.method(), Some(Method::Options));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
