//! SIP transport layer for the sipline stack.
//!
//! The transaction layer only needs two capabilities from a transport:
//! send a serialized message to a destination, and deliver received
//! messages (with their source address) on an event channel. This crate
//! defines that contract and ships a UDP implementation plus an
//! in-memory channel pair used throughout the test suites.

pub mod error;
pub mod transport;

pub use error::{Error, Result};
pub use transport::channel::ChannelTransport;
pub use transport::udp::UdpTransport;
pub use transport::{Transport, TransportEvent};

/// Bind a UDP transport to the specified address.
pub async fn bind_udp(
    addr: std::net::SocketAddr,
) -> Result<(UdpTransport, tokio::sync::mpsc::Receiver<TransportEvent>)> {
    UdpTransport::bind(addr, None).await
}

/// Re-export of common types for easier use.
pub mod prelude {
    pub use crate::{bind_udp, ChannelTransport, Error, Result, Transport, TransportEvent, UdpTransport};
}
