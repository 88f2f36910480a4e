//! Transport error types.

use std::net::SocketAddr;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport is closed")]
    TransportClosed,

    #[error("send to {destination} failed: {message}")]
    SendFailed {
        destination: SocketAddr,
        message: String,
    },

    #[error("message exceeds datagram size: {0} bytes")]
    MessageTooLarge(usize),
}

pub type Result<T> = std::result::Result<T, Error>;
