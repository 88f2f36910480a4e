//! Transaction layer error types.

use thiserror::Error;

use crate::key::TransactionKey;

#[derive(Error, Debug)]
pub enum Error {
    #[error("SIP core error: {0}")]
    Core(#[from] sipline_sip_core::Error),

    #[error("transport error: {0}")]
    Transport(#[from] sipline_sip_transport::Error),

    #[error("transaction not found: {0}")]
    TransactionNotFound(TransactionKey),

    #[error("invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: crate::transaction::TransactionState,
        to: crate::transaction::TransactionState,
    },

    #[error("{0} is required on the message")]
    MissingHeader(&'static str),

    #[error("transaction channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, Error>;
