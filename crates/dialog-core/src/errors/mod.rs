//! Dialog layer error types.

use thiserror::Error;

use crate::dialog::DialogId;

#[derive(Error, Debug)]
pub enum DialogError {
    #[error("SIP core error: {0}")]
    Core(#[from] sipline_sip_core::Error),

    #[error("transaction layer error: {0}")]
    Transaction(#[from] sipline_transaction_core::Error),

    #[error("transport error: {0}")]
    Transport(#[from] sipline_sip_transport::Error),

    #[error("dialog not found: {0}")]
    DialogNotFound(DialogId),

    #[error("dialog {id} already terminated")]
    DialogTerminated { id: DialogId },

    #[error("cannot build a dialog from this message pair: {reason}")]
    IncompleteDialog { reason: &'static str },

    #[error("{0} is required on the message")]
    MissingHeader(&'static str),

    #[error("no destination could be resolved for the message")]
    NoDestination,
}

pub type DialogResult<T> = std::result::Result<T, DialogError>;
