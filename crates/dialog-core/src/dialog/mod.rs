//! Dialog identity, state and call-leg bookkeeping.

mod dialog_id;
mod dialog_impl;
mod dialog_state;

pub use dialog_id::DialogId;
pub use dialog_impl::{Dialog, RequestVerdict};
pub use dialog_state::DialogState;
