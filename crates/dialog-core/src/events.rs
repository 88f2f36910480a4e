//! The application-facing handler interface.
//!
//! The stack drives protocol mechanics; everything resembling policy
//! (answer or reject, which credentials, what to render) is delegated
//! through [`AppHandler`]. Handlers run on the stack's event pump, so
//! implementations should hand heavy work to their own tasks.

use async_trait::async_trait;

use sipline_sip_core::SipMessage;
use sipline_transaction_core::TransactionKey;

use crate::auth::{Challenge, Credentials};
use crate::dialog::DialogId;

#[async_trait]
pub trait AppHandler: Send + Sync {
    /// A request reached the application: a new out-of-dialog request
    /// that was accepted, an in-dialog request, or a dialog's ACK.
    async fn received_request(&self, key: TransactionKey, request: SipMessage);

    /// A response for a client transaction the application started.
    async fn received_response(&self, key: TransactionKey, response: SipMessage);

    /// Timer B/F expired with no final response and no remaining
    /// destination candidates.
    async fn timeout(&self, key: TransactionKey) {
        let _ = key;
    }

    /// A transport-level failure that exhausted recovery options.
    async fn error(&self, key: Option<TransactionKey>, reason: String) {
        let _ = (key, reason);
    }

    /// Whether the application wants to answer this new out-of-dialog
    /// request itself. Returning `false` leaves it to canned handling
    /// (200 for OPTIONS, 405 otherwise).
    async fn create_server_user_agent(&self, request: &SipMessage) -> bool {
        let _ = request;
        false
    }

    async fn dialog_created(&self, id: DialogId) {
        let _ = id;
    }

    async fn dialog_terminated(&self, id: DialogId) {
        let _ = id;
    }

    /// A pending INVITE was cancelled by the peer; `key` is the INVITE
    /// server transaction that is being answered 487.
    async fn cancelled(&self, key: TransactionKey) {
        let _ = key;
    }

    /// Credentials for a 401/407 challenge, or `None` to surface the
    /// failure unchanged.
    async fn authenticate(&self, challenge: &Challenge) -> Option<Credentials> {
        let _ = challenge;
        None
    }
}
