//! SIP dialog layer and stack router (RFC 3261 Section 12).
//!
//! A [`SipStack`] binds a transport, runs the transaction layer under
//! it, and maintains dialog state above it: Call-ID plus the two tags
//! identify a dialog, route sets steer in-dialog requests, CSeq numbers
//! stay monotonic per direction, and the application sees the traffic
//! through an [`AppHandler`] it implements.
//!
//! ```no_run
//! use std::sync::Arc;
//! use sipline_dialog_core::{AppHandler, SipStack, StackConfig};
//! use sipline_sip_core::SipMessage;
//! use sipline_transaction_core::TransactionKey;
//! # use sipline_sip_transport::bind_udp;
//!
//! struct App;
//!
//! #[async_trait::async_trait]
//! impl AppHandler for App {
//!     async fn received_request(&self, _key: TransactionKey, _request: SipMessage) {}
//!     async fn received_response(&self, _key: TransactionKey, _response: SipMessage) {}
//! }
//!
//! # async fn demo() -> sipline_dialog_core::DialogResult<()> {
//! let (transport, transport_rx) = bind_udp("127.0.0.1:5060".parse().unwrap()).await?;
//! let stack = SipStack::new(
//!     Arc::new(transport),
//!     transport_rx,
//!     StackConfig::default(),
//!     Arc::new(App),
//!     None,
//! );
//! # drop(stack);
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod dialog;
pub mod errors;
pub mod events;
pub mod manager;
pub mod user_agent;

pub use auth::{Authenticator, Challenge, Credentials};
pub use config::StackConfig;
pub use dialog::{Dialog, DialogId, DialogState, RequestVerdict};
pub use errors::{DialogError, DialogResult};
pub use events::AppHandler;
pub use manager::SipStack;
pub use user_agent::{generate_call_id, generate_tag, UserAgent};

/// Re-export of the commonly used types.
pub mod prelude {
    pub use crate::auth::{Authenticator, Challenge, Credentials};
    pub use crate::config::StackConfig;
    pub use crate::dialog::{Dialog, DialogId, DialogState};
    pub use crate::errors::{DialogError, DialogResult};
    pub use crate::events::AppHandler;
    pub use crate::manager::SipStack;
    pub use sipline_transaction_core::{ResponseArg, TransactionKey};
}
