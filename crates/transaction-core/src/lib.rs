//! SIP transaction layer (RFC 3261 Section 17).
//!
//! Four state machines run the retransmission and timeout discipline
//! between the transport and the transaction user: INVITE and
//! non-INVITE, each in a client and a server flavor. Every transaction
//! is an isolated tokio task fed through a command mailbox; the
//! [`TransactionManager`] routes inbound traffic to the right mailbox
//! and reports lifecycle events upward.
//!
//! ```no_run
//! use std::sync::Arc;
//! use sipline_sip_transport::bind_udp;
//! use sipline_transaction_core::{TimerSettings, TransactionManager};
//!
//! # async fn demo() -> sipline_transaction_core::Result<()> {
//! let (transport, transport_rx) = bind_udp("127.0.0.1:5060".parse().unwrap()).await?;
//! let (manager, mut events) =
//!     TransactionManager::new(Arc::new(transport), transport_rx, TimerSettings::default());
//! while let Some(event) = events.recv().await {
//!     // dialog layer consumes events here
//!     drop(event);
//! }
//! # drop(manager);
//! # Ok(())
//! # }
//! ```

pub mod builders;
pub mod error;
pub mod events;
pub mod key;
pub mod manager;
pub mod timer;
pub mod transaction;

pub use error::{Error, Result};
pub use events::TransactionEvent;
pub use key::{LoopDetectionTuple, TransactionKey};
pub use manager::TransactionManager;
pub use timer::TimerSettings;
pub use transaction::{ResponseArg, TransactionKind, TransactionState};

/// Re-export of the commonly used types.
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::events::TransactionEvent;
    pub use crate::key::{LoopDetectionTuple, TransactionKey};
    pub use crate::manager::TransactionManager;
    pub use crate::timer::TimerSettings;
    pub use crate::transaction::{ResponseArg, TransactionKind, TransactionState};
}
