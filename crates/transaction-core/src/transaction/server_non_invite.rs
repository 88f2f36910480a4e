//! Non-INVITE server transaction (RFC 3261 17.2.2).
//!
//! Trying -> Proceeding -> Completed -> Terminated. The transaction
//! absorbs request retransmissions by replaying the last response it
//! sent; Timer J keeps it alive long enough to catch stragglers after
//! the final response.

use sipline_sip_core::SipMessage;
use tracing::warn;

use crate::error::Result;
use crate::events::TransactionEvent;

use super::runner::Fsm;
use super::{ResponseArg, TransactionState};

pub(super) async fn on_start(fsm: &mut Fsm) -> Result<()> {
    fsm.emit(TransactionEvent::NewRequest {
        key: fsm.data.key.clone(),
        request: fsm.data.request.clone(),
        source: fsm.data.source,
    })
    .await;
    Ok(())
}

/// A matched inbound message here is a retransmission of the request.
pub(super) async fn on_message(fsm: &mut Fsm, _request: SipMessage) -> Result<()> {
    use TransactionState::*;
    match fsm.state() {
        // Nothing sent yet; the TU already has the request.
        Trying => {}
        Proceeding | Completed => fsm.data.resend_last_response().await?,
        _ => {}
    }
    Ok(())
}

pub(super) async fn on_send_response(fsm: &mut Fsm, arg: ResponseArg) -> Result<()> {
    let response = fsm.data.build_response(arg);
    let final_response = response.is_final();

    use TransactionState::*;
    match fsm.state() {
        Trying | Proceeding => {
            fsm.data.send_and_store_response(response).await?;
            if final_response {
                fsm.transition(Completed).await?;
                fsm.arm_wait("J", fsm.data.settings.timeout_64t1());
            } else {
                fsm.transition(Proceeding).await?;
            }
        }
        state => {
            warn!(key = %fsm.data.key, ?state, "response dropped, transaction already completed");
        }
    }
    Ok(())
}

pub(super) async fn on_timer(fsm: &mut Fsm, name: &'static str) -> Result<()> {
    if name == "J" {
        fsm.transition(TransactionState::Terminated).await?;
    }
    Ok(())
}
