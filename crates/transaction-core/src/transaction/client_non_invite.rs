//! Non-INVITE client transaction (RFC 3261 17.1.2).
//!
//! Trying -> Proceeding -> Completed -> Terminated. Timer E drives
//! request retransmission with capped doubling, Timer F bounds the wait
//! for a final response, Timer K absorbs late response retransmissions
//! after the final has been delivered to the TU.

use sipline_sip_core::SipMessage;
use tracing::trace;

use crate::error::Result;
use crate::events::TransactionEvent;

use super::runner::Fsm;
use super::TransactionState;

pub(super) async fn on_start(fsm: &mut Fsm) -> Result<()> {
    fsm.data.send_request().await?;
    if !fsm.reliable() {
        fsm.arm("E", fsm.data.settings.t1);
    }
    fsm.arm("F", fsm.data.settings.timeout_64t1());
    Ok(())
}

pub(super) async fn on_message(fsm: &mut Fsm, response: SipMessage) -> Result<()> {
    let Some(status) = response.status() else {
        trace!(key = %fsm.data.key, "non-response matched to client transaction, dropping");
        return Ok(());
    };

    use TransactionState::*;
    match fsm.state() {
        Trying | Proceeding if status.is_provisional() => {
            fsm.transition(Proceeding).await?;
            fsm.emit(TransactionEvent::ProvisionalResponse {
                key: fsm.data.key.clone(),
                response,
            })
            .await;
        }
        Trying | Proceeding => {
            fsm.timers.cancel("E");
            fsm.timers.cancel("F");
            fsm.emit(TransactionEvent::FinalResponse {
                key: fsm.data.key.clone(),
                response,
            })
            .await;
            fsm.transition(Completed).await?;
            fsm.arm_wait("K", fsm.data.settings.t4);
        }
        // The final has already been delivered; retransmissions die here.
        Completed => {}
        _ => {}
    }
    Ok(())
}

pub(super) async fn on_timer(fsm: &mut Fsm, name: &'static str) -> Result<()> {
    use TransactionState::*;
    match (name, fsm.state()) {
        ("E", Trying) | ("E", Proceeding) => {
            fsm.data.send_request().await?;
            let current = fsm.timers.interval("E").unwrap_or(fsm.data.settings.t1);
            let next = fsm.data.settings.double_capped(current);
            fsm.arm("E", next);
        }
        ("F", Trying) | ("F", Proceeding) => {
            fsm.emit(TransactionEvent::Timeout {
                key: fsm.data.key.clone(),
            })
            .await;
            fsm.transition(Terminated).await?;
        }
        ("K", _) => {
            fsm.transition(Terminated).await?;
        }
        _ => {}
    }
    Ok(())
}
