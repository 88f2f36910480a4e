//! INVITE client transaction (RFC 3261 17.1.1).
//!
//! Calling -> Proceeding -> Completed -> Terminated, except that a 2xx
//! moves straight to Terminated: the 2xx and its ACK belong to the
//! dialog layer, which must see every 2xx retransmission end-to-end.
//! Timer A doubles without a cap, Timer B bounds the whole attempt,
//! Timer D absorbs retransmitted non-2xx finals (answered by an ACK
//! built here, not by the TU).

use sipline_sip_core::SipMessage;
use tracing::trace;

use crate::builders;
use crate::error::Result;
use crate::events::TransactionEvent;

use super::runner::Fsm;
use super::TransactionState;

pub(super) async fn on_start(fsm: &mut Fsm) -> Result<()> {
    fsm.data.send_request().await?;
    if !fsm.reliable() {
        fsm.arm("A", fsm.data.settings.t1);
    }
    fsm.arm("B", fsm.data.settings.timeout_64t1());
    Ok(())
}

pub(super) async fn on_message(fsm: &mut Fsm, response: SipMessage) -> Result<()> {
    let Some(status) = response.status() else {
        trace!(key = %fsm.data.key, "non-response matched to client transaction, dropping");
        return Ok(());
    };

    use TransactionState::*;
    match fsm.state() {
        Calling | Proceeding if status.is_provisional() => {
            fsm.timers.cancel("A");
            fsm.transition(Proceeding).await?;
            fsm.emit(TransactionEvent::ProvisionalResponse {
                key: fsm.data.key.clone(),
                response,
            })
            .await;
        }
        Calling | Proceeding if status.is_success() => {
            fsm.timers.cancel("A");
            fsm.timers.cancel("B");
            fsm.emit(TransactionEvent::FinalResponse {
                key: fsm.data.key.clone(),
                response,
            })
            .await;
            fsm.transition(Terminated).await?;
        }
        Calling | Proceeding => {
            fsm.timers.cancel("A");
            fsm.timers.cancel("B");
            send_ack(fsm, &response).await?;
            fsm.emit(TransactionEvent::FinalResponse {
                key: fsm.data.key.clone(),
                response,
            })
            .await;
            fsm.transition(Completed).await?;
            fsm.arm_wait("D", fsm.data.settings.timer_d());
        }
        // A retransmitted non-2xx final means the ACK was lost; answer
        // it again without disturbing the TU.
        Completed if status.is_final() && !status.is_success() => {
            send_ack(fsm, &response).await?;
        }
        _ => {}
    }
    Ok(())
}

pub(super) async fn on_timer(fsm: &mut Fsm, name: &'static str) -> Result<()> {
    use TransactionState::*;
    match (name, fsm.state()) {
        ("A", Calling) => {
            fsm.data.send_request().await?;
            let current = fsm.timers.interval("A").unwrap_or(fsm.data.settings.t1);
            fsm.arm("A", current * 2);
        }
        ("B", Calling) | ("B", Proceeding) => {
            fsm.emit(TransactionEvent::Timeout {
                key: fsm.data.key.clone(),
            })
            .await;
            fsm.transition(Terminated).await?;
        }
        ("D", _) => {
            fsm.transition(Terminated).await?;
        }
        _ => {}
    }
    Ok(())
}

async fn send_ack(fsm: &Fsm, response: &SipMessage) -> Result<()> {
    let ack = builders::ack_for_non_2xx(&fsm.data.request, response)?;
    fsm.data
        .transport
        .send_message(ack, fsm.data.destination)
        .await?;
    Ok(())
}
