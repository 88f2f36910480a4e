//! INVITE server transaction (RFC 3261 17.2.1).
//!
//! Proceeding -> Completed -> Confirmed -> Terminated. On creation the
//! transaction sends 100 Trying on its own so upstream retransmission
//! stops even if the TU is slow. A 2xx final is passed through and the
//! transaction terminates at once; 2xx retransmission is the dialog
//! layer's job. Non-2xx finals are retransmitted on Timer G until the
//! ACK arrives, bounded by Timer H.

use sipline_sip_core::{SipMessage, StatusCode};
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
    let trying = SipMessage::response_to(&fsm.data.request, StatusCode::TRYING);
    fsm.data.send_and_store_response(trying).await?;
    Ok(())
}

pub(super) async fn on_message(fsm: &mut Fsm, request: SipMessage) -> Result<()> {
    use sipline_sip_core::Method;
    use TransactionState::*;

    match (request.method(), fsm.state()) {
        // INVITE retransmission: replay whatever was sent last. Timer G
        // keeps its own schedule.
        (Some(Method::Invite), Proceeding) | (Some(Method::Invite), Completed) => {
            fsm.data.resend_last_response().await?;
        }
        (Some(Method::Ack), Completed) => {
            fsm.timers.cancel("G");
            fsm.timers.cancel("H");
            fsm.emit(TransactionEvent::AckReceived {
                key: fsm.data.key.clone(),
                request,
            })
            .await;
            fsm.transition(Confirmed).await?;
            fsm.arm_wait("I", fsm.data.settings.t4);
        }
        // Duplicate ACKs in Confirmed are absorbed silently.
        (Some(Method::Ack), Confirmed) => {}
        _ => {}
    }
    Ok(())
}

pub(super) async fn on_send_response(fsm: &mut Fsm, arg: ResponseArg) -> Result<()> {
    let response = fsm.data.build_response(arg);
    let status = response.status().unwrap_or(StatusCode::TRYING);

    use TransactionState::*;
    match fsm.state() {
        Proceeding if status.is_provisional() => {
            fsm.data.send_and_store_response(response).await?;
        }
        Proceeding if status.is_success() => {
            fsm.data.send_and_store_response(response).await?;
            fsm.transition(Terminated).await?;
        }
        Proceeding => {
            fsm.data.send_and_store_response(response).await?;
            fsm.transition(Completed).await?;
            if !fsm.reliable() {
                fsm.arm("G", fsm.data.settings.t1);
            }
            fsm.arm("H", fsm.data.settings.timeout_64t1());
        }
        state => {
            warn!(key = %fsm.data.key, ?state, "response dropped, final already sent");
        }
    }
    Ok(())
}

pub(super) async fn on_timer(fsm: &mut Fsm, name: &'static str) -> Result<()> {
    use TransactionState::*;
    match (name, fsm.state()) {
        ("G", Completed) => {
            fsm.data.resend_last_response().await?;
            let current = fsm.timers.interval("G").unwrap_or(fsm.data.settings.t1);
            let next = fsm.data.settings.double_capped(current);
            fsm.arm("G", next);
        }
        // No ACK arrived for the non-2xx final.
        ("H", Completed) => {
            fsm.emit(TransactionEvent::Timeout {
                key: fsm.data.key.clone(),
            })
            .await;
            fsm.transition(Terminated).await?;
        }
        ("I", _) => {
            fsm.transition(Terminated).await?;
        }
        _ => {}
    }
    Ok(())
}
