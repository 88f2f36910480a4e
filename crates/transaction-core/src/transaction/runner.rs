//! The per-transaction task.
//!
//! One mailbox, one state machine, one timer table. The loop drains the
//! mailbox until the transaction reaches Terminated, then cancels any
//! outstanding timers and reports the termination to the TU.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use sipline_sip_core::SipMessage;

use crate::error::{Error, Result};
use crate::events::TransactionEvent;
use crate::timer::TimerTable;

use super::{
    client_invite, client_non_invite, server_invite, server_non_invite, AtomicTransactionState,
    InternalTransactionCommand, ResponseArg, TransactionData, TransactionKind, TransactionState,
};

/// Everything a state machine function needs: the shared transaction
/// data plus the task-local timer table.
pub(crate) struct Fsm {
    pub data: Arc<TransactionData>,
    pub timers: TimerTable,
}

impl Fsm {
    pub fn state(&self) -> TransactionState {
        self.data.state.get()
    }

    pub fn reliable(&self) -> bool {
        self.data.reliable()
    }

    pub async fn emit(&self, event: TransactionEvent) {
        let _ = self.data.events_tx.send(event).await;
    }

    /// Move to `to` and report the change. A no-op when already there.
    pub async fn transition(&self, to: TransactionState) -> Result<()> {
        let from = self.state();
        if from == to {
            return Ok(());
        }
        AtomicTransactionState::validate_transition(self.data.kind, from, to)?;
        self.data.state.set(to);
        debug!(key = %self.data.key, ?from, ?to, "transaction state change");
        self.emit(TransactionEvent::StateChanged {
            key: self.data.key.clone(),
            previous: from,
            new: to,
        })
        .await;
        Ok(())
    }

    pub fn arm(&mut self, name: &'static str, duration: Duration) {
        self.timers.arm(name, duration, self.data.cmd_tx.clone());
    }

    /// Arm `name` as a pure wait timer: a real delay on unreliable
    /// transports, an immediate synthetic fire on reliable ones.
    pub fn arm_wait(&mut self, name: &'static str, duration: Duration) {
        if self.reliable() {
            self.timers.fire_now(name, self.data.cmd_tx.clone());
        } else {
            self.timers.arm(name, duration, self.data.cmd_tx.clone());
        }
    }
}

/// Run a transaction to completion. Spawned once per transaction.
pub(crate) async fn run_transaction_loop(
    data: Arc<TransactionData>,
    mut cmd_rx: mpsc::Receiver<InternalTransactionCommand>,
) {
    let key = data.key.clone();
    let mut fsm = Fsm {
        data,
        timers: TimerTable::default(),
    };

    if let Err(error) = on_start(&mut fsm).await {
        warn!(key = %key, %error, "transaction failed to start");
        fail(&fsm, error).await;
    }

    while fsm.state() != TransactionState::Terminated {
        let Some(cmd) = cmd_rx.recv().await else {
            // Manager dropped the sender: tear down quietly.
            break;
        };
        let result = match cmd {
            InternalTransactionCommand::ProcessMessage(message) => {
                on_message(&mut fsm, message).await
            }
            InternalTransactionCommand::Timer(name) => on_timer(&mut fsm, name).await,
            InternalTransactionCommand::SendResponse(arg) => on_send_response(&mut fsm, arg).await,
            InternalTransactionCommand::TransportError(error) => {
                warn!(key = %key, %error, "transport error reported to transaction");
                fsm.emit(TransactionEvent::TransportError {
                    key: key.clone(),
                    error,
                })
                .await;
                fsm.data.state.set(TransactionState::Terminated);
                Ok(())
            }
            InternalTransactionCommand::Terminate => {
                fsm.transition(TransactionState::Terminated).await
            }
        };
        if let Err(error) = result {
            warn!(key = %key, %error, "transaction command failed");
            fail(&fsm, error).await;
        }
    }

    fsm.timers.cancel_all();
    fsm.emit(TransactionEvent::Terminated { key }).await;
}

/// A failed send or an invalid internal step kills the transaction.
async fn fail(fsm: &Fsm, error: Error) {
    fsm.emit(TransactionEvent::TransportError {
        key: fsm.data.key.clone(),
        error: error.to_string(),
    })
    .await;
    fsm.data.state.set(TransactionState::Terminated);
}

async fn on_start(fsm: &mut Fsm) -> Result<()> {
    match fsm.data.kind {
        TransactionKind::InviteClient => client_invite::on_start(fsm).await,
        TransactionKind::NonInviteClient => client_non_invite::on_start(fsm).await,
        TransactionKind::InviteServer => server_invite::on_start(fsm).await,
        TransactionKind::NonInviteServer => server_non_invite::on_start(fsm).await,
    }
}

async fn on_message(fsm: &mut Fsm, message: SipMessage) -> Result<()> {
    match fsm.data.kind {
        TransactionKind::InviteClient => client_invite::on_message(fsm, message).await,
        TransactionKind::NonInviteClient => client_non_invite::on_message(fsm, message).await,
        TransactionKind::InviteServer => server_invite::on_message(fsm, message).await,
        TransactionKind::NonInviteServer => server_non_invite::on_message(fsm, message).await,
    }
}

async fn on_timer(fsm: &mut Fsm, name: &'static str) -> Result<()> {
    match fsm.data.kind {
        TransactionKind::InviteClient => client_invite::on_timer(fsm, name).await,
        TransactionKind::NonInviteClient => client_non_invite::on_timer(fsm, name).await,
        TransactionKind::InviteServer => server_invite::on_timer(fsm, name).await,
        TransactionKind::NonInviteServer => server_non_invite::on_timer(fsm, name).await,
    }
}

async fn on_send_response(fsm: &mut Fsm, arg: ResponseArg) -> Result<()> {
    match fsm.data.kind {
        TransactionKind::InviteServer => server_invite::on_send_response(fsm, arg).await,
        TransactionKind::NonInviteServer => server_non_invite::on_send_response(fsm, arg).await,
        _ => {
            warn!(key = %fsm.data.key, "SendResponse on a client transaction ignored");
            Ok(())
        }
    }
}
