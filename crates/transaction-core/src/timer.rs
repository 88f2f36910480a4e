//! RFC 3261 transaction timers.
//!
//! All timer durations derive from three base constants: T1 (round-trip
//! estimate, 500ms), T2 (retransmission cap, 4s) and T4 (maximum message
//! lifetime in the network, 5s). Arming a timer spawns a sleep that posts
//! a [`InternalTransactionCommand::Timer`] back into the owning
//! transaction's mailbox, so expiry re-enters the same single-writer
//! context as inbound messages.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::transaction::InternalTransactionCommand;

/// Base timer constants with the RFC 3261 defaults. Tests shrink these
/// to keep the suites fast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerSettings {
    pub t1: Duration,
    pub t2: Duration,
    pub t4: Duration,
}

impl Default for TimerSettings {
    fn default() -> Self {
        TimerSettings {
            t1: Duration::from_millis(500),
            t2: Duration::from_millis(4000),
            t4: Duration::from_millis(5000),
        }
    }
}

impl TimerSettings {
    /// Shortened settings for tests (T1 = 20ms).
    pub fn fast_for_tests() -> Self {
        TimerSettings {
            t1: Duration::from_millis(20),
            t2: Duration::from_millis(80),
            t4: Duration::from_millis(40),
        }
    }

    /// 64·T1: the B, F, H and J timeout durations.
    pub fn timeout_64t1(&self) -> Duration {
        self.t1 * 64
    }

    /// Timer D: wait for response retransmissions after a non-2xx final
    /// on the INVITE client side.
    pub fn timer_d(&self) -> Duration {
        self.timeout_64t1().max(Duration::from_millis(32_000))
    }

    /// Double an interval, capped at T2 (timers E and G).
    pub fn double_capped(&self, interval: Duration) -> Duration {
        (interval * 2).min(self.t2)
    }
}

/// Named timers a transaction can own. The handles are the scheduler's
/// cancellation tokens; the intervals carry the doubling state for the
/// retransmission timers.
#[derive(Default)]
pub struct TimerTable {
    handles: HashMap<&'static str, JoinHandle<()>>,
    intervals: HashMap<&'static str, Duration>,
}

impl TimerTable {
    /// Arm `name` to fire after `duration`, replacing any previous timer
    /// of the same name. Expiry posts back into the transaction mailbox.
    pub fn arm(
        &mut self,
        name: &'static str,
        duration: Duration,
        cmd_tx: mpsc::Sender<InternalTransactionCommand>,
    ) {
        self.cancel(name);
        trace!(timer = name, ?duration, "arming timer");
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = cmd_tx.send(InternalTransactionCommand::Timer(name)).await;
        });
        self.handles.insert(name, handle);
        self.intervals.insert(name, duration);
    }

    /// Synthetic immediate fire, used on reliable transports to collapse
    /// the wait states (D, I, J, K) instead of scheduling them.
    pub fn fire_now(
        &mut self,
        name: &'static str,
        cmd_tx: mpsc::Sender<InternalTransactionCommand>,
    ) {
        self.arm(name, Duration::ZERO, cmd_tx);
    }

    /// Last armed interval for `name`, for retransmission doubling.
    pub fn interval(&self, name: &str) -> Option<Duration> {
        self.intervals.get(name).copied()
    }

    pub fn cancel(&mut self, name: &str) {
        if let Some(handle) = self.handles.remove(name) {
            handle.abort();
        }
    }

    /// Entering Terminated stops everything still outstanding.
    pub fn cancel_all(&mut self) {
        for (_, handle) in self.handles.drain() {
            handle.abort();
        }
        self.intervals.clear();
    }
}

impl Drop for TimerTable {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_durations() {
        let s = TimerSettings::default();
        assert_eq!(s.timeout_64t1(), Duration::from_millis(32_000));
        assert_eq!(s.timer_d(), Duration::from_millis(32_000));
        assert_eq!(
            s.double_capped(Duration::from_millis(500)),
            Duration::from_millis(1000)
        );
        assert_eq!(
            s.double_capped(Duration::from_millis(3000)),
            Duration::from_millis(4000)
        );
    }

    #[tokio::test]
    async fn armed_timer_posts_into_mailbox() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut table = TimerTable::default();
        table.arm("K", Duration::from_millis(5), tx);
        match rx.recv().await.unwrap() {
            InternalTransactionCommand::Timer(name) => assert_eq!(name, "K"),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_prevents_fire() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut table = TimerTable::default();
        table.arm("F", Duration::from_millis(10), tx);
        table.cancel("F");
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(rx.try_recv().is_err());
    }
}
