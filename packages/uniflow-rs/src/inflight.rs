//! Inflight accounting for queued messages and running commands.
//!
//! Every queued message and every interpreted command holds an
//! [`InflightGuard`]. The guard decrements on drop, so a message that is
//! discarded, a command whose callback is dropped, or a transition that panics
//! still releases its slot and never wedges [`Driver::settle`](crate::Driver::settle).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Count of pending work with a notifier for when it reaches zero.
#[derive(Default)]
pub(crate) struct Inflight {
    count: AtomicUsize,
    notify: Notify,
}

impl Inflight {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Start tracking one unit of work.
    pub(crate) fn track(self: &Arc<Self>) -> InflightGuard {
        self.count.fetch_add(1, Ordering::AcqRel);
        InflightGuard {
            tracker: self.clone(),
        }
    }

    fn release(&self) {
        let prev = self.count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "inflight count underflow");
        if prev == 1 {
            self.notify.notify_waiters();
        }
    }

    /// Current count of queued messages plus running commands.
    pub(crate) fn pending(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Wait until nothing is pending.
    ///
    /// Returns immediately if the count is already zero.
    pub(crate) async fn wait_zero(&self) {
        loop {
            // Register before checking; Notify is edge-triggered
            let notified = self.notify.notified();

            if self.pending() == 0 {
                return;
            }

            notified.await;
        }
    }
}

impl std::fmt::Debug for Inflight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inflight")
            .field("pending", &self.pending())
            .finish()
    }
}

/// RAII slot in an [`Inflight`] count.
pub(crate) struct InflightGuard {
    tracker: Arc<Inflight>,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.tracker.release();
    }
}
