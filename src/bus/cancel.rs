//! Cancellation signal shared by subscriptions, connections and servers.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// A one-shot, idempotent cancellation flag with async waiters.
#[derive(Debug, Default)]
pub struct CancellationSignal {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationSignal {
    /// Create a new signal in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip the signal. Safe to call any number of times.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Whether the signal has fired.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until the signal fires. Returns immediately if it already has.
    pub async fn cancelled(&self) {
        // Registering interest before re-checking avoids a lost wakeup
        // between the check and the await.
        let notified = self.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}
