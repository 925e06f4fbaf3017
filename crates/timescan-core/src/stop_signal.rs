//! Shared stop signal for cooperative cancellation.
//!
//! One `StopSignal` is written by the activity that wants work to stop
//! (a Ctrl-C handler, the jitter supervisor) and polled by the activity
//! doing the work at its poll and cycle boundaries. The flag is lock-free;
//! async waiters are woken through a `Notify`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    flag: AtomicBool,
    notify: Notify,
    reason: RwLock<Option<String>>,
}

/// Clonable stop flag; all clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<Inner>,
}

impl StopSignal {
    /// Create an untriggered signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop.
    pub fn trigger(&self, reason: impl Into<String>) {
        *self.inner.reason.write() = Some(reason.into());
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Whether a stop has been requested.
    pub fn is_triggered(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Reason passed to the last [`trigger`](Self::trigger).
    pub fn reason(&self) -> Option<String> {
        self.inner.reason.read().clone()
    }

    /// Clear the flag so the signal can guard the next scan.
    pub fn reset(&self) {
        self.inner.flag.store(false, Ordering::SeqCst);
        *self.inner.reason.write() = None;
    }

    /// Resolve once the signal is triggered.
    pub async fn triggered(&self) {
        loop {
            // Register before checking the flag so a concurrent trigger
            // cannot slip between the check and the await.
            let notified = self.inner.notify.notified();
            if self.is_triggered() {
                return;
            }
            notified.await;
        }
    }
}
