//! Signal-once cancellation slots
//!
//! A [`Signal`] is a capacity-one notification: the first [`Signal::fire`]
//! sets it, later fires are no-ops, and [`Signal::is_fired`] never blocks.
//! Tasks that prefer to sleep until cancellation can await
//! [`Signal::fired`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    fired: AtomicBool,
    notify: Notify,
}

/// Cloneable signal-once slot
///
/// All clones observe the same slot.
#[derive(Debug, Clone, Default)]
pub struct Signal {
    inner: Arc<Inner>,
}

impl Signal {
    /// Create an unfired signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the signal.
    ///
    /// Returns `true` only for the call that actually set it.
    pub fn fire(&self) -> bool {
        let first = !self.inner.fired.swap(true, Ordering::AcqRel);
        if first {
            self.inner.notify.notify_waiters();
        }
        first
    }

    /// Non-blocking peek
    pub fn is_fired(&self) -> bool {
        self.inner.fired.load(Ordering::Acquire)
    }

    /// Wait until the signal is set. Returns immediately if it already is.
    pub async fn fired(&self) {
        loop {
            // register before checking so a concurrent fire is not lost
            let notified = self.inner.notify.notified();
            if self.is_fired() {
                return;
            }
            notified.await;
        }
    }
}
