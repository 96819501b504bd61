//! Cooperative interruption of the loop-driving thread.
//!
//! [`EventLoop::stop`](crate::EventLoop::stop) asks a running loop to finish
//! cleanly. An [`InterruptToken`] is a separate signal owned by whoever
//! spawned the loop-driving thread: triggering it makes the blocked iteration
//! return [`Error::Interrupted`](crate::Error::Interrupted) at once.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::sync::Notify;

/// A clonable interrupt flag for one loop-driving thread.
///
/// Clones share the same state.
#[derive(Clone, Debug, Default)]
pub struct InterruptToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    interrupted: AtomicBool,
    notify: Notify,
}

impl InterruptToken {
    /// Create a new, untriggered token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interrupt the thread driving the loop with this token.
    pub fn interrupt(&self) {
        if !self.inner.interrupted.swap(true, Ordering::AcqRel) {
            self.inner.notify.notify_waiters();
        }
    }

    /// Returns `true` once [`interrupt`](Self::interrupt) has been called.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.inner.interrupted.load(Ordering::Acquire)
    }

    /// Clear the flag so the token can be reused for a new run.
    pub fn reset(&self) {
        self.inner.interrupted.store(false, Ordering::Release);
    }

    /// Resolves once the token is interrupted.
    pub(crate) async fn interrupted(&self) {
        loop {
            // Register before checking the flag so a concurrent `interrupt`
            // cannot slip between the check and the wait.
            let notified = self.inner.notify.notified();
            if self.is_interrupted() {
                return;
            }
            notified.await;
        }
    }
}
