//! Single-slot connection close registration.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::{
    connection::Inner,
    error::Result,
    trampoline::CloseTrampoline,
    transport::{CloseCallback, SessionId, Transport},
};

/// Holds the one close callback of a connection.
///
/// Registering a new callback replaces the current one. The slot owns the
/// callback; the transport only keeps a `Weak`.
#[derive(Default)]
pub(crate) struct CloseNotifier {
    slot: Mutex<Option<Arc<CloseTrampoline>>>,
}

impl CloseNotifier {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Install `callback`, unregistering the previous one first.
    ///
    /// If the transport refuses the new callback the slot ends up empty.
    pub(crate) fn register(
        &self,
        transport: &dyn Transport,
        session: SessionId,
        callback: Arc<CloseTrampoline>,
    ) -> Result<()> {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            transport.unregister_close_callback(session)?;
            *slot = None;
        }
        let weak: Weak<dyn CloseCallback> = Arc::downgrade(&callback) as Weak<CloseTrampoline>;
        transport.register_close_callback(session, weak)?;
        *slot = Some(callback);
        Ok(())
    }

    /// Remove the current callback. Does nothing when the slot is empty.
    pub(crate) fn unregister(&self, transport: &dyn Transport, session: SessionId) -> Result<()> {
        let mut slot = self.slot.lock();
        if slot.is_none() {
            return Ok(());
        }
        transport.unregister_close_callback(session)?;
        *slot = None;
        Ok(())
    }

    /// Drop the current callback without contacting the transport.
    pub(crate) fn clear(&self) {
        let callback = self.slot.lock().take();
        drop(callback);
    }

    /// Keep `inner` alive until the current callback has fired.
    pub(crate) fn pin(&self, inner: &Arc<Inner>) {
        if let Some(callback) = self.slot.lock().as_ref() {
            callback.pin(inner.clone());
        }
    }

    /// Undo [`pin`](Self::pin) when no notice is coming.
    pub(crate) fn unpin(&self) {
        let pinned = self.slot.lock().as_ref().and_then(|c| c.unpin());
        drop(pinned);
    }

    pub(crate) fn is_registered(&self) -> bool {
        self.slot.lock().is_some()
    }
}

impl std::fmt::Debug for CloseNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloseNotifier")
            .field("registered", &self.is_registered())
            .finish()
    }
}
