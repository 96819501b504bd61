//! Typed adapters between raw deliveries and listeners.

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
};

use parking_lot::Mutex;

use crate::{
    connection::{Connection, Inner},
    domain::Domain,
    error::{Error, Result},
    listener::{
        AgentLifecycleListener, BlockJobListener, ConnectionCloseListener, IoErrorListener,
        LifecycleListener, PmSuspendListener, PmWakeupListener, RebootListener,
    },
    transport::{CloseCallback, RawDelivery, RawPayload, Trampoline},
    types::{
        AgentLifecycleReason, AgentLifecycleState, BlockJobStatus, BlockJobType,
        ConnectionCloseReason, DomainEvent, EventKind, IoErrorAction, PmSuspendReason,
        PmWakeupReason,
    },
};

/// A listener trait object the binding knows how to feed.
pub(crate) trait ListenerShape: Send + Sync + 'static {
    /// Event kind subscribed for this shape.
    const KIND: EventKind;
    /// Name used in logs and [`Error::ListenerFault`].
    const NAME: &'static str;

    /// Decode `payload` and call the listener. Returns `false` when the
    /// payload does not have this shape.
    fn invoke(&self, domain: &Domain, payload: RawPayload) -> bool;
}

impl ListenerShape for dyn LifecycleListener {
    const KIND: EventKind = EventKind::Lifecycle;
    const NAME: &'static str = "lifecycle";

    fn invoke(&self, domain: &Domain, payload: RawPayload) -> bool {
        let RawPayload::Lifecycle { event, detail } = payload else {
            return false;
        };
        self.on_lifecycle_change(domain, DomainEvent::from_codes(event, detail));
        true
    }
}

impl ListenerShape for dyn RebootListener {
    const KIND: EventKind = EventKind::Reboot;
    const NAME: &'static str = "reboot";

    fn invoke(&self, domain: &Domain, payload: RawPayload) -> bool {
        if payload != RawPayload::Generic {
            return false;
        }
        self.on_reboot(domain);
        true
    }
}

impl ListenerShape for dyn IoErrorListener {
    const KIND: EventKind = EventKind::IoError;
    const NAME: &'static str = "I/O error";

    fn invoke(&self, domain: &Domain, payload: RawPayload) -> bool {
        let RawPayload::IoError {
            src_path,
            dev_alias,
            action,
        } = payload
        else {
            return false;
        };
        self.on_io_error(domain, &src_path, &dev_alias, IoErrorAction::from_code(action));
        true
    }
}

impl ListenerShape for dyn BlockJobListener {
    const KIND: EventKind = EventKind::BlockJob;
    const NAME: &'static str = "block job";

    fn invoke(&self, domain: &Domain, payload: RawPayload) -> bool {
        let RawPayload::BlockJob {
            disk,
            job_type,
            status,
        } = payload
        else {
            return false;
        };
        self.on_block_job(
            domain,
            &disk,
            BlockJobType::from_code(job_type),
            BlockJobStatus::from_code(status),
        );
        true
    }
}

impl ListenerShape for dyn PmSuspendListener {
    const KIND: EventKind = EventKind::PmSuspend;
    const NAME: &'static str = "PM suspend";

    fn invoke(&self, domain: &Domain, payload: RawPayload) -> bool {
        let RawPayload::PmChange { reason } = payload else {
            return false;
        };
        self.on_pm_suspend(domain, PmSuspendReason::from_code(reason));
        true
    }
}

impl ListenerShape for dyn PmWakeupListener {
    const KIND: EventKind = EventKind::PmWakeup;
    const NAME: &'static str = "PM wakeup";

    fn invoke(&self, domain: &Domain, payload: RawPayload) -> bool {
        let RawPayload::PmChange { reason } = payload else {
            return false;
        };
        self.on_pm_wakeup(domain, PmWakeupReason::from_code(reason));
        true
    }
}

impl ListenerShape for dyn AgentLifecycleListener {
    const KIND: EventKind = EventKind::AgentLifecycle;
    const NAME: &'static str = "agent lifecycle";

    fn invoke(&self, domain: &Domain, payload: RawPayload) -> bool {
        let RawPayload::AgentLifecycle { state, reason } = payload else {
            return false;
        };
        self.on_agent_lifecycle(
            domain,
            AgentLifecycleState::from_code(state),
            AgentLifecycleReason::from_code(reason),
        );
        true
    }
}

/// Trampoline for one registered listener.
///
/// Holds the connection weakly: the connection owns the registry, which owns
/// this trampoline.
pub(crate) struct ListenerTrampoline<L: ?Sized> {
    conn: Weak<Inner>,
    listener: Arc<L>,
}

impl<L: ListenerShape + ?Sized> ListenerTrampoline<L> {
    pub(crate) fn new(conn: Weak<Inner>, listener: Arc<L>) -> Self {
        Self { conn, listener }
    }
}

impl<L: ListenerShape + ?Sized> Trampoline for ListenerTrampoline<L> {
    fn kind(&self) -> EventKind {
        L::KIND
    }

    fn deliver(&self, delivery: RawDelivery) -> Result<()> {
        let Some(inner) = self.conn.upgrade() else {
            return Ok(());
        };
        let domain = Domain::new(Connection::from_inner(inner), delivery.domain);
        let listener = &self.listener;
        let payload = delivery.payload;

        match panic::catch_unwind(AssertUnwindSafe(|| listener.invoke(&domain, payload))) {
            Ok(true) => Ok(()),
            Ok(false) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    listener = L::NAME,
                    kind = ?delivery.kind,
                    domain = domain.name(),
                    "dropping delivery with mismatched payload"
                );
                Ok(())
            }
            Err(panic) => Err(listener_fault(L::NAME, panic)),
        }
    }
}

/// Trampoline for the connection close listener.
///
/// Fires at most once. A client-side close pins the connection so the
/// notice still reaches the listener after the caller dropped its handle.
pub(crate) struct CloseTrampoline {
    conn: Weak<Inner>,
    listener: Arc<dyn ConnectionCloseListener>,
    pinned: Mutex<Option<Arc<Inner>>>,
    fired: AtomicBool,
}

impl CloseTrampoline {
    const NAME: &'static str = "connection close";

    pub(crate) fn new(conn: Weak<Inner>, listener: Arc<dyn ConnectionCloseListener>) -> Self {
        Self {
            conn,
            listener,
            pinned: Mutex::new(None),
            fired: AtomicBool::new(false),
        }
    }

    pub(crate) fn pin(&self, inner: Arc<Inner>) {
        // `fired` is read under the lock `on_close` sets it under.
        let mut pinned = self.pinned.lock();
        if !self.fired.load(Ordering::Acquire) {
            *pinned = Some(inner);
        }
    }

    pub(crate) fn unpin(&self) -> Option<Arc<Inner>> {
        self.pinned.lock().take()
    }
}

impl CloseCallback for CloseTrampoline {
    fn on_close(&self, reason: i32) -> Result<()> {
        let pinned = {
            let mut pinned = self.pinned.lock();
            if self.fired.swap(true, Ordering::AcqRel) {
                return Ok(());
            }
            pinned.take()
        };
        let Some(inner) = pinned.or_else(|| self.conn.upgrade()) else {
            return Ok(());
        };
        let reason = ConnectionCloseReason::from_code(reason);
        inner.session_ended(reason);
        let connection = Connection::from_inner(inner);

        #[cfg(feature = "tracing")]
        tracing::debug!(uri = connection.uri(), ?reason, "connection closed");

        let listener = &self.listener;
        panic::catch_unwind(AssertUnwindSafe(|| listener.on_close(&connection, reason)))
            .map_err(|panic| listener_fault(Self::NAME, panic))
    }
}

fn listener_fault(listener: &'static str, panic: Box<dyn Any + Send>) -> Error {
    let message = if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    };

    #[cfg(feature = "tracing")]
    tracing::error!(listener, %message, "listener panicked during dispatch");

    Error::ListenerFault { listener, message }
}
