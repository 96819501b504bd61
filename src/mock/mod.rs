//! In-memory transport for tests.
//!
//! [`MockTransport`] keeps sessions and subscriptions in memory and lets a
//! test emit deliveries as if the daemon had sent them. Deliveries go through
//! the event loop's dispatch queue exactly like a real transport's would, so
//! nothing reaches a listener until some thread drives the loop.
//!
//! It is gated behind `cfg(test)` or the `mock` Cargo feature.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Arc, Weak},
};

use parking_lot::Mutex;

use crate::{
    connection::ConnectOptions,
    error::{Error, Result},
    event_loop::DispatchQueue,
    transport::{
        CloseCallback, RawDelivery, RawPayload, SessionId, SubscriptionId, Trampoline, Transport,
    },
    types::{ConnectionCloseReason, DomainHandle, EventKind},
};

/// Transport operation a failure can be scripted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum MockOp {
    /// [`Transport::open_session`].
    OpenSession,
    /// [`Transport::close_session`].
    CloseSession,
    /// [`Transport::register_event_callback`].
    RegisterEvent,
    /// [`Transport::deregister_event_callback`].
    DeregisterEvent,
    /// [`Transport::register_close_callback`].
    RegisterClose,
    /// [`Transport::unregister_close_callback`].
    UnregisterClose,
}

impl MockOp {
    fn name(self) -> &'static str {
        match self {
            Self::OpenSession => "open_session",
            Self::CloseSession => "close_session",
            Self::RegisterEvent => "register_event_callback",
            Self::DeregisterEvent => "deregister_event_callback",
            Self::RegisterClose => "register_close_callback",
            Self::UnregisterClose => "unregister_close_callback",
        }
    }
}

/// One subscription as seen by the mock daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockSubscription {
    /// Subscription id handed back to the binding.
    pub id: SubscriptionId,
    /// Subscribed event kind.
    pub kind: EventKind,
    /// Domain filter, `None` for every domain.
    pub domain: Option<DomainHandle>,
}

struct Subscription {
    info: MockSubscription,
    trampoline: Weak<dyn Trampoline>,
}

#[derive(Default)]
struct Session {
    uri: String,
    subscriptions: BTreeMap<SubscriptionId, Subscription>,
    close: Option<Weak<dyn CloseCallback>>,
}

#[derive(Default)]
struct State {
    next_session: u64,
    next_subscription: i32,
    sessions: HashMap<SessionId, Session>,
    failures: HashMap<MockOp, String>,
    calls: HashMap<MockOp, usize>,
}

impl State {
    /// Count the call and consume a scripted failure for `op`, if any.
    fn enter(&mut self, op: MockOp) -> Result<()> {
        *self.calls.entry(op).or_default() += 1;
        match self.failures.remove(&op) {
            Some(message) => Err(Error::transport(op.name(), message)),
            None => Ok(()),
        }
    }

    fn session(&mut self, operation: &'static str, session: SessionId) -> Result<&mut Session> {
        self.sessions
            .get_mut(&session)
            .ok_or_else(|| no_such_session(operation, session))
    }
}

/// In-memory [`Transport`].
pub struct MockTransport {
    queue: DispatchQueue,
    state: Mutex<State>,
}

impl MockTransport {
    /// Create a transport posting deliveries into `queue`.
    #[must_use]
    pub fn new(queue: DispatchQueue) -> Arc<Self> {
        Arc::new(Self {
            queue,
            state: Mutex::new(State::default()),
        })
    }

    /// Make the next call of `op` fail with a transport error.
    pub fn fail_next(&self, op: MockOp, message: impl Into<String>) {
        self.state.lock().failures.insert(op, message.into());
    }

    /// How many times `op` was called, failed calls included.
    #[must_use]
    pub fn calls(&self, op: MockOp) -> usize {
        self.state.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Whether `session` is open.
    #[must_use]
    pub fn is_open(&self, session: SessionId) -> bool {
        self.state.lock().sessions.contains_key(&session)
    }

    /// URI `session` was opened with.
    #[must_use]
    pub fn session_uri(&self, session: SessionId) -> Option<String> {
        self.state
            .lock()
            .sessions
            .get(&session)
            .map(|s| s.uri.clone())
    }

    /// Live subscriptions of `session`, in id order.
    #[must_use]
    pub fn subscriptions(&self, session: SessionId) -> Vec<MockSubscription> {
        self.state
            .lock()
            .sessions
            .get(&session)
            .map(|s| s.subscriptions.values().map(|sub| sub.info.clone()).collect())
            .unwrap_or_default()
    }

    /// Whether `session` has a close callback installed.
    #[must_use]
    pub fn has_close_callback(&self, session: SessionId) -> bool {
        self.state
            .lock()
            .sessions
            .get(&session)
            .is_some_and(|s| s.close.is_some())
    }

    /// Emit one event on `session`.
    ///
    /// Posts one dispatch per matching subscription and returns how many
    /// were posted.
    pub fn emit(
        &self,
        session: SessionId,
        kind: EventKind,
        domain: &DomainHandle,
        payload: RawPayload,
    ) -> Result<usize> {
        let targets: Vec<Weak<dyn Trampoline>> = {
            let mut state = self.state.lock();
            let session = state.session("emit", session)?;
            session
                .subscriptions
                .values()
                .filter(|sub| {
                    sub.info.kind == kind
                        && sub.info.domain.as_ref().map_or(true, |d| d == domain)
                })
                .map(|sub| sub.trampoline.clone())
                .collect()
        };

        for trampoline in &targets {
            let trampoline = trampoline.clone();
            let delivery = RawDelivery {
                kind,
                domain: domain.clone(),
                payload: payload.clone(),
            };
            self.queue.post(move || match trampoline.upgrade() {
                Some(trampoline) => trampoline.deliver(delivery),
                None => Ok(()),
            })?;
        }

        #[cfg(feature = "tracing")]
        tracing::trace!(%session, ?kind, domain = domain.name(), targets = targets.len(), "mock event emitted");

        Ok(targets.len())
    }

    /// Emit a lifecycle event with raw `(event, detail)` codes.
    pub fn emit_lifecycle(
        &self,
        session: SessionId,
        domain: &DomainHandle,
        event: i32,
        detail: i32,
    ) -> Result<usize> {
        self.emit(
            session,
            EventKind::Lifecycle,
            domain,
            RawPayload::Lifecycle { event, detail },
        )
    }

    /// Emit a reboot.
    pub fn emit_reboot(&self, session: SessionId, domain: &DomainHandle) -> Result<usize> {
        self.emit(session, EventKind::Reboot, domain, RawPayload::Generic)
    }

    /// Emit a block job event.
    pub fn emit_block_job(
        &self,
        session: SessionId,
        domain: &DomainHandle,
        disk: &str,
        job_type: i32,
        status: i32,
    ) -> Result<usize> {
        self.emit(
            session,
            EventKind::BlockJob,
            domain,
            RawPayload::BlockJob {
                disk: disk.to_string(),
                job_type,
                status,
            },
        )
    }

    /// End `session` from the daemon side with `reason`.
    ///
    /// The close callback, if any, is posted to the loop. Subscriptions are
    /// dropped.
    pub fn drop_session(&self, session: SessionId, reason: ConnectionCloseReason) -> Result<()> {
        let removed = self
            .state
            .lock()
            .sessions
            .remove(&session)
            .ok_or_else(|| no_such_session("drop_session", session))?;
        self.post_close(removed, reason.code())
    }

    fn post_close(&self, session: Session, reason: i32) -> Result<()> {
        let Some(callback) = session.close else {
            return Ok(());
        };
        self.queue.post(move || match callback.upgrade() {
            Some(callback) => callback.on_close(reason),
            None => Ok(()),
        })
    }
}

impl Transport for MockTransport {
    fn open_session(&self, uri: &str, _options: &ConnectOptions) -> Result<SessionId> {
        let mut state = self.state.lock();
        state.enter(MockOp::OpenSession)?;

        state.next_session += 1;
        let id = SessionId(state.next_session);
        state.sessions.insert(
            id,
            Session {
                uri: uri.to_string(),
                ..Session::default()
            },
        );
        Ok(id)
    }

    fn close_session(&self, session: SessionId) -> Result<()> {
        let removed = {
            let mut state = self.state.lock();
            state.enter(MockOp::CloseSession)?;
            state
                .sessions
                .remove(&session)
                .ok_or_else(|| no_such_session(MockOp::CloseSession.name(), session))?
        };
        self.post_close(removed, ConnectionCloseReason::Client.code())
    }

    fn register_event_callback(
        &self,
        session: SessionId,
        domain: Option<&DomainHandle>,
        kind: EventKind,
        trampoline: Weak<dyn Trampoline>,
    ) -> Result<SubscriptionId> {
        let mut state = self.state.lock();
        state.enter(MockOp::RegisterEvent)?;
        if kind.is_unknown() {
            return Err(Error::transport(
                MockOp::RegisterEvent.name(),
                "unsupported event kind",
            ));
        }

        state.next_subscription += 1;
        let id = SubscriptionId(state.next_subscription);
        state.session(MockOp::RegisterEvent.name(), session)?.subscriptions.insert(
            id,
            Subscription {
                info: MockSubscription {
                    id,
                    kind,
                    domain: domain.cloned(),
                },
                trampoline,
            },
        );
        Ok(id)
    }

    fn deregister_event_callback(
        &self,
        session: SessionId,
        subscription: SubscriptionId,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.enter(MockOp::DeregisterEvent)?;
        state
            .session(MockOp::DeregisterEvent.name(), session)?
            .subscriptions
            .remove(&subscription)
            .map(|_| ())
            .ok_or_else(|| {
                Error::transport(
                    MockOp::DeregisterEvent.name(),
                    format!("no such subscription: {}", subscription.0),
                )
            })
    }

    fn register_close_callback(
        &self,
        session: SessionId,
        callback: Weak<dyn CloseCallback>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.enter(MockOp::RegisterClose)?;
        let session = state.session(MockOp::RegisterClose.name(), session)?;
        if session.close.is_some() {
            return Err(Error::transport(
                MockOp::RegisterClose.name(),
                "a close callback is already registered",
            ));
        }
        session.close = Some(callback);
        Ok(())
    }

    fn unregister_close_callback(&self, session: SessionId) -> Result<()> {
        let mut state = self.state.lock();
        state.enter(MockOp::UnregisterClose)?;
        state
            .session(MockOp::UnregisterClose.name(), session)?
            .close
            .take()
            .map(|_| ())
            .ok_or_else(|| {
                Error::transport(
                    MockOp::UnregisterClose.name(),
                    "no close callback registered",
                )
            })
    }
}

fn no_such_session(operation: &'static str, session: SessionId) -> Error {
    Error::transport(operation, format!("no such session: {session}"))
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        let kinds: HashSet<EventKind> = state
            .sessions
            .values()
            .flat_map(|s| s.subscriptions.values().map(|sub| sub.info.kind))
            .collect();
        f.debug_struct("MockTransport")
            .field("sessions", &state.sessions.len())
            .field("subscribed_kinds", &kinds)
            .finish_non_exhaustive()
    }
}
