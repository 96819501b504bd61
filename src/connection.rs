//! Connections and their event subscriptions.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

use crate::{
    close::CloseNotifier,
    domain::Domain,
    error::{Error, Result},
    error_callback,
    listener::{
        AgentLifecycleListener, BlockJobListener, ConnectionCloseListener, IoErrorListener,
        LifecycleListener, PmSuspendListener, PmWakeupListener, RebootListener,
    },
    registry::{ListenerKey, ListenerRegistry, Registered},
    trampoline::{CloseTrampoline, ListenerShape, ListenerTrampoline},
    transport::{SessionId, Trampoline, Transport},
    types::{ConnectionCloseReason, DomainHandle, EventKind},
};

static OPEN_SESSIONS: AtomicUsize = AtomicUsize::new(0);

/// Number of sessions opened through [`Connection`] and not closed yet.
pub(crate) fn open_sessions() -> usize {
    OPEN_SESSIONS.load(Ordering::Acquire)
}

/// Credentials handed to the transport when opening a session.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// User name.
    pub username: String,
    /// Password or token.
    pub password: String,
}

impl Credentials {
    /// Create credentials.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Options controlling how the session is opened.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Open a read-only session.
    pub read_only: bool,

    /// Credentials, if the daemon requires them.
    pub credentials: Option<Credentials>,
}

/// Connection builder.
pub struct ConnectionBuilder {
    transport: Arc<dyn Transport>,
    uri: String,
    options: ConnectOptions,
}

impl ConnectionBuilder {
    /// Open a read-only session.
    #[must_use]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.options.read_only = read_only;
        self
    }

    /// Set credentials.
    #[must_use]
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.options.credentials = Some(credentials);
        self
    }

    /// Open the session.
    pub fn open(self) -> Result<Connection> {
        Connection::open_with_options(self.transport, &self.uri, self.options)
    }
}

impl fmt::Debug for ConnectionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionBuilder")
            .field("uri", &self.uri)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// A session to the daemon, and the event subscriptions made through it.
///
/// Cloning is cheap; clones share the session. The session is closed by
/// [`close`](Self::close) or when the last clone (including the ones held by
/// [`Domain`] handles) is dropped.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    transport: Arc<dyn Transport>,
    session: SessionId,
    uri: String,
    read_only: bool,
    registry: ListenerRegistry,
    close: CloseNotifier,
    closed: AtomicBool,
}

impl Connection {
    /// Create a builder for `uri`.
    #[must_use]
    pub fn builder(transport: Arc<dyn Transport>, uri: impl Into<String>) -> ConnectionBuilder {
        ConnectionBuilder {
            transport,
            uri: uri.into(),
            options: ConnectOptions::default(),
        }
    }

    /// Open a session with default options.
    pub fn open(transport: Arc<dyn Transport>, uri: &str) -> Result<Connection> {
        Self::open_with_options(transport, uri, ConnectOptions::default())
    }

    /// Open a session.
    ///
    /// The event loop should be initialized before the first session is
    /// opened, see [`init_event_loop`](crate::init_event_loop).
    pub fn open_with_options(
        transport: Arc<dyn Transport>,
        uri: &str,
        options: ConnectOptions,
    ) -> Result<Connection> {
        if uri.is_empty() {
            return Err(Error::invalid_argument("connection URI is empty"));
        }
        let session = transport.open_session(uri, &options).map_err(reported)?;
        OPEN_SESSIONS.fetch_add(1, Ordering::AcqRel);

        #[cfg(feature = "tracing")]
        tracing::debug!(uri, %session, read_only = options.read_only, "session opened");

        Ok(Connection {
            inner: Arc::new(Inner {
                transport,
                session,
                uri: uri.to_string(),
                read_only: options.read_only,
                registry: ListenerRegistry::new(),
                close: CloseNotifier::new(),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub(crate) fn from_inner(inner: Arc<Inner>) -> Self {
        Self { inner }
    }

    /// URI the session was opened with.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.inner.uri
    }

    /// Transport session identifier.
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.inner.session
    }

    /// Whether the session was opened read-only.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.inner.read_only
    }

    /// Whether the session has ended, through [`close`](Self::close) or
    /// because the daemon closed it.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Whether `self` and `other` share the same session.
    #[must_use]
    pub fn same_session(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Close the session.
    ///
    /// All event subscriptions are cancelled. A registered close listener is
    /// notified through the event loop with
    /// [`ConnectionCloseReason::Client`], even if every handle is dropped
    /// before the loop dispatches it. Closing twice, or closing a session the
    /// daemon already ended, does nothing.
    pub fn close(&self) -> Result<()> {
        self.inner.shutdown(Some(&self.inner))
    }

    /// Handle for the domain identified by `handle`.
    #[must_use]
    pub fn domain(&self, handle: DomainHandle) -> Domain {
        Domain::new(self.clone(), handle)
    }

    /// Number of listeners currently registered for `kind`.
    #[must_use]
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.inner.registry.len(kind)
    }

    /// Receive lifecycle changes of every domain.
    ///
    /// Adding a listener that is already registered does nothing.
    pub fn add_lifecycle_listener(&self, listener: Arc<dyn LifecycleListener>) -> Result<()> {
        self.add_listener(None, listener)
    }

    /// Stop delivering lifecycle changes to `listener`.
    pub fn remove_lifecycle_listener(&self, listener: &Arc<dyn LifecycleListener>) -> Result<()> {
        self.remove_listener(listener)
    }

    /// Receive reboots of every domain.
    pub fn add_reboot_listener(&self, listener: Arc<dyn RebootListener>) -> Result<()> {
        self.add_listener(None, listener)
    }

    /// Stop delivering reboots to `listener`.
    pub fn remove_reboot_listener(&self, listener: &Arc<dyn RebootListener>) -> Result<()> {
        self.remove_listener(listener)
    }

    /// Receive disk I/O errors of every domain.
    pub fn add_io_error_listener(&self, listener: Arc<dyn IoErrorListener>) -> Result<()> {
        self.add_listener(None, listener)
    }

    /// Stop delivering disk I/O errors to `listener`.
    pub fn remove_io_error_listener(&self, listener: &Arc<dyn IoErrorListener>) -> Result<()> {
        self.remove_listener(listener)
    }

    /// Receive block job progress of every domain.
    pub fn add_block_job_listener(&self, listener: Arc<dyn BlockJobListener>) -> Result<()> {
        self.add_listener(None, listener)
    }

    /// Stop delivering block job progress to `listener`.
    pub fn remove_block_job_listener(&self, listener: &Arc<dyn BlockJobListener>) -> Result<()> {
        self.remove_listener(listener)
    }

    /// Receive PM suspend notifications of every domain.
    pub fn add_pm_suspend_listener(&self, listener: Arc<dyn PmSuspendListener>) -> Result<()> {
        self.add_listener(None, listener)
    }

    /// Stop delivering PM suspend notifications to `listener`.
    pub fn remove_pm_suspend_listener(&self, listener: &Arc<dyn PmSuspendListener>) -> Result<()> {
        self.remove_listener(listener)
    }

    /// Receive PM wakeup notifications of every domain.
    pub fn add_pm_wakeup_listener(&self, listener: Arc<dyn PmWakeupListener>) -> Result<()> {
        self.add_listener(None, listener)
    }

    /// Stop delivering PM wakeup notifications to `listener`.
    pub fn remove_pm_wakeup_listener(&self, listener: &Arc<dyn PmWakeupListener>) -> Result<()> {
        self.remove_listener(listener)
    }

    /// Receive guest agent lifecycle changes of every domain.
    pub fn add_agent_lifecycle_listener(
        &self,
        listener: Arc<dyn AgentLifecycleListener>,
    ) -> Result<()> {
        self.add_listener(None, listener)
    }

    /// Stop delivering guest agent lifecycle changes to `listener`.
    pub fn remove_agent_lifecycle_listener(
        &self,
        listener: &Arc<dyn AgentLifecycleListener>,
    ) -> Result<()> {
        self.remove_listener(listener)
    }

    /// Be notified when the session ends.
    ///
    /// At most one close listener exists per connection; registering another
    /// one replaces it.
    pub fn register_close_listener(&self, listener: Arc<dyn ConnectionCloseListener>) -> Result<()> {
        self.ensure_open()?;
        let callback = Arc::new(CloseTrampoline::new(Arc::downgrade(&self.inner), listener));
        self.inner
            .close
            .register(&*self.inner.transport, self.inner.session, callback)
            .map_err(reported)
    }

    /// Remove the close listener. Does nothing when none is registered.
    pub fn unregister_close_listener(&self) -> Result<()> {
        if self.is_closed() {
            self.inner.close.clear();
            return Ok(());
        }
        self.inner
            .close
            .unregister(&*self.inner.transport, self.inner.session)
            .map_err(reported)
    }

    pub(crate) fn add_listener<L>(&self, domain: Option<&DomainHandle>, listener: Arc<L>) -> Result<()>
    where
        L: ListenerShape + ?Sized,
    {
        self.ensure_open()?;
        let key = ListenerKey::of(&listener);
        let conn = Arc::downgrade(&self.inner);

        let outcome = self
            .inner
            .registry
            .register(
                &*self.inner.transport,
                self.inner.session,
                L::KIND,
                key,
                domain,
                move || -> Arc<dyn Trampoline> { Arc::new(ListenerTrampoline::new(conn, listener)) },
            )
            .map_err(reported)?;

        #[cfg(feature = "tracing")]
        match outcome {
            Registered::Added(subscription) => tracing::debug!(
                uri = %self.inner.uri,
                listener = L::NAME,
                domain = domain.map(DomainHandle::name),
                subscription = subscription.0,
                "listener added"
            ),
            Registered::AlreadyPresent => tracing::trace!(
                uri = %self.inner.uri,
                listener = L::NAME,
                "listener already registered"
            ),
        }
        #[cfg(not(feature = "tracing"))]
        let _ = outcome;

        Ok(())
    }

    fn remove_listener<L>(&self, listener: &Arc<L>) -> Result<()>
    where
        L: ListenerShape + ?Sized,
    {
        let removed = self
            .inner
            .registry
            .deregister(
                &*self.inner.transport,
                self.inner.session,
                L::KIND,
                ListenerKey::of(listener),
            )
            .map_err(reported)?;

        #[cfg(feature = "tracing")]
        if let Some(registration) = &removed {
            tracing::debug!(
                uri = %self.inner.uri,
                listener = L::NAME,
                domain = registration.domain().map(DomainHandle::name),
                subscription = registration.remote_id().0,
                "listener removed"
            );
        }
        drop(removed);

        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        Ok(())
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("uri", &self.inner.uri)
            .field("session", &self.inner.session)
            .field("read_only", &self.inner.read_only)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Inner {
    /// End the session from this side.
    ///
    /// With `keep_alive` the close listener holds the connection until the
    /// close notice has been dispatched.
    fn shutdown(&self, keep_alive: Option<&Arc<Inner>>) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        OPEN_SESSIONS.fetch_sub(1, Ordering::AcqRel);

        for (_kind, registration) in self.registry.drain() {
            if let Err(e) = self
                .transport
                .deregister_event_callback(self.session, registration.remote_id())
            {
                #[cfg(feature = "tracing")]
                tracing::warn!(uri = %self.uri, kind = ?_kind, error = %e, "failed to cancel subscription on close");
                error_callback::report(&e);
            }
        }

        if let Some(inner) = keep_alive {
            self.close.pin(inner);
        }
        let result = self.transport.close_session(self.session).map_err(reported);
        if result.is_err() {
            self.close.unpin();
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(uri = %self.uri, session = %self.session, "session closed");

        result
    }

    /// The daemon ended the session. Local state is released without
    /// calling back into the transport.
    pub(crate) fn session_ended(&self, reason: ConnectionCloseReason) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        OPEN_SESSIONS.fetch_sub(1, Ordering::AcqRel);
        let dropped = self.registry.drain();

        #[cfg(feature = "tracing")]
        tracing::debug!(
            uri = %self.uri,
            session = %self.session,
            ?reason,
            subscriptions = dropped.len(),
            "session ended by the daemon"
        );
        #[cfg(not(feature = "tracing"))]
        let _ = reason;

        drop(dropped);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Errors were already reported.
        let _ = self.shutdown(None);
    }
}

fn reported(err: Error) -> Error {
    error_callback::report(&err);
    err
}
