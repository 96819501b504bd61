//! Error model for the `virt-events` crate.

use thiserror::Error;

/// Convenience result type.
pub type Result<T> = std::result::Result<T, Error>;

/// High-level error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A call into the transport collaborator failed.
    Transport,
    /// An event loop iteration failed or the loop was busy.
    Loop,
    /// Listener code panicked while an event was dispatched.
    ListenerFault,
    /// An operation was issued in the wrong order (loop not initialized,
    /// session opened before the loop, connection already closed).
    OrderingViolation,
    /// The loop-driving thread was interrupted.
    Interrupted,
    /// A caller passed an argument the binding cannot act on.
    InvalidArgument,
}

/// Structured error type.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The transport rejected a registration, deregistration or session call.
    #[error("transport error during {operation}: {message}")]
    Transport {
        /// Transport operation that failed.
        operation: &'static str,
        /// Message reported by the transport.
        message: String,
    },

    /// An event loop iteration failed.
    #[error("event loop error: {message}")]
    Loop {
        /// Human readable message.
        message: String,
    },

    /// Another thread is already driving the event loop.
    #[error("event loop is already being driven by another thread")]
    LoopBusy,

    /// A listener panicked while handling a delivery.
    ///
    /// The loop-driving thread returns this error and should be considered
    /// dead; restarting it is up to the embedding application.
    #[error("{listener} listener panicked: {message}")]
    ListenerFault {
        /// Shape of the listener that panicked, e.g. `"lifecycle"`.
        listener: &'static str,
        /// Panic message, when it could be recovered.
        message: String,
    },

    /// The event loop has not been initialized yet.
    #[error("event loop is not initialized")]
    NotInitialized,

    /// The event loop was initialized after a session had been opened.
    #[error("event loop initialized after {open_sessions} session(s) were opened")]
    SessionAlreadyOpen {
        /// Number of sessions open at the time of the call.
        open_sessions: usize,
    },

    /// The connection has already been closed.
    #[error("connection is closed")]
    ConnectionClosed,

    /// The loop-driving thread was interrupted through an [`InterruptToken`].
    ///
    /// [`InterruptToken`]: crate::InterruptToken
    #[error("event loop interrupted")]
    Interrupted,

    /// Invalid argument.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Human readable message.
        message: String,
    },
}

impl Error {
    /// Returns a coarse error classification.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport { .. } => ErrorKind::Transport,
            Self::Loop { .. } | Self::LoopBusy => ErrorKind::Loop,
            Self::ListenerFault { .. } => ErrorKind::ListenerFault,
            Self::NotInitialized | Self::SessionAlreadyOpen { .. } | Self::ConnectionClosed => {
                ErrorKind::OrderingViolation
            }
            Self::Interrupted => ErrorKind::Interrupted,
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
        }
    }

    /// Whether the thread that observed this error should stop driving the loop.
    ///
    /// Only listener faults are fatal: there is no channel to report them
    /// back to whoever registered the listener.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::ListenerFault)
    }

    /// Create a transport error.
    pub fn transport(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Transport {
            operation,
            message: message.into(),
        }
    }

    pub(crate) fn loop_failure(message: impl Into<String>) -> Self {
        Self::Loop {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }
}
