//! Interface to the RPC transport.
//!
//! The binding does not talk to the daemon itself. A [`Transport`]
//! implementation opens sessions, keeps the daemon-side subscriptions and
//! posts every delivery it receives into the loop's
//! [`DispatchQueue`](crate::event_loop::DispatchQueue). The dispatch closure
//! upgrades the [`Weak`] trampoline it was handed at registration time and
//! calls [`Trampoline::deliver`]; once the binding drops a registration the
//! upgrade fails and the delivery is discarded.

use std::{fmt, sync::Weak};

use serde::{Deserialize, Serialize};

use crate::{
    connection::ConnectOptions,
    error::Result,
    types::{DomainHandle, EventKind},
};

/// Transport-level session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Identifier of one event subscription, as returned by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(pub i32);

/// Native payload of a delivery, before decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
#[non_exhaustive]
pub enum RawPayload {
    /// Lifecycle `(event, detail)` code pair.
    Lifecycle {
        /// Event type code.
        event: i32,
        /// Detail code, relative to `event`.
        detail: i32,
    },
    /// Events without payload (reboot).
    Generic,
    /// Disk I/O error.
    IoError {
        /// Source path of the failing disk.
        src_path: String,
        /// Device alias of the failing disk.
        dev_alias: String,
        /// Action code.
        action: i32,
    },
    /// Block job progress.
    BlockJob {
        /// Disk the job runs on.
        disk: String,
        /// Job type code.
        job_type: i32,
        /// Status code.
        status: i32,
    },
    /// Power-management suspend or wakeup.
    PmChange {
        /// Reason code.
        reason: i32,
    },
    /// Guest agent (dis)connect.
    AgentLifecycle {
        /// State code.
        state: i32,
        /// Reason code.
        reason: i32,
    },
}

/// One delivery as surfaced by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDelivery {
    /// Event kind the subscription was made for.
    pub kind: EventKind,
    /// Domain the event concerns.
    pub domain: DomainHandle,
    /// Undecoded payload.
    pub payload: RawPayload,
}

/// Adapter the transport invokes for each delivery of one subscription.
pub trait Trampoline: Send + Sync {
    /// Event kind this trampoline decodes.
    fn kind(&self) -> EventKind;

    /// Decode `delivery` and call the listener.
    ///
    /// Runs on the loop-driving thread. An error returned here ends the
    /// current loop iteration with that error.
    fn deliver(&self, delivery: RawDelivery) -> Result<()>;
}

/// Adapter the transport invokes when a session ends.
pub trait CloseCallback: Send + Sync {
    /// Called with the raw close reason code.
    fn on_close(&self, reason: i32) -> Result<()>;
}

/// The RPC layer consumed by [`Connection`](crate::Connection).
///
/// All methods may be called from any thread. Implementations must never call
/// a trampoline synchronously from inside one of these methods; deliveries go
/// through the dispatch queue.
pub trait Transport: Send + Sync {
    /// Open a session to `uri`.
    fn open_session(&self, uri: &str, options: &ConnectOptions) -> Result<SessionId>;

    /// End a session. A registered close callback fires with the
    /// client-requested reason.
    fn close_session(&self, session: SessionId) -> Result<()>;

    /// Subscribe to `kind` events, optionally narrowed to one domain.
    fn register_event_callback(
        &self,
        session: SessionId,
        domain: Option<&DomainHandle>,
        kind: EventKind,
        trampoline: Weak<dyn Trampoline>,
    ) -> Result<SubscriptionId>;

    /// Cancel a subscription.
    fn deregister_event_callback(
        &self,
        session: SessionId,
        subscription: SubscriptionId,
    ) -> Result<()>;

    /// Install the close callback of a session. Fails if one is already set.
    fn register_close_callback(
        &self,
        session: SessionId,
        callback: Weak<dyn CloseCallback>,
    ) -> Result<()>;

    /// Remove the close callback of a session.
    fn unregister_close_callback(&self, session: SessionId) -> Result<()>;
}
