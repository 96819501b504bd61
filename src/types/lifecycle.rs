use std::fmt;

use serde::{Deserialize, Serialize};

code_enum! {
    /// Type of a domain lifecycle event.
    pub enum DomainEventType {
        /// A domain was defined.
        Defined = 0,
        /// A domain was undefined.
        Undefined = 1,
        /// A domain was started.
        Started = 2,
        /// A domain was suspended.
        Suspended = 3,
        /// A domain was resumed.
        Resumed = 4,
        /// A domain was stopped.
        Stopped = 5,
        /// A domain was shut down.
        Shutdown = 6,
        /// A domain was PM suspended.
        PmSuspended = 7,
        /// A domain crashed.
        Crashed = 8,
        @unknown
        /// The daemon reported an event type this binding does not know.
        Unknown = 9,
    }
}

code_enum! {
    /// Details of a [`DomainEventType::Defined`] event.
    pub enum DefinedDetail {
        /// Newly created config file.
        Added = 0,
        /// Changed config file.
        Updated = 1,
        @unknown
        /// Unrecognized detail.
        Unknown = 2,
    }
}

code_enum! {
    /// Details of a [`DomainEventType::Undefined`] event.
    pub enum UndefinedDetail {
        /// Deleted the config file.
        Removed = 0,
        @unknown
        /// Unrecognized detail.
        Unknown = 1,
    }
}

code_enum! {
    /// Details of a [`DomainEventType::Started`] event.
    pub enum StartedDetail {
        /// Normal startup from boot.
        Booted = 0,
        /// Incoming migration from another host.
        Migrated = 1,
        /// Restored from a state file.
        Restored = 2,
        /// Restored from snapshot.
        FromSnapshot = 3,
        /// Started due to wakeup event.
        Wakeup = 4,
        @unknown
        /// Unrecognized detail.
        Unknown = 5,
    }
}

code_enum! {
    /// Details of a [`DomainEventType::Suspended`] event.
    pub enum SuspendedDetail {
        /// Normal suspend due to admin pause.
        Paused = 0,
        /// Suspended for offline migration.
        Migrated = 1,
        /// Suspended due to a disk I/O error.
        IoError = 2,
        /// Suspended due to a watchdog firing.
        Watchdog = 3,
        /// Restored from paused state file.
        Restored = 4,
        /// Restored from paused snapshot.
        FromSnapshot = 5,
        /// Suspended after failure during an API call.
        ApiError = 6,
        @unknown
        /// Unrecognized detail.
        Unknown = 7,
    }
}

code_enum! {
    /// Details of a [`DomainEventType::Resumed`] event.
    pub enum ResumedDetail {
        /// Normal resume due to admin unpause.
        Unpaused = 0,
        /// Resumed for completion of migration.
        Migrated = 1,
        /// Resumed from snapshot.
        FromSnapshot = 2,
        @unknown
        /// Unrecognized detail.
        Unknown = 3,
    }
}

code_enum! {
    /// Details of a [`DomainEventType::Stopped`] event.
    pub enum StoppedDetail {
        /// Normal shutdown.
        Shutdown = 0,
        /// Forced poweroff from host.
        Destroyed = 1,
        /// Guest crashed.
        Crashed = 2,
        /// Migrated off to another host.
        Migrated = 3,
        /// Saved to a state file.
        Saved = 4,
        /// Host emulator/mgmt failed.
        Failed = 5,
        /// Offline snapshot was loaded.
        FromSnapshot = 6,
        @unknown
        /// Unrecognized detail.
        Unknown = 7,
    }
}

code_enum! {
    /// Details of a [`DomainEventType::Shutdown`] event.
    pub enum ShutdownDetail {
        /// Guest finished shutdown sequence.
        Finished = 0,
        @unknown
        /// Unrecognized detail.
        Unknown = 1,
    }
}

code_enum! {
    /// Details of a [`DomainEventType::PmSuspended`] event.
    pub enum PmSuspendedDetail {
        /// Guest was PM suspended to memory.
        Memory = 0,
        /// Guest was PM suspended to disk.
        Disk = 1,
        @unknown
        /// Unrecognized detail.
        Unknown = 2,
    }
}

code_enum! {
    /// Details of a [`DomainEventType::Crashed`] event.
    pub enum CrashedDetail {
        /// Guest was panicked.
        Panicked = 0,
        @unknown
        /// Unrecognized detail.
        Unknown = 1,
    }
}

/// Detail of a lifecycle event, typed by the event's [`DomainEventType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "detail", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DomainEventDetail {
    /// Detail of a defined event.
    Defined(DefinedDetail),
    /// Detail of an undefined event.
    Undefined(UndefinedDetail),
    /// Detail of a started event.
    Started(StartedDetail),
    /// Detail of a suspended event.
    Suspended(SuspendedDetail),
    /// Detail of a resumed event.
    Resumed(ResumedDetail),
    /// Detail of a stopped event.
    Stopped(StoppedDetail),
    /// Detail of a shutdown event.
    Shutdown(ShutdownDetail),
    /// Detail of a PM suspended event.
    PmSuspended(PmSuspendedDetail),
    /// Detail of a crashed event.
    Crashed(CrashedDetail),
    /// Raw detail code of an event type this binding does not know.
    Unknown(i32),
}

impl DomainEventDetail {
    /// Decode `code` relative to `kind`.
    #[must_use]
    pub fn decode(kind: DomainEventType, code: i32) -> Self {
        match kind {
            DomainEventType::Defined => Self::Defined(DefinedDetail::from_code(code)),
            DomainEventType::Undefined => Self::Undefined(UndefinedDetail::from_code(code)),
            DomainEventType::Started => Self::Started(StartedDetail::from_code(code)),
            DomainEventType::Suspended => Self::Suspended(SuspendedDetail::from_code(code)),
            DomainEventType::Resumed => Self::Resumed(ResumedDetail::from_code(code)),
            DomainEventType::Stopped => Self::Stopped(StoppedDetail::from_code(code)),
            DomainEventType::Shutdown => Self::Shutdown(ShutdownDetail::from_code(code)),
            DomainEventType::PmSuspended => Self::PmSuspended(PmSuspendedDetail::from_code(code)),
            DomainEventType::Crashed => Self::Crashed(CrashedDetail::from_code(code)),
            DomainEventType::Unknown => Self::Unknown(code),
        }
    }

    /// The raw detail code.
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::Defined(d) => d.code(),
            Self::Undefined(d) => d.code(),
            Self::Started(d) => d.code(),
            Self::Suspended(d) => d.code(),
            Self::Resumed(d) => d.code(),
            Self::Stopped(d) => d.code(),
            Self::Shutdown(d) => d.code(),
            Self::PmSuspended(d) => d.code(),
            Self::Crashed(d) => d.code(),
            Self::Unknown(code) => code,
        }
    }

    /// Every known detail of `kind`, in code order.
    #[must_use]
    pub fn known_for(kind: DomainEventType) -> Vec<Self> {
        fn wrap<T: Copy>(known: &[T], f: fn(T) -> DomainEventDetail) -> Vec<DomainEventDetail> {
            known.iter().copied().map(f).collect()
        }

        match kind {
            DomainEventType::Defined => wrap(DefinedDetail::KNOWN, Self::Defined),
            DomainEventType::Undefined => wrap(UndefinedDetail::KNOWN, Self::Undefined),
            DomainEventType::Started => wrap(StartedDetail::KNOWN, Self::Started),
            DomainEventType::Suspended => wrap(SuspendedDetail::KNOWN, Self::Suspended),
            DomainEventType::Resumed => wrap(ResumedDetail::KNOWN, Self::Resumed),
            DomainEventType::Stopped => wrap(StoppedDetail::KNOWN, Self::Stopped),
            DomainEventType::Shutdown => wrap(ShutdownDetail::KNOWN, Self::Shutdown),
            DomainEventType::PmSuspended => wrap(PmSuspendedDetail::KNOWN, Self::PmSuspended),
            DomainEventType::Crashed => wrap(CrashedDetail::KNOWN, Self::Crashed),
            DomainEventType::Unknown => Vec::new(),
        }
    }
}

impl fmt::Display for DomainEventDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Defined(d) => write!(f, "{d}"),
            Self::Undefined(d) => write!(f, "{d}"),
            Self::Started(d) => write!(f, "{d}"),
            Self::Suspended(d) => write!(f, "{d}"),
            Self::Resumed(d) => write!(f, "{d}"),
            Self::Stopped(d) => write!(f, "{d}"),
            Self::Shutdown(d) => write!(f, "{d}"),
            Self::PmSuspended(d) => write!(f, "{d}"),
            Self::Crashed(d) => write!(f, "{d}"),
            Self::Unknown(code) => write!(f, "{code}"),
        }
    }
}

/// A lifecycle change of a domain: what happened, and why.
///
/// ```
/// use virt_events::types::{DomainEvent, DomainEventDetail, DomainEventType, StartedDetail};
///
/// let event = DomainEvent::from_codes(2, 0);
/// assert_eq!(event.kind(), DomainEventType::Started);
/// assert_eq!(event.detail(), DomainEventDetail::Started(StartedDetail::Booted));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DomainEvent {
    kind: DomainEventType,
    detail: DomainEventDetail,
}

impl DomainEvent {
    /// Decode a raw `(event, detail)` code pair.
    #[must_use]
    pub fn from_codes(event: i32, detail: i32) -> Self {
        let kind = DomainEventType::from_code(event);
        Self {
            kind,
            detail: DomainEventDetail::decode(kind, detail),
        }
    }

    /// Encode back into a raw `(event, detail)` code pair.
    #[must_use]
    pub fn to_codes(self) -> (i32, i32) {
        (self.kind.code(), self.detail.code())
    }

    /// Event type.
    #[must_use]
    pub fn kind(self) -> DomainEventType {
        self.kind
    }

    /// Event detail.
    #[must_use]
    pub fn detail(self) -> DomainEventDetail {
        self.detail
    }
}

impl fmt::Display for DomainEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.kind, self.detail)
    }
}
