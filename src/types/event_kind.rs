code_enum! {
    /// Top-level classification of a domain event.
    ///
    /// The codes are the daemon's event identifiers. [`EventKind::Unknown`]
    /// stands for any identifier this binding does not know yet.
    pub enum EventKind {
        /// Domain lifecycle change.
        Lifecycle = 0,
        /// Domain reboot.
        Reboot = 1,
        /// Guest RTC change.
        RtcChange = 2,
        /// Watchdog fired.
        Watchdog = 3,
        /// Disk I/O error.
        IoError = 4,
        /// Graphics client (dis)connect.
        Graphics = 5,
        /// Disk I/O error with a reason string.
        IoErrorReason = 6,
        /// Control channel error.
        ControlError = 7,
        /// Block job progress.
        BlockJob = 8,
        /// Removable media change.
        DiskChange = 9,
        /// Tray open/close.
        TrayChange = 10,
        /// Power-management wakeup.
        PmWakeup = 11,
        /// Power-management suspend to memory.
        PmSuspend = 12,
        /// Balloon size change.
        BalloonChange = 13,
        /// Power-management suspend to disk.
        PmSuspendDisk = 14,
        /// Device removed.
        DeviceRemoved = 15,
        /// Block job progress, keyed by target.
        BlockJob2 = 16,
        /// Tunable parameters changed.
        Tunable = 17,
        /// Guest agent connected or disconnected.
        AgentLifecycle = 18,
        /// Device added.
        DeviceAdded = 19,
        /// Migration iteration finished.
        MigrationIteration = 20,
        /// Job completed.
        JobCompleted = 21,
        /// Device removal failed.
        DeviceRemovalFailed = 22,
        /// Metadata changed.
        MetadataChange = 23,
        /// Block threshold reached.
        BlockThreshold = 24,
        @unknown
        /// Identifier newer than this binding.
        Unknown = 25,
    }
}

impl EventKind {
    /// Number of known event kinds.
    pub const COUNT: usize = 25;

    /// Stable table index for known kinds, `None` for [`EventKind::Unknown`].
    #[must_use]
    pub fn index(self) -> Option<usize> {
        if self.is_unknown() {
            None
        } else {
            usize::try_from(self.code()).ok()
        }
    }
}
