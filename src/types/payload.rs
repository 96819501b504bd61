code_enum! {
    /// Action taken by the hypervisor after a disk I/O error.
    pub enum IoErrorAction {
        /// No action, I/O error ignored.
        None = 0,
        /// Guest CPUs are paused.
        Pause = 1,
        /// I/O error was reported to the guest OS.
        Report = 2,
        @unknown
        /// An unknown action was taken.
        Unknown = 3,
    }
}

code_enum! {
    /// Kind of block job an event refers to.
    pub enum BlockJobType {
        /// Block pull.
        Pull = 1,
        /// Block copy.
        Copy = 2,
        /// Block commit.
        Commit = 3,
        /// Active block commit.
        ActiveCommit = 4,
        /// Backup job.
        Backup = 5,
        @unknown
        /// Placeholder the daemon itself uses for unclassified jobs.
        Unknown = 0,
    }
}

code_enum! {
    /// Outcome reported by a block job event.
    pub enum BlockJobStatus {
        /// The job finished successfully.
        Completed = 0,
        /// The job failed.
        Failed = 1,
        /// The job was canceled.
        Canceled = 2,
        /// The job reached its synchronized phase.
        Ready = 3,
        @unknown
        /// Status newer than this binding.
        Unknown = 4,
    }
}

code_enum! {
    /// Reason attached to a PM suspend event.
    pub enum PmSuspendReason {
        @unknown
        /// The daemon does not define reasons yet.
        Unknown = 0,
    }
}

code_enum! {
    /// Reason attached to a PM wakeup event.
    pub enum PmWakeupReason {
        @unknown
        /// The daemon does not define reasons yet.
        Unknown = 0,
    }
}

code_enum! {
    /// New state of the guest agent channel.
    pub enum AgentLifecycleState {
        /// Agent connected.
        Connected = 1,
        /// Agent disconnected.
        Disconnected = 2,
        @unknown
        /// Unrecognized state.
        Unknown = 0,
    }
}

code_enum! {
    /// Why the guest agent state changed.
    pub enum AgentLifecycleReason {
        /// State changed due to domain start.
        DomainStarted = 1,
        /// Channel state changed.
        Channel = 2,
        @unknown
        /// Unrecognized reason.
        Unknown = 0,
    }
}

code_enum! {
    /// Why a connection was closed.
    pub enum ConnectionCloseReason {
        /// Misc I/O error.
        Error = 0,
        /// End-of-file from server.
        Eof = 1,
        /// Keepalive timer triggered.
        Keepalive = 2,
        /// Client requested it.
        Client = 3,
        @unknown
        /// Unrecognized reason.
        Unknown = 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_action_saturates() {
        assert_eq!(IoErrorAction::from_code(1), IoErrorAction::Pause);
        assert_eq!(IoErrorAction::from_code(3), IoErrorAction::Unknown);
        assert_eq!(IoErrorAction::from_code(17), IoErrorAction::Unknown);
    }

    #[test]
    fn tables_without_a_zero_member_map_zero_to_unknown() {
        assert_eq!(BlockJobType::from_code(0), BlockJobType::Unknown);
        assert_eq!(AgentLifecycleState::from_code(0), AgentLifecycleState::Unknown);
        assert_eq!(BlockJobType::Unknown.code(), 0);
    }

    #[test]
    fn reason_tables_with_no_known_members() {
        assert!(PmSuspendReason::KNOWN.is_empty());
        assert_eq!(PmWakeupReason::from_code(5), PmWakeupReason::Unknown);
    }

    #[test]
    fn close_reasons_round_trip() {
        for reason in ConnectionCloseReason::KNOWN {
            assert_eq!(ConnectionCloseReason::from_code(reason.code()), *reason);
        }
        assert!(ConnectionCloseReason::from_code(9).is_unknown());
    }

    #[test]
    fn display_matches_serialized_name() {
        assert_eq!(BlockJobType::ActiveCommit.to_string(), "ACTIVE_COMMIT");
        assert_eq!(AgentLifecycleReason::DomainStarted.to_string(), "DOMAIN_STARTED");
        assert_eq!(PmWakeupReason::Unknown.to_string(), "UNKNOWN");

        for job in BlockJobType::KNOWN {
            let serialized = serde_json::to_value(job).expect("serialize");
            assert_eq!(serialized, serde_json::Value::String(job.to_string()));
        }
    }
}
