//! Listener traits implemented by callers.
//!
//! Listener methods run on the loop-driving thread and must return quickly.
//! They must not block on I/O: the next delivery is not processed before the
//! current one returns.
//!
//! Every trait is implemented for matching closures, so a listener is
//! usually just:
//!
//! ```
//! use std::sync::Arc;
//! use virt_events::{Domain, LifecycleListener, types::DomainEvent};
//!
//! let listener: Arc<dyn LifecycleListener> = Arc::new(|domain: &Domain, event: DomainEvent| {
//!     println!("{}: {event}", domain.name());
//! });
//! # drop(listener);
//! ```
//!
//! Listener identity is the identity of the `Arc`: adding the same `Arc`
//! twice registers once, and removal needs the `Arc` that was added.

use crate::{
    connection::Connection,
    domain::Domain,
    types::{
        AgentLifecycleReason, AgentLifecycleState, BlockJobStatus, BlockJobType,
        ConnectionCloseReason, DomainEvent, IoErrorAction, PmSuspendReason, PmWakeupReason,
    },
};

/// Receives domain lifecycle changes.
pub trait LifecycleListener: Send + Sync {
    /// A domain changed its lifecycle state.
    fn on_lifecycle_change(&self, domain: &Domain, event: DomainEvent);
}

/// Receives guest reboots.
pub trait RebootListener: Send + Sync {
    /// The guest rebooted.
    fn on_reboot(&self, domain: &Domain);
}

/// Receives disk I/O errors.
pub trait IoErrorListener: Send + Sync {
    /// A disk I/O error occurred and `action` was taken.
    fn on_io_error(&self, domain: &Domain, src_path: &str, dev_alias: &str, action: IoErrorAction);
}

/// Receives block job progress.
pub trait BlockJobListener: Send + Sync {
    /// A block job on `disk` reached `status`.
    ///
    /// Called exactly once per delivery.
    fn on_block_job(
        &self,
        domain: &Domain,
        disk: &str,
        job_type: BlockJobType,
        status: BlockJobStatus,
    );
}

/// Receives power-management suspend notifications.
pub trait PmSuspendListener: Send + Sync {
    /// The guest was suspended by power management.
    fn on_pm_suspend(&self, domain: &Domain, reason: PmSuspendReason);
}

/// Receives power-management wakeup notifications.
pub trait PmWakeupListener: Send + Sync {
    /// The guest woke up.
    fn on_pm_wakeup(&self, domain: &Domain, reason: PmWakeupReason);
}

/// Receives guest agent lifecycle changes.
pub trait AgentLifecycleListener: Send + Sync {
    /// The guest agent connected or disconnected.
    fn on_agent_lifecycle(
        &self,
        domain: &Domain,
        state: AgentLifecycleState,
        reason: AgentLifecycleReason,
    );
}

/// Receives the end of a connection's session.
pub trait ConnectionCloseListener: Send + Sync {
    /// The session of `connection` ended.
    fn on_close(&self, connection: &Connection, reason: ConnectionCloseReason);
}

impl<F> LifecycleListener for F
where
    F: Fn(&Domain, DomainEvent) + Send + Sync,
{
    fn on_lifecycle_change(&self, domain: &Domain, event: DomainEvent) {
        self(domain, event);
    }
}

impl<F> RebootListener for F
where
    F: Fn(&Domain) + Send + Sync,
{
    fn on_reboot(&self, domain: &Domain) {
        self(domain);
    }
}

impl<F> IoErrorListener for F
where
    F: Fn(&Domain, &str, &str, IoErrorAction) + Send + Sync,
{
    fn on_io_error(&self, domain: &Domain, src_path: &str, dev_alias: &str, action: IoErrorAction) {
        self(domain, src_path, dev_alias, action);
    }
}

impl<F> BlockJobListener for F
where
    F: Fn(&Domain, &str, BlockJobType, BlockJobStatus) + Send + Sync,
{
    fn on_block_job(
        &self,
        domain: &Domain,
        disk: &str,
        job_type: BlockJobType,
        status: BlockJobStatus,
    ) {
        self(domain, disk, job_type, status);
    }
}

impl<F> PmSuspendListener for F
where
    F: Fn(&Domain, PmSuspendReason) + Send + Sync,
{
    fn on_pm_suspend(&self, domain: &Domain, reason: PmSuspendReason) {
        self(domain, reason);
    }
}

impl<F> PmWakeupListener for F
where
    F: Fn(&Domain, PmWakeupReason) + Send + Sync,
{
    fn on_pm_wakeup(&self, domain: &Domain, reason: PmWakeupReason) {
        self(domain, reason);
    }
}

impl<F> AgentLifecycleListener for F
where
    F: Fn(&Domain, AgentLifecycleState, AgentLifecycleReason) + Send + Sync,
{
    fn on_agent_lifecycle(
        &self,
        domain: &Domain,
        state: AgentLifecycleState,
        reason: AgentLifecycleReason,
    ) {
        self(domain, state, reason);
    }
}

impl<F> ConnectionCloseListener for F
where
    F: Fn(&Connection, ConnectionCloseReason) + Send + Sync,
{
    fn on_close(&self, connection: &Connection, reason: ConnectionCloseReason) {
        self(connection, reason);
    }
}
