//! Domain handles.

use std::sync::Arc;

use crate::{
    connection::Connection,
    error::Result,
    listener::{
        AgentLifecycleListener, BlockJobListener, IoErrorListener, LifecycleListener,
        PmSuspendListener, PmWakeupListener, RebootListener,
    },
    types::DomainHandle,
};

/// A managed domain, as seen through one [`Connection`].
///
/// Listeners receive a `&Domain`; cloning it keeps the connection alive
/// beyond the callback.
#[derive(Clone, Debug)]
pub struct Domain {
    conn: Connection,
    handle: DomainHandle,
}

impl Domain {
    pub(crate) fn new(conn: Connection, handle: DomainHandle) -> Self {
        Self { conn, handle }
    }

    /// Domain name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.handle.name()
    }

    /// Transport handle.
    #[must_use]
    pub fn handle(&self) -> &DomainHandle {
        &self.handle
    }

    /// Connection the domain was reached through.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    // Domain-scoped registrations share the connection's table: a listener
    // already added for another domain (or for all of them) is not added
    // again. Removal goes through the connection's `remove_*` methods.

    /// Receive lifecycle changes of this domain only.
    pub fn add_lifecycle_listener(&self, listener: Arc<dyn LifecycleListener>) -> Result<()> {
        self.conn.add_listener(Some(&self.handle), listener)
    }

    /// Receive reboots of this domain only.
    pub fn add_reboot_listener(&self, listener: Arc<dyn RebootListener>) -> Result<()> {
        self.conn.add_listener(Some(&self.handle), listener)
    }

    /// Receive disk I/O errors of this domain only.
    pub fn add_io_error_listener(&self, listener: Arc<dyn IoErrorListener>) -> Result<()> {
        self.conn.add_listener(Some(&self.handle), listener)
    }

    /// Receive block job progress of this domain only.
    pub fn add_block_job_listener(&self, listener: Arc<dyn BlockJobListener>) -> Result<()> {
        self.conn.add_listener(Some(&self.handle), listener)
    }

    /// Receive PM suspend notifications of this domain only.
    pub fn add_pm_suspend_listener(&self, listener: Arc<dyn PmSuspendListener>) -> Result<()> {
        self.conn.add_listener(Some(&self.handle), listener)
    }

    /// Receive PM wakeup notifications of this domain only.
    pub fn add_pm_wakeup_listener(&self, listener: Arc<dyn PmWakeupListener>) -> Result<()> {
        self.conn.add_listener(Some(&self.handle), listener)
    }

    /// Receive guest agent lifecycle changes of this domain only.
    pub fn add_agent_lifecycle_listener(
        &self,
        listener: Arc<dyn AgentLifecycleListener>,
    ) -> Result<()> {
        self.conn.add_listener(Some(&self.handle), listener)
    }
}

impl PartialEq for Domain {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle && self.conn.same_session(&other.conn)
    }
}

impl Eq for Domain {}
