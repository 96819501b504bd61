//! `virt-events` - event notification and loop control for a
//! virtualization-management daemon binding.
//!
//! The crate lets callers subscribe to asynchronous state changes of managed
//! domains (lifecycle, reboot, disk I/O errors, block jobs, power management,
//! guest agent) and of the connection itself, and it drives the single
//! process-wide loop through which those notifications are dispatched.
//!
//! It provides:
//! - a process-wide event loop controller with a cross-thread `stop`
//! - typed listener traits, implemented for plain closures
//! - a per-connection registry that makes registration idempotent and keeps
//!   adapters alive exactly as long as the transport may call them
//! - a single-slot connection close notification
//! - a forward-compatible event taxonomy: unknown codes decode to `Unknown`
//!
//! The RPC layer is not part of this crate; it is consumed through the
//! [`Transport`] trait.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use virt_events::{Connection, Domain, LifecycleListener, Transport, types::DomainEvent};
//!
//! # fn demo(transport: Arc<dyn Transport>) -> virt_events::Result<()> {
//! virt_events::init_event_loop()?;
//! let driver = std::thread::spawn(virt_events::run_event_loop);
//!
//! let conn = Connection::open(transport, "qemu:///system")?;
//! let listener: Arc<dyn LifecycleListener> = Arc::new(|domain: &Domain, event: DomainEvent| {
//!     println!("{}: {event}", domain.name());
//! });
//! conn.add_lifecycle_listener(listener.clone())?;
//!
//! // ...
//!
//! conn.remove_lifecycle_listener(&listener)?;
//! conn.close()?;
//! virt_events::stop_event_loop()?;
//! driver.join().expect("loop thread panicked")?;
//! # Ok(()) }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod close;
mod connection;
mod domain;
mod error_callback;
mod interrupt;
mod listener;
mod registry;
mod trampoline;

pub mod error;
pub mod event_loop;
pub mod transport;
pub mod types;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use connection::{ConnectOptions, Connection, ConnectionBuilder, Credentials};
pub use domain::Domain;
pub use error::{Error, ErrorKind, Result};
pub use error_callback::{set_error_callback, ErrorCallback};
pub use event_loop::{
    event_loop_state, init_event_loop, process_event, run_event_loop, run_event_loop_until,
    stop_event_loop, EventLoop, LoopState,
};
pub use interrupt::InterruptToken;
pub use listener::{
    AgentLifecycleListener, BlockJobListener, ConnectionCloseListener, IoErrorListener,
    LifecycleListener, PmSuspendListener, PmWakeupListener, RebootListener,
};
pub use transport::Transport;
