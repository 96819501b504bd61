//! Process-wide event loop control.
//!
//! Deliveries from the transport are only dispatched while some thread
//! drives the loop, either manually through [`process_event`] or through
//! [`run_event_loop`]. The crate never spawns that thread itself.
//!
//! ```no_run
//! # fn demo() -> virt_events::Result<()> {
//! virt_events::init_event_loop()?;
//!
//! let driver = std::thread::spawn(virt_events::run_event_loop);
//! // ... open connections, register listeners ...
//! virt_events::stop_event_loop()?;
//! driver.join().expect("loop thread panicked")?;
//! # Ok(()) }
//! ```

mod default_impl;

pub use default_impl::{
    DefaultLoop, Dispatch, DispatchQueue, TimerCallback, TimerId, TimerTimeout,
};

use std::sync::{
    atomic::{AtomicU8, Ordering},
    Arc,
};

use parking_lot::{const_mutex, Mutex};
use serde::{Deserialize, Serialize};

use crate::{
    connection,
    error::{Error, Result},
    interrupt::InterruptToken,
};

/// Lifecycle of an [`EventLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum LoopState {
    /// [`EventLoop::init`] has not been called.
    Uninitialized = 0,
    /// Initialized, nobody is running the loop.
    Idle = 1,
    /// A thread is inside [`EventLoop::run`].
    Running = 2,
    /// [`EventLoop::stop`] was called, the running thread has not noticed yet.
    StopRequested = 3,
}

impl LoopState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Idle,
            2 => Self::Running,
            3 => Self::StopRequested,
            _ => Self::Uninitialized,
        }
    }
}

struct Installed {
    backend: Arc<DefaultLoop>,
    sentinel: TimerId,
}

/// Event loop controller.
///
/// Most applications use the process-wide instance behind
/// [`EventLoop::global`] and the free functions of this module. Separate
/// instances are useful when an embedding wants its own dispatch thread.
pub struct EventLoop {
    state: AtomicU8,
    installed: Mutex<Option<Installed>>,
}

static GLOBAL: EventLoop = EventLoop::new();

impl EventLoop {
    /// Create an uninitialized controller.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(LoopState::Uninitialized as u8),
            installed: const_mutex(None),
        }
    }

    /// The process-wide controller.
    #[must_use]
    pub fn global() -> &'static EventLoop {
        &GLOBAL
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> LoopState {
        LoopState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Install the default loop implementation and allocate the sentinel timer.
    ///
    /// Calling this again after a successful initialization does nothing.
    pub fn init(&self) -> Result<()> {
        let mut installed = self.installed.lock();
        if installed.is_some() {
            return Ok(());
        }

        let backend = Arc::new(DefaultLoop::new()?);
        // The sentinel exists only to be forced to fire by `stop`, which
        // unblocks a waiting iteration. It disarms itself once fired.
        let sentinel = backend.add_timer(TimerTimeout::Disabled, |lp, id| {
            // The timer exists as long as the loop does.
            let _ = lp.update_timer(id, TimerTimeout::Disabled);
        });

        *installed = Some(Installed { backend, sentinel });
        self.state
            .store(LoopState::Idle as u8, Ordering::Release);

        #[cfg(feature = "tracing")]
        tracing::debug!("event loop initialized");

        Ok(())
    }

    /// Handle for transports to post deliveries into.
    pub fn dispatch_queue(&self) -> Result<DispatchQueue> {
        Ok(self.backend()?.queue())
    }

    /// Run a single iteration of the loop on the calling thread.
    ///
    /// Blocks until at least one delivery or timer is ready. Fails with
    /// [`Error::LoopBusy`] while another thread is inside [`run`](Self::run).
    pub fn process_event(&self) -> Result<()> {
        let backend = self.backend()?;
        if matches!(self.state(), LoopState::Running | LoopState::StopRequested) {
            return Err(Error::LoopBusy);
        }
        let result = backend.run_one_iteration(None);

        #[cfg(feature = "tracing")]
        if let Err(e) = &result {
            log_iteration_error(e);
        }

        result
    }

    /// Drive the loop on the calling thread until [`stop`](Self::stop) is
    /// called or an iteration fails.
    pub fn run(&self) -> Result<()> {
        self.run_inner(None)
    }

    /// Like [`run`](Self::run), but also returns [`Error::Interrupted`] as
    /// soon as `token` is triggered.
    pub fn run_until_interrupted(&self, token: &InterruptToken) -> Result<()> {
        self.run_inner(Some(token))
    }

    /// Ask a running loop to return. Does nothing when the loop is not running.
    ///
    /// May be called from any thread.
    pub fn stop(&self) -> Result<()> {
        let switched = self.state.compare_exchange(
            LoopState::Running as u8,
            LoopState::StopRequested as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if switched.is_err() {
            return Ok(());
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("event loop stop requested");

        let (backend, sentinel) = self.installed()?;
        backend.update_timer(sentinel, TimerTimeout::Immediate)
    }

    fn run_inner(&self, interrupt: Option<&InterruptToken>) -> Result<()> {
        let backend = self.backend()?;
        if let Err(current) = self.state.compare_exchange(
            LoopState::Idle as u8,
            LoopState::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            return Err(match LoopState::from_u8(current) {
                LoopState::Uninitialized => Error::NotInitialized,
                _ => Error::LoopBusy,
            });
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("event loop running");

        let result = loop {
            if self.state() != LoopState::Running {
                break Ok(());
            }
            if let Err(e) = backend.run_one_iteration(interrupt) {
                break Err(e);
            }
        };

        self.state
            .store(LoopState::Idle as u8, Ordering::Release);

        #[cfg(feature = "tracing")]
        match &result {
            Ok(()) => tracing::debug!("event loop stopped"),
            Err(e) => log_iteration_error(e),
        }

        result
    }

    fn backend(&self) -> Result<Arc<DefaultLoop>> {
        self.installed().map(|(backend, _)| backend)
    }

    fn installed(&self) -> Result<(Arc<DefaultLoop>, TimerId)> {
        self.installed
            .lock()
            .as_ref()
            .map(|i| (i.backend.clone(), i.sentinel))
            .ok_or(Error::NotInitialized)
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(feature = "tracing")]
fn log_iteration_error(e: &Error) {
    if e.is_fatal() {
        tracing::error!(error = %e, "listener fault, loop-driving thread must not continue");
    } else {
        tracing::warn!(error = %e, "event loop iteration failed");
    }
}

/// Initialize the process-wide event loop.
///
/// Must happen before the first connection is opened; otherwise
/// [`Error::SessionAlreadyOpen`] is returned.
pub fn init_event_loop() -> Result<()> {
    let global = EventLoop::global();
    if global.state() == LoopState::Uninitialized {
        let open_sessions = connection::open_sessions();
        if open_sessions > 0 {
            return Err(Error::SessionAlreadyOpen { open_sessions });
        }
    }
    global.init()
}

/// Run one iteration of the process-wide event loop.
pub fn process_event() -> Result<()> {
    EventLoop::global().process_event()
}

/// Drive the process-wide event loop until [`stop_event_loop`] is called.
pub fn run_event_loop() -> Result<()> {
    EventLoop::global().run()
}

/// Drive the process-wide event loop until stopped or `token` is triggered.
pub fn run_event_loop_until(token: &InterruptToken) -> Result<()> {
    EventLoop::global().run_until_interrupted(token)
}

/// Stop the process-wide event loop.
pub fn stop_event_loop() -> Result<()> {
    EventLoop::global().stop()
}

/// State of the process-wide event loop.
#[must_use]
pub fn event_loop_state() -> LoopState {
    EventLoop::global().state()
}
