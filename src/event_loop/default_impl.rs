//! The default event loop implementation.
//!
//! Transports post deliveries into a FIFO [`DispatchQueue`]; the thread that
//! drives the loop blocks in [`DefaultLoop::run_one_iteration`] until a
//! delivery or a timer is ready and then dispatches it. The wait runs on a
//! private current-thread Tokio runtime, so timers and wakeups from other
//! threads interrupt it without polling.

use std::{
    collections::BTreeMap,
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tokio::{
    runtime::Runtime,
    sync::{mpsc, Notify},
};

use crate::{
    error::{Error, Result},
    interrupt::InterruptToken,
};

/// A unit of work posted by the transport, run on the loop-driving thread.
pub type Dispatch = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// Callback invoked when a timer fires.
pub type TimerCallback = Arc<dyn Fn(&DefaultLoop, TimerId) + Send + Sync + 'static>;

/// Identifier of a timer registered with a [`DefaultLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

/// How often a timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerTimeout {
    /// Never fires.
    Disabled,
    /// Fires on every loop iteration.
    Immediate,
    /// Fires once per period.
    Every(Duration),
}

impl TimerTimeout {
    /// Convert the daemon's millisecond convention: negative disables the
    /// timer, zero fires on every iteration, positive values are a period.
    #[must_use]
    pub fn from_millis(ms: i64) -> Self {
        match ms {
            ms if ms < 0 => Self::Disabled,
            0 => Self::Immediate,
            ms => Self::Every(Duration::from_millis(ms.unsigned_abs())),
        }
    }

    fn deadline_from(self, now: Instant) -> Option<Instant> {
        match self {
            Self::Disabled => None,
            Self::Immediate => Some(now),
            Self::Every(period) => Some(now + period),
        }
    }
}

/// Producer side of the loop's dispatch queue.
///
/// Clones post into the same queue. Deliveries are dispatched strictly in the
/// order they were posted.
#[derive(Clone)]
pub struct DispatchQueue {
    tx: mpsc::UnboundedSender<Dispatch>,
}

impl DispatchQueue {
    /// Post a delivery to be dispatched on the loop-driving thread.
    pub fn post<F>(&self, dispatch: F) -> Result<()>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.tx
            .send(Box::new(dispatch))
            .map_err(|_| Error::loop_failure("event loop has been dropped"))
    }

    /// Whether the loop behind this queue is gone.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl fmt::Debug for DispatchQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchQueue")
            .field("closed", &self.is_closed())
            .finish()
    }
}

struct TimerEntry {
    timeout: TimerTimeout,
    deadline: Option<Instant>,
    callback: TimerCallback,
}

#[derive(Default)]
struct TimerTable {
    next_id: u64,
    entries: BTreeMap<TimerId, TimerEntry>,
}

impl TimerTable {
    fn next_deadline(&self) -> Option<Instant> {
        self.entries.values().filter_map(|e| e.deadline).min()
    }

    /// Advance every due timer and return the callbacks to run.
    fn take_due(&mut self, now: Instant) -> Vec<(TimerId, TimerCallback)> {
        let mut due = Vec::new();
        for (id, entry) in &mut self.entries {
            if entry.deadline.is_some_and(|d| d <= now) {
                entry.deadline = entry.timeout.deadline_from(now);
                due.push((*id, entry.callback.clone()));
            }
        }
        due
    }
}

/// State owned by whichever thread currently drives the loop.
struct Driver {
    rx: mpsc::UnboundedReceiver<Dispatch>,
    runtime: Runtime,
}

enum Wake {
    Dispatch(Option<Dispatch>),
    Timers,
    Interrupted,
}

/// Poll-style event loop with a dispatch queue and timers.
pub struct DefaultLoop {
    tx: mpsc::UnboundedSender<Dispatch>,
    driver: Mutex<Driver>,
    timers: Mutex<TimerTable>,
    timers_changed: Notify,
}

impl DefaultLoop {
    /// Create a loop with an empty queue and no timers.
    pub fn new() -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| Error::loop_failure(format!("failed to build loop runtime: {e}")))?;
        let (tx, rx) = mpsc::unbounded_channel();

        Ok(Self {
            tx,
            driver: Mutex::new(Driver { rx, runtime }),
            timers: Mutex::new(TimerTable::default()),
            timers_changed: Notify::new(),
        })
    }

    /// A producer handle for transports.
    #[must_use]
    pub fn queue(&self) -> DispatchQueue {
        DispatchQueue {
            tx: self.tx.clone(),
        }
    }

    /// Register a timer.
    pub fn add_timer<F>(&self, timeout: TimerTimeout, callback: F) -> TimerId
    where
        F: Fn(&DefaultLoop, TimerId) + Send + Sync + 'static,
    {
        let mut timers = self.timers.lock();
        timers.next_id += 1;
        let id = TimerId(timers.next_id);
        timers.entries.insert(
            id,
            TimerEntry {
                timeout,
                deadline: timeout.deadline_from(Instant::now()),
                callback: Arc::new(callback),
            },
        );
        drop(timers);

        self.timers_changed.notify_one();
        id
    }

    /// Change how often a timer fires.
    ///
    /// This is safe to call from any thread and wakes a blocked iteration so
    /// the new deadline takes effect immediately.
    pub fn update_timer(&self, id: TimerId, timeout: TimerTimeout) -> Result<()> {
        let mut timers = self.timers.lock();
        let entry = timers
            .entries
            .get_mut(&id)
            .ok_or_else(|| Error::loop_failure(format!("unknown timer {id:?}")))?;
        entry.timeout = timeout;
        entry.deadline = timeout.deadline_from(Instant::now());
        drop(timers);

        self.timers_changed.notify_one();
        Ok(())
    }

    /// Remove a timer. Returns `false` when it did not exist.
    pub fn remove_timer(&self, id: TimerId) -> bool {
        let removed = self.timers.lock().entries.remove(&id).is_some();
        if removed {
            self.timers_changed.notify_one();
        }
        removed
    }

    /// Run one loop iteration.
    ///
    /// Blocks until at least one timer is due or one delivery is queued, then
    /// fires the due timers and dispatches at most one delivery. The error of
    /// a failing delivery is returned as is.
    ///
    /// Must not be called from inside an async runtime.
    pub fn run_one_iteration(&self, interrupt: Option<&InterruptToken>) -> Result<()> {
        let mut driver = self.driver.try_lock().ok_or(Error::LoopBusy)?;
        let Driver { rx, runtime } = &mut *driver;

        loop {
            if interrupt.is_some_and(InterruptToken::is_interrupted) {
                return Err(Error::Interrupted);
            }

            if self.fire_due_timers() {
                // Timers firing on every iteration must not starve deliveries.
                return match rx.try_recv() {
                    Ok(dispatch) => dispatch(),
                    Err(_) => Ok(()),
                };
            }

            let deadline = self.timers.lock().next_deadline();
            let wake = runtime.block_on(async {
                let sleep = async {
                    match deadline {
                        Some(at) => tokio::time::sleep_until(at.into()).await,
                        None => std::future::pending::<()>().await,
                    }
                };
                let interrupted = async {
                    match interrupt {
                        Some(token) => token.interrupted().await,
                        None => std::future::pending::<()>().await,
                    }
                };

                tokio::select! {
                    biased;
                    _ = interrupted => Wake::Interrupted,
                    dispatch = rx.recv() => Wake::Dispatch(dispatch),
                    _ = self.timers_changed.notified() => Wake::Timers,
                    _ = sleep => Wake::Timers,
                }
            });

            match wake {
                Wake::Dispatch(Some(dispatch)) => return dispatch(),
                // `self.tx` keeps the channel open.
                Wake::Dispatch(None) => return Err(Error::loop_failure("dispatch queue closed")),
                Wake::Timers => continue,
                Wake::Interrupted => return Err(Error::Interrupted),
            }
        }
    }

    fn fire_due_timers(&self) -> bool {
        // Callbacks may update timers, so they run without the table lock.
        let due = self.timers.lock().take_due(Instant::now());
        for (id, callback) in &due {
            #[cfg(feature = "tracing")]
            tracing::trace!(timer = id.0, "timer fired");
            callback(self, *id);
        }
        !due.is_empty()
    }
}

impl fmt::Debug for DefaultLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultLoop")
            .field("timers", &self.timers.lock().entries.len())
            .finish()
    }
}
