//! Single-threaded readiness dispatch
//!
//! Every input the process reacts to (peer connections, listening sockets,
//! the relay itself) is a [`Selectable`] registered with an [`EventLoop`]
//! under its file number. Each tick the loop probes every registered
//! selectable without blocking, services the ready ones, then gives every
//! selectable a chance to do periodic work. When nothing was ready the loop
//! sleeps for the rest of the tick.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

/// Registry key: the OS file descriptor (or socket handle) of a selectable.
pub type FileNo = i64;

/// Period of one loop iteration when nothing is ready.
pub const TICK: Duration = Duration::from_millis(10);

/// Raised by a selectable that is done; the loop unregisters and closes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Finished;

/// Newly created selectables to register in the current iteration.
pub type Announced = Vec<Box<dyn Selectable>>;

/// Something the event loop can wait on.
pub trait Selectable: Send {
    /// File number used as the registry key.
    fn fileno(&self) -> FileNo;

    /// Probe for pending input without blocking.
    fn poll_ready(&mut self) -> bool;

    /// Service pending input.
    fn on_ready(&mut self) -> Result<Announced, Finished>;

    /// Called once per iteration whether or not the selectable was ready.
    fn on_timeout(&mut self) {}

    /// Release resources after removal from the loop.
    fn close(&mut self) {}
}

#[cfg(unix)]
pub(crate) fn fileno_of<S: std::os::fd::AsRawFd>(socket: &S) -> FileNo {
    FileNo::from(socket.as_raw_fd())
}

#[cfg(windows)]
pub(crate) fn fileno_of<S: std::os::windows::io::AsRawSocket>(socket: &S) -> FileNo {
    socket.as_raw_socket() as FileNo
}

/// Registry of selectables keyed by file number.
#[derive(Default)]
pub struct EventLoop {
    registry: BTreeMap<FileNo, Box<dyn Selectable>>,
}

impl EventLoop {
    /// Create an empty loop.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a selectable.
    ///
    /// A selectable already registered under the same file number is evicted
    /// and closed.
    pub fn register(&mut self, selectable: Box<dyn Selectable>) {
        let fileno = selectable.fileno();
        if let Some(mut evicted) = self.registry.insert(fileno, selectable) {
            debug!(fileno, "evicting selectable whose file number was reused");
            evicted.close();
        }
    }

    /// Remove and close the selectable registered under `fileno`.
    pub fn unregister(&mut self, fileno: FileNo) -> bool {
        match self.registry.remove(&fileno) {
            Some(mut selectable) => {
                selectable.close();
                true
            }
            None => false,
        }
    }

    /// Whether `fileno` is registered.
    pub fn contains(&self, fileno: FileNo) -> bool {
        self.registry.contains_key(&fileno)
    }

    /// Number of registered selectables.
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// One iteration; sleeps up to `idle` when no selectable was ready.
    ///
    /// Returns how many selectables were serviced.
    pub fn run_once(&mut self, idle: Duration) -> usize {
        let ready: Vec<FileNo> = self
            .registry
            .iter_mut()
            .filter_map(|(fileno, selectable)| selectable.poll_ready().then_some(*fileno))
            .collect();
        if ready.is_empty() && !idle.is_zero() {
            std::thread::sleep(idle);
        }
        for fileno in &ready {
            let Some(selectable) = self.registry.get_mut(fileno) else {
                continue;
            };
            match selectable.on_ready() {
                Ok(announced) => {
                    for fresh in announced {
                        trace!(fileno = fresh.fileno(), "registering announced selectable");
                        self.register(fresh);
                    }
                }
                Err(Finished) => {
                    debug!(fileno, "selectable finished");
                    self.unregister(*fileno);
                }
            }
        }
        for selectable in self.registry.values_mut() {
            selectable.on_timeout();
        }
        ready.len()
    }

    /// Iterate until `until`, or until nothing is registered when `None`.
    pub fn run(&mut self, until: Option<Instant>) {
        loop {
            let idle = match until {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return;
                    }
                    TICK.min(deadline - now)
                }
                None if self.registry.is_empty() => return,
                None => TICK,
            };
            self.run_once(idle);
        }
    }

    /// Close everything.
    pub fn close_all(&mut self) {
        for (_, mut selectable) in std::mem::take(&mut self.registry) {
            selectable.close();
        }
    }
}
