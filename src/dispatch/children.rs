//! Tracking of spawned child processes and process-wide shutdown requests.
//!
//! Codec processes are registered for as long as something waits on them so a
//! shutdown can terminate every one still running instead of orphaning it.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::{debug, warn};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// Flag raised by SIGINT/SIGTERM once `install_signal_handlers` has run.
pub fn shutdown_flag() -> &'static AtomicBool {
    &SHUTDOWN
}

#[cfg(unix)]
extern "C" fn on_terminate(_signal: libc::c_int) {
    // Only async-signal-safe work here
    SHUTDOWN.store(true, Ordering::SeqCst);
}

/// Routes SIGINT and SIGTERM to the shutdown flag.
#[cfg(unix)]
pub fn install_signal_handlers() {
    use nix::sys::signal::{signal, SigHandler, Signal};

    for sig in [Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: the handler only performs an atomic store.
        if let Err(e) = unsafe { signal(sig, SigHandler::Handler(on_terminate)) } {
            warn!(signal = %sig, error = %e, "failed to install shutdown handler");
        }
    }
}

#[cfg(not(unix))]
pub fn install_signal_handlers() {}

/// How a registered process should be terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChildHandle {
    /// A single process.
    Process(u32),
    /// A process group led by this pid (fan-out helper and its workers).
    Group(u32),
}

/// Set of child processes currently being waited on.
#[derive(Debug, Default)]
pub struct ChildRegistry {
    children: Mutex<HashSet<ChildHandle>>,
}

impl ChildRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handle: ChildHandle) {
        self.lock().insert(handle);
    }

    pub fn release(&self, handle: ChildHandle) {
        self.lock().remove(&handle);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sends SIGTERM to every registered child. Returns how many were signalled.
    pub fn terminate_all(&self) -> usize {
        let children = self.lock();
        for handle in children.iter() {
            debug!(?handle, "terminating child");
            terminate(*handle);
        }
        children.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<ChildHandle>> {
        // A poisoned set is still a valid set of pids
        self.children.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(unix)]
fn terminate(handle: ChildHandle) {
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::Pid;

    let sent = match handle {
        ChildHandle::Process(pid) => kill(Pid::from_raw(pid as i32), Signal::SIGTERM),
        ChildHandle::Group(pgid) => killpg(Pid::from_raw(pgid as i32), Signal::SIGTERM),
    };
    if let Err(e) = sent {
        debug!(?handle, error = %e, "kill failed");
    }
}

#[cfg(not(unix))]
fn terminate(_handle: ChildHandle) {}
