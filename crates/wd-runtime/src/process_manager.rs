//! Process-lifecycle actions the watchdog invokes on recovery.
//!
//! The watchdog core never inspects process exit status or retries a
//! failed signal delivery itself - per the protocol's contract, recovery
//! actions are fire-and-forget from the watchdog's point of view. Failures
//! are the process manager implementation's own responsibility to log.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

/// Recovery actions the watchdog takes against monitored processes.
///
/// Both methods are infallible by contract: implementations log failures
/// internally and never propagate them back into the watchdog core.
pub trait ProcessManager: Send + Sync {
    /// Reset (restart) a single process.
    fn reset(&self, pid: u32);

    /// Terminate every process this manager currently tracks.
    fn kill_all(&self);

    /// Begin tracking a pid, so a later `kill_all` reaches it.
    fn track(&self, pid: u32);

    /// Stop tracking a pid (its unit was removed without failing).
    fn untrack(&self, pid: u32);
}

/// Grace period between `SIGTERM` and the `SIGKILL` follow-up.
const TERMINATION_GRACE: Duration = Duration::from_millis(200);

/// OS-backed [`ProcessManager`] using `SIGTERM`/`SIGKILL` delivery.
#[derive(Debug, Default)]
pub struct OsProcessManager {
    tracked: Mutex<HashSet<u32>>,
}

impl OsProcessManager {
    /// Construct an empty process manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn terminate_one(pid: u32) {
        let target = Pid::from_raw(pid as i32);
        if let Err(e) = signal::kill(target, Signal::SIGTERM) {
            tracing::warn!(pid, error = %e, "SIGTERM delivery failed");
            return;
        }
        std::thread::sleep(TERMINATION_GRACE);
        if signal::kill(target, None).is_ok() {
            if let Err(e) = signal::kill(target, Signal::SIGKILL) {
                tracing::warn!(pid, error = %e, "SIGKILL delivery failed");
            }
        }
    }
}

impl ProcessManager for OsProcessManager {
    fn reset(&self, pid: u32) {
        tracing::info!(pid, "resetting unit process");
        Self::terminate_one(pid);
        self.untrack(pid);
    }

    fn kill_all(&self) {
        let pids: Vec<u32> = self
            .tracked
            .lock()
            .expect("process manager state poisoned")
            .drain()
            .collect();
        tracing::info!(count = pids.len(), "terminating all tracked processes");
        for pid in pids {
            Self::terminate_one(pid);
        }
    }

    fn track(&self, pid: u32) {
        self.tracked
            .lock()
            .expect("process manager state poisoned")
            .insert(pid);
    }

    fn untrack(&self, pid: u32) {
        self.tracked
            .lock()
            .expect("process manager state poisoned")
            .remove(&pid);
    }
}

/// Test/dev double recording calls without touching real OS processes.
///
/// Exercises the code paths that call into a [`ProcessManager`] without a
/// live process tree to act on.
#[derive(Debug, Default)]
pub struct NullProcessManager {
    reset_calls: Mutex<Vec<u32>>,
    kill_all_calls: Mutex<u32>,
    tracked: Mutex<HashSet<u32>>,
}

impl NullProcessManager {
    /// Construct an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pids passed to `reset`, in call order.
    #[must_use]
    pub fn reset_calls(&self) -> Vec<u32> {
        self.reset_calls.lock().expect("poisoned").clone()
    }

    /// Number of times `kill_all` was invoked.
    #[must_use]
    pub fn kill_all_count(&self) -> u32 {
        *self.kill_all_calls.lock().expect("poisoned")
    }
}

impl ProcessManager for NullProcessManager {
    fn reset(&self, pid: u32) {
        self.reset_calls.lock().expect("poisoned").push(pid);
        self.untrack(pid);
    }

    fn kill_all(&self) {
        *self.kill_all_calls.lock().expect("poisoned") += 1;
        self.tracked.lock().expect("poisoned").clear();
    }

    fn track(&self, pid: u32) {
        self.tracked.lock().expect("poisoned").insert(pid);
    }

    fn untrack(&self, pid: u32) {
        self.tracked.lock().expect("poisoned").remove(&pid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_manager_records_reset_calls() {
        let pm = NullProcessManager::new();
        pm.track(10);
        pm.reset(10);
        assert_eq!(pm.reset_calls(), vec![10]);
    }

    #[test]
    fn null_manager_counts_kill_all() {
        let pm = NullProcessManager::new();
        pm.track(1);
        pm.track(2);
        pm.kill_all();
        assert_eq!(pm.kill_all_count(), 1);
    }
}
