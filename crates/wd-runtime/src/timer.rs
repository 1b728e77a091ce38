//! The per-unit deadline timer.
//!
//! Poll-based and `Instant`-driven: no OS alarm signals, no dedicated
//! thread per timer. The server's scan thread polls every unit's timer once
//! per scan period instead.

use std::time::{Duration, Instant};

/// Current status of a [`UnitTimer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerStatus {
    /// Never started, or stopped.
    Idle,
    /// Armed and within its deadline.
    Running,
    /// Armed and the deadline has passed.
    Expired,
}

/// A single unit's deadline timer.
///
/// Tracks elapsed time since the last (re)start against a configured
/// timeout. `expired()` is the only time-sensitive read; everything else is
/// plain state bookkeeping.
#[derive(Debug)]
pub struct UnitTimer {
    timeout: Duration,
    started_at: Option<Instant>,
}

impl UnitTimer {
    /// Create a timer with deadline `timeout_ms`, initially idle.
    #[must_use]
    pub fn new(timeout_ms: u32) -> Self {
        Self {
            timeout: Duration::from_millis(u64::from(timeout_ms)),
            started_at: None,
        }
    }

    /// Arm the timer, starting the deadline countdown from now.
    pub fn start(&mut self) {
        self.started_at = Some(Instant::now());
    }

    /// Disarm the timer.
    pub fn stop(&mut self) {
        self.started_at = None;
    }

    /// Restart the deadline countdown from now without changing armed state.
    ///
    /// A no-op if the timer is currently idle - kicking a stopped timer
    /// does not implicitly start it.
    pub fn restart(&mut self) {
        if self.started_at.is_some() {
            self.started_at = Some(Instant::now());
        }
    }

    /// Replace the configured deadline. Does not affect armed state or the
    /// current countdown's start point.
    pub fn set_timeout_ms(&mut self, timeout_ms: u32) {
        self.timeout = Duration::from_millis(u64::from(timeout_ms));
    }

    /// Disarm the timer and clear any deadline-specific transient state.
    pub fn clear_timeout_settings(&mut self) {
        self.started_at = None;
    }

    /// Whether the timer is armed and its deadline has passed.
    #[must_use]
    pub fn expired(&self) -> bool {
        matches!(self.status(), TimerStatus::Expired)
    }

    /// Current timer status.
    #[must_use]
    pub fn status(&self) -> TimerStatus {
        match self.started_at {
            None => TimerStatus::Idle,
            Some(start) if start.elapsed() >= self.timeout => TimerStatus::Expired,
            Some(_) => TimerStatus::Running,
        }
    }
}

/// Block `SIGALRM` process-wide.
///
/// The original transport relies on interval timers delivering `SIGALRM` for
/// its own receive-timeout bookkeeping; since this transport's timed
/// receive is condvar-based rather than signal-based, any `SIGALRM` a
/// linked library still raises would otherwise terminate the process by
/// default. Called once, from [`crate::server::WatchdogServer::new`]. This
/// is a process-wide side effect: every thread in the process inherits the
/// blocked mask, not just the calling thread's.
///
/// # Errors
///
/// Returns an error if the underlying `sigprocmask` call fails.
pub fn ignore_alarm_signals() -> Result<(), nix::Error> {
    let mut mask = nix::sys::signal::SigSet::empty();
    mask.add(nix::sys::signal::Signal::SIGALRM);
    nix::sys::signal::sigprocmask(nix::sys::signal::SigmaskHow::SIG_BLOCK, Some(&mask), None)
}
