//! Signal handling for graceful daemon shutdown.
//!
//! Unix signal handling (`SIGTERM`, `SIGINT`) for clean shutdown of the
//! watchdog server. Uses atomic flags to communicate the shutdown request
//! to the main thread without blocking, trimmed to the one thing this
//! daemon needs: telling [`wd_runtime::WatchdogServer::shutdown`] to stop.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Which signal triggered a shutdown request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// `SIGTERM` - graceful termination request.
    Terminate,
    /// `SIGINT` - interrupt (Ctrl+C).
    Interrupt,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::Terminate => write!(f, "SIGTERM"),
            SignalKind::Interrupt => write!(f, "SIGINT"),
        }
    }
}

/// Shared state for signal handling. All fields use atomics so the
/// async-signal-safe handler only ever stores, never locks.
#[derive(Debug, Default)]
struct SignalState {
    shutdown_requested: AtomicBool,
    signal_count: AtomicU32,
    last_signal: AtomicU32,
}

impl SignalState {
    fn shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::Relaxed)
    }

    fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::Relaxed);
    }

    fn record_signal(&self, kind: SignalKind) {
        self.signal_count.fetch_add(1, Ordering::Relaxed);
        self.last_signal.store(kind as u32, Ordering::Relaxed);
    }
}

/// Handle for signal management.
#[derive(Clone)]
pub struct SignalHandler {
    state: Arc<SignalState>,
}

impl SignalHandler {
    /// Register `SIGTERM`/`SIGINT` handlers and return a handle for polling
    /// them from the main thread.
    pub fn new() -> std::io::Result<Self> {
        let state = Arc::new(SignalState::default());
        let handler = Self {
            state: Arc::clone(&state),
        };

        #[cfg(unix)]
        handler.register_unix_handlers();

        Ok(handler)
    }

    #[cfg(unix)]
    fn register_unix_handlers(&self) {
        use std::os::raw::c_int;

        static SHUTDOWN_FLAG: AtomicBool = AtomicBool::new(false);

        let state = Arc::clone(&self.state);
        std::thread::spawn(move || loop {
            if SHUTDOWN_FLAG.swap(false, Ordering::Relaxed) {
                info!("shutdown signal received");
                state.request_shutdown();
                state.record_signal(SignalKind::Terminate);
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        });

        // SAFETY: these handlers only touch an `AtomicBool`, which is
        // async-signal-safe; no allocation or locking happens in the
        // handler itself.
        unsafe {
            libc::signal(libc::SIGTERM, sigterm_handler as libc::sighandler_t);
            libc::signal(libc::SIGINT, sigint_handler as libc::sighandler_t);
        }

        extern "C" fn sigterm_handler(_: c_int) {
            SHUTDOWN_FLAG.store(true, Ordering::Relaxed);
        }

        extern "C" fn sigint_handler(_: c_int) {
            SHUTDOWN_FLAG.store(true, Ordering::Relaxed);
        }

        debug!("Unix signal handlers registered");
    }

    /// Whether a shutdown signal has been received.
    #[inline]
    pub fn shutdown_requested(&self) -> bool {
        self.state.shutdown_requested()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_state_default() {
        let state = SignalState::default();
        assert!(!state.shutdown_requested());
    }

    #[test]
    fn test_shutdown_request() {
        let state = SignalState::default();
        assert!(!state.shutdown_requested());

        state.request_shutdown();
        assert!(state.shutdown_requested());
    }
}
