//! Client-side lifecycle state machine.
//!
//! Mirrors the shape of a runtime state machine: an enum with
//! `can_transition_to`, wrapped in a tracker that records the previous
//! state. Unlike a scan-loop state machine, an invalid transition here
//! signals a bug in the calling worker, not a recoverable runtime
//! condition - callers should treat a rejected transition as their cue to
//! call [`wd_common::error::fatal`](crate::error::fatal), not retry.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle states a [`WatchdogClient`](crate) progresses through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientState {
    /// No registration has been attempted yet.
    #[default]
    Unregistered,
    /// Registered, timer disarmed.
    Stopped,
    /// Registered, timer armed, kicking normally.
    Running,
    /// Blocked awaiting a synchronization broadcast.
    Sync,
    /// Cooperative shutdown in progress.
    Terminating,
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unregistered => write!(f, "UNREGISTERED"),
            Self::Stopped => write!(f, "STOPPED"),
            Self::Running => write!(f, "RUNNING"),
            Self::Sync => write!(f, "SYNC"),
            Self::Terminating => write!(f, "TERMINATING"),
        }
    }
}

impl ClientState {
    /// Whether a transition from this state to `target` is permitted.
    #[must_use]
    pub fn can_transition_to(&self, target: ClientState) -> bool {
        use ClientState::{Running, Stopped, Sync, Terminating, Unregistered};

        matches!(
            (self, target),
            (Unregistered, Stopped)
                | (Stopped, Running)
                | (Running, Sync)
                | (Sync, Running)
                | (Running, Stopped)
                | (Stopped, Unregistered)
                | (Running, Terminating)
                | (Stopped, Terminating)
                | (Sync, Terminating)
        )
    }
}

/// Tracks the current and previous client lifecycle state.
#[derive(Debug, Clone, Default)]
pub struct ClientStateTracker {
    current: ClientState,
    previous: Option<ClientState>,
}

impl ClientStateTracker {
    /// Start in `Unregistered`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ClientState {
        self.current
    }

    /// Attempt a transition, returning whether it was applied.
    #[must_use]
    pub fn transition(&mut self, target: ClientState) -> bool {
        if self.current.can_transition_to(target) {
            self.previous = Some(self.current);
            self.current = target;
            true
        } else {
            false
        }
    }

    /// Force the tracker into `target` without consulting
    /// `can_transition_to`.
    ///
    /// Teardown paths (a `Drop` impl unregistering a client that was never
    /// cleanly stopped) need to reach `Unregistered` from states the
    /// protocol's own transition table has no edge into - `Drop::drop`
    /// cannot return an error, so there is nowhere to route a rejected
    /// transition. Prefer [`ClientStateTracker::transition`] everywhere
    /// else.
    pub fn force(&mut self, target: ClientState) {
        self.previous = Some(self.current);
        self.current = target;
    }
}
