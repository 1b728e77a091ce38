//! Named-endpoint registry backing [`RegistryMailbox`](crate::RegistryMailbox).
//!
//! Stands in for the real transport (POSIX message queues / named pipes):
//! one process-wide (or test-wide) table of endpoints, each a
//! condvar-guarded queue, so the workspace is testable without a real
//! multi-host deployment.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use wd_common::WatchdogMessage;

/// One named endpoint: a bounded-in-practice FIFO queue plus a condvar any
/// receiver can block on.
pub(crate) struct Endpoint {
    queue: Mutex<VecDeque<WatchdogMessage>>,
    not_empty: Condvar,
}

impl Endpoint {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
        }
    }

    fn push(&self, message: WatchdogMessage) {
        let mut queue = self.queue.lock().expect("endpoint queue poisoned");
        queue.push_back(message);
        self.not_empty.notify_one();
    }

    fn pop_blocking(&self) -> WatchdogMessage {
        let mut queue = self.queue.lock().expect("endpoint queue poisoned");
        loop {
            if let Some(message) = queue.pop_front() {
                return message;
            }
            queue = self
                .not_empty
                .wait(queue)
                .expect("endpoint queue poisoned");
        }
    }

    fn pop_timed(&self, timeout: Duration) -> Option<WatchdogMessage> {
        let deadline = Instant::now() + timeout;
        let mut queue = self.queue.lock().expect("endpoint queue poisoned");
        loop {
            if let Some(message) = queue.pop_front() {
                return Some(message);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let (guard, result) = self
                .not_empty
                .wait_timeout(queue, remaining)
                .expect("endpoint queue poisoned");
            queue = guard;
            if result.timed_out() && queue.is_empty() {
                return None;
            }
        }
    }

    fn pop_nonblocking(&self) -> Option<WatchdogMessage> {
        self.queue
            .lock()
            .expect("endpoint queue poisoned")
            .pop_front()
    }
}

/// A shared table of mailbox endpoints.
///
/// One registry must be shared (via the returned `Arc`) between every
/// client and server that needs to exchange messages - it plays the role a
/// real deployment's kernel-managed namespace of named pipes/queues would
/// play. Tests typically construct one registry per test to avoid
/// cross-test interference.
pub struct MailboxRegistry {
    endpoints: Mutex<HashMap<String, Arc<Endpoint>>>,
}

impl MailboxRegistry {
    /// Create a fresh, empty registry.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            endpoints: Mutex::new(HashMap::new()),
        })
    }

    /// Register a new endpoint under `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is already registered.
    pub(crate) fn register(&self, name: &str) -> Result<Arc<Endpoint>, String> {
        let mut endpoints = self.endpoints.lock().expect("registry poisoned");
        if endpoints.contains_key(name) {
            return Err(format!("endpoint '{name}' is already registered"));
        }
        let endpoint = Arc::new(Endpoint::new());
        endpoints.insert(name.to_string(), Arc::clone(&endpoint));
        Ok(endpoint)
    }

    pub(crate) fn unregister(&self, name: &str) {
        self.endpoints
            .lock()
            .expect("registry poisoned")
            .remove(name);
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<Arc<Endpoint>> {
        self.endpoints
            .lock()
            .expect("registry poisoned")
            .get(name)
            .cloned()
    }
}

