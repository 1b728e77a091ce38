//! The [`Mailbox`] transport trait and its in-process implementation.

use std::sync::Arc;
use std::time::Duration;

use wd_common::{WatchdogMessage, WdError, WdResult};

use crate::registry::MailboxRegistry;

/// How a [`Mailbox::receive`] call should wait for an incoming message.
#[derive(Debug, Clone, Copy)]
pub enum ReceiveOptions {
    /// Block indefinitely until a message arrives.
    Normal,
    /// Block until a message arrives or `Duration` elapses.
    Timed(Duration),
    /// Return immediately, `Empty` if nothing is queued.
    NonBlocking,
    /// Block indefinitely, used only by the synchronization barrier. The
    /// transport treats this identically to `Normal`; the variant is kept
    /// distinct because callers reason about it as a separate receive mode.
    Connectionless,
}

/// The outcome of a [`Mailbox::receive`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum Received {
    /// A message arrived.
    Message(WatchdogMessage),
    /// `Timed` wait expired with nothing queued.
    TimedOut,
    /// `NonBlocking` poll found nothing queued.
    Empty,
}

/// A named-endpoint transport carrying [`WatchdogMessage`] envelopes.
///
/// `send` is connection-oriented: it fails if `dest` has no endpoint
/// currently registered. `send_connectionless` is fire-and-forget: an
/// absent destination is logged and dropped, never returned as an error.
pub trait Mailbox: Send + Sync {
    /// The endpoint name this mailbox was opened under.
    fn name(&self) -> &str;

    /// Send `message` to `dest`.
    ///
    /// # Errors
    ///
    /// Returns [`WdError::Transport`] if `dest` is not currently registered.
    fn send(&self, dest: &str, message: WatchdogMessage) -> WdResult<()>;

    /// Send `message` to `dest`, dropping it silently (with a logged
    /// warning) if `dest` is not currently registered.
    fn send_connectionless(&self, dest: &str, message: WatchdogMessage);

    /// Wait for an incoming message per `options`.
    fn receive(&self, options: ReceiveOptions) -> Received;
}

/// In-process [`Mailbox`] backed by a shared [`MailboxRegistry`].
pub struct RegistryMailbox {
    name: String,
    registry: Arc<MailboxRegistry>,
    inbox: Arc<crate::registry::Endpoint>,
}

impl RegistryMailbox {
    /// Open an endpoint named `name` against `registry`.
    ///
    /// # Errors
    ///
    /// Returns [`WdError::Transport`] if `name` is already registered.
    pub fn open(registry: Arc<MailboxRegistry>, name: impl Into<String>) -> WdResult<Self> {
        let name = name.into();
        let inbox = registry
            .register(&name)
            .map_err(WdError::Transport)?;
        Ok(Self {
            name,
            registry,
            inbox,
        })
    }
}

impl Mailbox for RegistryMailbox {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, dest: &str, message: WatchdogMessage) -> WdResult<()> {
        let endpoint = self.registry.lookup(dest).ok_or_else(|| {
            WdError::Transport(format!("destination endpoint '{dest}' is not registered"))
        })?;
        endpoint.push(message);
        Ok(())
    }

    fn send_connectionless(&self, dest: &str, message: WatchdogMessage) {
        match self.registry.lookup(dest) {
            Some(endpoint) => endpoint.push(message),
            None => tracing::warn!(dest, "connectionless send to unregistered endpoint dropped"),
        }
    }

    fn receive(&self, options: ReceiveOptions) -> Received {
        match options {
            ReceiveOptions::Normal | ReceiveOptions::Connectionless => {
                Received::Message(self.inbox.pop_blocking())
            }
            ReceiveOptions::Timed(timeout) => match self.inbox.pop_timed(timeout) {
                Some(message) => Received::Message(message),
                None => Received::TimedOut,
            },
            ReceiveOptions::NonBlocking => match self.inbox.pop_nonblocking() {
                Some(message) => Received::Message(message),
                None => Received::Empty,
            },
        }
    }
}

impl Drop for RegistryMailbox {
    fn drop(&mut self) {
        self.registry.unregister(&self.name);
    }
}
