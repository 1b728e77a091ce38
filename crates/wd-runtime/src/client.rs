//! The per-worker watchdog client library.

use std::sync::Arc;
use std::time::Duration;

use wd_common::{
    fatal, ActionOnFailure, ClientState, ClientStateTracker, MessageClass, SlotSettings,
    WatchdogMessage,
};
use wd_mailbox::{Mailbox, MailboxRegistry, ReceiveOptions, Received, RegistryMailbox};

/// How long `register` waits for a `RegisterReply` before treating the
/// registration as failed.
const REGISTER_REPLY_TIMEOUT: Duration = Duration::from_millis(10);

/// The client library a worker process links in.
///
/// Owns a mailbox endpoint named exactly the unit's name, and tracks the
/// unit's own view of its lifecycle state. Every public method that sends a
/// protocol message and expects a specific reply treats deviation (wrong
/// class, wrong source, timeout) as fatal per [`wd_common::fatal`] - the
/// protocol defines no recovery for those, only for liveness misses
/// detected server-side.
pub struct WatchdogClient {
    mailbox: RegistryMailbox,
    server_endpoint: String,
    name: String,
    pid: u32,
    state: ClientStateTracker,
}

impl WatchdogClient {
    /// Open a client for unit `unit_name`. The server reference is left
    /// unset until [`WatchdogClient::register`] records it.
    ///
    /// Aborts via [`fatal`] if `unit_name` is empty.
    ///
    /// # Errors
    ///
    /// Returns [`wd_common::WdError::Transport`] if `unit_name` is already
    /// registered as a mailbox endpoint.
    pub fn new(
        registry: Arc<MailboxRegistry>,
        unit_name: impl Into<String>,
    ) -> wd_common::WdResult<Self> {
        let unit_name = unit_name.into();
        if unit_name.is_empty() {
            fatal("cannot create a watchdog client with an empty unit name");
        }

        let mailbox = RegistryMailbox::open(registry, unit_name.clone())?;
        Ok(Self {
            mailbox,
            server_endpoint: String::new(),
            name: unit_name,
            pid: std::process::id(),
            state: ClientStateTracker::new(),
        })
    }

    /// This unit's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ClientState {
        self.state.state()
    }

    /// Register this unit with the server named `server_name` (its
    /// endpoint is `"<server_name>.server"`) and wait for acknowledgement.
    ///
    /// Records the server reference only once the reply has been validated.
    ///
    /// Aborts via [`fatal`] on invalid settings, a send failure, a timed-out
    /// reply, or a reply of the wrong class/source.
    pub fn register(
        &mut self,
        server_name: impl Into<String>,
        settings: SlotSettings,
        on_failure: ActionOnFailure,
    ) {
        if settings.is_invalid() {
            fatal(format!(
                "cannot register unit '{}' with invalid settings",
                self.name
            ));
        }

        let server_endpoint = format!("{}.server", server_name.into());
        let request = WatchdogMessage::new(
            MessageClass::RegisterRequest,
            &self.name,
            &self.name,
            settings,
            self.pid,
            on_failure,
        );
        if let Err(e) = self.mailbox.send(&server_endpoint, request) {
            fatal(format!("failed to send registration request: {e}"));
        }

        match self.mailbox.receive(ReceiveOptions::Timed(REGISTER_REPLY_TIMEOUT)) {
            Received::Message(reply) => {
                if reply.message_class != MessageClass::RegisterReply {
                    fatal(format!(
                        "expected REGISTER_REPLY, got {}",
                        reply.message_class.name()
                    ));
                }
                if reply.source != server_endpoint {
                    fatal(format!(
                        "registration reply came from unexpected source '{}'",
                        reply.source
                    ));
                }
            }
            Received::TimedOut | Received::Empty => {
                fatal("timed out waiting for registration reply");
            }
        }

        self.server_endpoint = server_endpoint;
        if !self.state.transition(ClientState::Stopped) {
            fatal("invalid client state transition: register outside Unregistered");
        }
    }

    /// Arm the unit's server-side timer.
    pub fn start(&mut self) {
        self.send_signal(MessageClass::Start);
        if !self.state.transition(ClientState::Running) {
            fatal("invalid client state transition: start outside Stopped");
        }
    }

    /// Disarm the unit's server-side timer.
    pub fn stop(&mut self) {
        self.send_signal(MessageClass::Stop);
        if !self.state.transition(ClientState::Stopped) {
            fatal("invalid client state transition: stop outside Running");
        }
    }

    /// Send a liveness heartbeat, then check for a pending fleet-wide
    /// termination broadcast.
    ///
    /// This is the worker's liveness gate: `true` means "keep running",
    /// `false` means "shut down cooperatively".
    pub fn kick(&mut self) -> bool {
        self.mailbox.send_connectionless(
            &self.server_endpoint,
            WatchdogMessage::signal(
                MessageClass::Kick,
                &self.name,
                &self.name,
                SlotSettings::default(),
                0,
                ActionOnFailure::default(),
            ),
        );

        match self.mailbox.receive(ReceiveOptions::NonBlocking) {
            Received::Empty => true,
            Received::Message(msg) if msg.message_class == MessageClass::TerminateBroadcast => {
                self.state.force(ClientState::Terminating);
                false
            }
            Received::Message(msg) => {
                tracing::warn!(
                    unit = %self.name,
                    class = msg.message_class.name(),
                    "unexpected message during kick, ignored"
                );
                true
            }
            Received::TimedOut => {
                tracing::warn!(unit = %self.name, "unexpected timeout result during non-blocking kick receive");
                false
            }
        }
    }

    /// Replace this unit's settings.
    ///
    /// Aborts via [`fatal`] if `settings` is invalid.
    pub fn update_settings(&self, settings: SlotSettings) {
        if settings.is_invalid() {
            fatal(format!(
                "cannot update unit '{}' with invalid settings",
                self.name
            ));
        }
        self.mailbox.send_connectionless(
            &self.server_endpoint,
            WatchdogMessage::new(
                MessageClass::UpdateSettings,
                &self.name,
                &self.name,
                settings,
                self.pid,
                ActionOnFailure::default(),
            ),
        );
    }

    /// Join the server's fleet bring-up synchronization barrier: send a
    /// `SyncRequest` and block until `SyncBroadcast` arrives.
    ///
    /// Aborts via [`fatal`] if called outside `Running`.
    pub fn sync(&mut self) {
        if !self.state.transition(ClientState::Sync) {
            fatal("invalid client state transition: sync outside Running");
        }

        self.mailbox.send_connectionless(
            &self.server_endpoint,
            WatchdogMessage::signal(
                MessageClass::SyncRequest,
                &self.name,
                &self.name,
                SlotSettings::default(),
                0,
                ActionOnFailure::default(),
            ),
        );

        loop {
            if let Received::Message(msg) = self.mailbox.receive(ReceiveOptions::Connectionless) {
                if msg.message_class == MessageClass::SyncBroadcast {
                    break;
                }
            }
        }

        if !self.state.transition(ClientState::Running) {
            fatal("invalid client state transition: resuming from Sync");
        }
    }

    /// Block until the server's `TerminateBroadcast` arrives, then
    /// transition to `Terminating` and return.
    ///
    /// Call this from a worker's own shutdown-watching thread or main loop.
    /// Does not itself exit the process - that decision belongs to the
    /// worker, consistent with the process manager owning recovery actions
    /// rather than the client making them unilaterally.
    pub fn wait_for_termination(&mut self) {
        loop {
            if let Received::Message(msg) = self.mailbox.receive(ReceiveOptions::Normal) {
                if msg.message_class == MessageClass::TerminateBroadcast {
                    break;
                }
            }
        }
        if !self.state.transition(ClientState::Terminating) {
            fatal("invalid client state transition: terminate outside Running/Stopped/Sync");
        }
    }

    /// Request the server terminate this unit.
    pub fn terminate(&mut self) {
        self.send_signal(MessageClass::TerminateRequest);
        if !self.state.transition(ClientState::Terminating) {
            fatal("invalid client state transition: terminate outside Running/Stopped/Sync");
        }
    }

    /// Explicitly unregister from the server.
    ///
    /// Aborts via [`fatal`] if called outside `Stopped` - the protocol only
    /// defines an unregister path from a disarmed unit. A unit being torn
    /// down mid-run is handled by `Drop`, not this method.
    pub fn unregister(&mut self) {
        if !self.state.transition(ClientState::Unregistered) {
            fatal("invalid client state transition: unregister outside Stopped");
        }
        self.send_unregister_request();
    }

    fn send_signal(&self, class: MessageClass) {
        let message = WatchdogMessage::signal(
            class,
            &self.name,
            &self.name,
            SlotSettings::default(),
            self.pid,
            ActionOnFailure::default(),
        );
        if let Err(e) = self.mailbox.send(&self.server_endpoint, message) {
            fatal(format!("failed to send {}: {e}", class.name()));
        }
    }

    fn send_unregister_request(&self) {
        self.mailbox.send_connectionless(
            &self.server_endpoint,
            WatchdogMessage::signal(
                MessageClass::UnregisterRequest,
                &self.name,
                &self.name,
                SlotSettings::default(),
                0,
                ActionOnFailure::default(),
            ),
        );
    }
}

impl Drop for WatchdogClient {
    fn drop(&mut self) {
        if self.state.state() != ClientState::Unregistered {
            self.send_unregister_request();
            self.state.force(ClientState::Unregistered);
        }
    }
}
