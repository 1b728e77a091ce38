use crate::settings::{ActionOnFailure, SlotSettings};
use serde::{Deserialize, Serialize};

/// Wire-level message class.
///
/// `Any` and `None` are sentinels: `Any` is only ever used as a filter
/// argument to a receive call, never sent; `None` marks "no message was
/// actually received" placeholders returned internally when a receive call
/// times out or finds an empty queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageClass {
    /// Client -> server: register a new unit.
    RegisterRequest,
    /// Server -> client: registration acknowledged.
    RegisterReply,
    /// Client -> server: remove a unit.
    UnregisterRequest,
    /// Client -> server: arm the unit's timer.
    Start,
    /// Client -> server: disarm the unit's timer.
    Stop,
    /// Client -> server: liveness heartbeat.
    Kick,
    /// Client -> server: replace a unit's settings.
    UpdateSettings,
    /// Client -> server: join the synchronization barrier.
    SyncRequest,
    /// Server -> client: synchronization barrier released.
    SyncBroadcast,
    /// Client -> server: request cooperative fleet shutdown.
    TerminateRequest,
    /// Server -> client: the fleet is terminating.
    TerminateBroadcast,
    /// Sentinel: matches any class in a receive filter. Never sent.
    Any,
    /// Sentinel: no message. Never sent; used as an internal placeholder.
    None,
}

impl MessageClass {
    /// Human-readable name, used in log lines the way the original's
    /// `getMessageClassName` was.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::RegisterRequest => "REGISTER_REQUEST",
            Self::RegisterReply => "REGISTER_REPLY",
            Self::UnregisterRequest => "UNREGISTER_REQUEST",
            Self::Start => "START",
            Self::Stop => "STOP",
            Self::Kick => "KICK",
            Self::UpdateSettings => "UPDATE_SETTINGS",
            Self::SyncRequest => "SYNC_REQUEST",
            Self::SyncBroadcast => "SYNC_BROADCAST",
            Self::TerminateRequest => "TERMINATE_REQUEST",
            Self::TerminateBroadcast => "TERMINATE_BROADCAST",
            Self::Any => "ANY",
            Self::None => "NONE",
        }
    }
}

/// A single watchdog protocol message.
///
/// Fields not meaningful for a given `message_class` are left at their
/// type's default (empty string, zeroed `SlotSettings`, pid 0,
/// `ActionOnFailure::ResetOnly`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchdogMessage {
    /// The kind of message this is.
    pub message_class: MessageClass,
    /// Mailbox endpoint name of the sender.
    pub source: String,
    /// Unit name the message concerns.
    pub name: String,
    /// Settings carried by registration/update messages.
    pub settings: SlotSettings,
    /// Process id carried by registration messages.
    pub pid: u32,
    /// Recovery policy carried by registration messages.
    pub on_failure: ActionOnFailure,
}

impl WatchdogMessage {
    /// Build a message with all fields explicit.
    #[must_use]
    pub fn new(
        message_class: MessageClass,
        source: impl Into<String>,
        name: impl Into<String>,
        settings: SlotSettings,
        pid: u32,
        on_failure: ActionOnFailure,
    ) -> Self {
        Self {
            message_class,
            source: source.into(),
            name: name.into(),
            settings,
            pid,
            on_failure,
        }
    }

    /// Build a signal message carrying only `source`/`name` (and whatever
    /// settings/pid/on_failure the caller still wants attached) - the shape
    /// most client-side signals use.
    #[must_use]
    pub fn signal(
        message_class: MessageClass,
        source: impl Into<String>,
        name: impl Into<String>,
        settings: SlotSettings,
        pid: u32,
        on_failure: ActionOnFailure,
    ) -> Self {
        Self::new(message_class, source, name, settings, pid, on_failure)
    }

    /// Build a bare server-originated broadcast/reply with no unit-specific payload.
    #[must_use]
    pub fn server_signal(message_class: MessageClass, source: impl Into<String>) -> Self {
        Self::new(
            message_class,
            source,
            String::new(),
            SlotSettings::default(),
            0,
            ActionOnFailure::default(),
        )
    }

    /// One-line diagnostic summary, used in log lines the way the original's
    /// `getInfo()` was.
    #[must_use]
    pub fn info(&self) -> String {
        format!(
            "class={} source={} name={} base_ttl={} timeout_ms={} pid={} on_failure={:?}",
            self.message_class.name(),
            self.source,
            self.name,
            self.settings.base_ttl,
            self.settings.timeout_ms,
            self.pid,
            self.on_failure
        )
    }
}
