//! The server-side record of one monitored unit.

use wd_common::{fatal, ActionOnFailure, SlotSettings};

use crate::timer::UnitTimer;

/// A single monitored worker, as tracked by the server.
///
/// Exclusively owned by [`crate::server::WatchdogServer`]; never shared or
/// cloned. Dropping a unit disarms its timer.
#[derive(Debug)]
pub struct WatchdogUnit {
    name: String,
    pid: u32,
    settings: SlotSettings,
    on_failure: ActionOnFailure,
    timer: UnitTimer,
    ttl: u32,
}

impl WatchdogUnit {
    /// Construct a new unit.
    ///
    /// Aborts the process via [`fatal`] if `name` is empty or `settings` is
    /// invalid - both are registration-time client errors the protocol has
    /// no recovery path for.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        pid: u32,
        settings: SlotSettings,
        on_failure: ActionOnFailure,
    ) -> Self {
        let name = name.into();
        if name.is_empty() {
            fatal("cannot register a unit with an empty name");
        }
        if settings.is_invalid() {
            fatal(format!("cannot register unit '{name}' with invalid settings"));
        }

        let timer = UnitTimer::new(settings.timeout_ms);
        Self {
            name,
            pid,
            settings,
            on_failure,
            timer,
            ttl: settings.base_ttl,
        }
    }

    /// Unit name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Process id the unit was registered with.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Currently configured settings.
    #[must_use]
    pub fn settings(&self) -> SlotSettings {
        self.settings
    }

    /// Configured recovery policy.
    #[must_use]
    pub fn on_failure(&self) -> ActionOnFailure {
        self.on_failure
    }

    /// Remaining TTL credit.
    #[must_use]
    pub fn ttl(&self) -> u32 {
        self.ttl
    }

    /// Arm the unit's timer.
    pub fn start_timer(&mut self) {
        self.timer.start();
    }

    /// Restart the unit's timer countdown (a "kick").
    pub fn restart_timer(&mut self) {
        self.timer.restart();
    }

    /// Reset TTL credit back to the configured `base_ttl`.
    pub fn restart_ttl(&mut self) {
        self.ttl = self.settings.base_ttl;
    }

    /// Disarm the unit's timer.
    pub fn stop_timer(&mut self) {
        self.timer.stop();
    }

    /// Replace this unit's settings, rearming the timer's deadline and
    /// resetting TTL credit to the new `base_ttl`.
    ///
    /// Aborts via [`fatal`] if `settings` is invalid.
    pub fn update_settings(&mut self, settings: SlotSettings) {
        if settings.is_invalid() {
            fatal(format!(
                "cannot update unit '{}' with invalid settings",
                self.name
            ));
        }
        self.settings = settings;
        self.timer.set_timeout_ms(settings.timeout_ms);
        self.ttl = settings.base_ttl;
    }

    /// Whether the unit's timer deadline has passed.
    #[must_use]
    pub fn expired(&self) -> bool {
        self.timer.expired()
    }

    /// Debit one TTL credit for a missed deadline, returning the remaining
    /// credit after the debit.
    #[must_use]
    pub fn decrement_and_return_ttl(&mut self) -> u32 {
        self.ttl = self.ttl.saturating_sub(1);
        self.ttl
    }
}

impl Drop for WatchdogUnit {
    fn drop(&mut self) {
        self.timer.stop();
    }
}
