use serde::{Deserialize, Serialize};

/// Per-unit timeout settings.
///
/// A settings value is *invalid* if either field is zero; constructors and
/// mutators that accept a `SlotSettings` are expected to reject invalid
/// values fatally rather than silently clamping them, since a zero TTL or
/// zero deadline has no sensible watchdog interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSettings {
    /// Number of timer expirations a unit is allowed before recovery fires.
    pub base_ttl: u32,
    /// Per-period deadline in milliseconds.
    pub timeout_ms: u32,
}

impl SlotSettings {
    /// Construct new settings, which may be invalid.
    #[must_use]
    pub fn new(base_ttl: u32, timeout_ms: u32) -> Self {
        Self {
            base_ttl,
            timeout_ms,
        }
    }

    /// True if `timeout_ms` is zero.
    #[must_use]
    pub fn timeout_is_zero(&self) -> bool {
        self.timeout_ms == 0
    }

    /// True if both fields are zero (the wire "no settings" sentinel).
    #[must_use]
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    /// True if either field is zero - the settings cannot be used to arm a timer.
    #[must_use]
    pub fn is_invalid(&self) -> bool {
        self.base_ttl == 0 || self.timeout_ms == 0
    }
}

impl Default for SlotSettings {
    fn default() -> Self {
        Self {
            base_ttl: 0,
            timeout_ms: 0,
        }
    }
}

/// Recovery action a unit requests be taken on TTL exhaustion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActionOnFailure {
    /// Recover just this unit: reset its process and drop its record.
    #[default]
    ResetOnly,
    /// Terminate the entire fleet.
    KillAll,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_settings_are_invalid() {
        assert!(SlotSettings::default().is_invalid());
        assert!(SlotSettings::new(0, 50).is_invalid());
        assert!(SlotSettings::new(3, 0).is_invalid());
        assert!(!SlotSettings::new(3, 50).is_invalid());
    }

    #[test]
    fn is_zero_matches_default_only() {
        assert!(SlotSettings::default().is_zero());
        assert!(!SlotSettings::new(1, 0).is_zero());
    }

    #[test]
    fn action_on_failure_defaults_to_reset_only() {
        assert_eq!(ActionOnFailure::default(), ActionOnFailure::ResetOnly);
    }
}
