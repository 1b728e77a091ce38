use thiserror::Error;

/// Errors that can be propagated through a `Result` without aborting the process.
///
/// Fatal conditions (see [`fatal`]) never construct this type - by the time a
/// watchdog operation hits a fatal condition there is no caller left that can
/// meaningfully recover, so those paths log and exit directly instead.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum WdError {
    /// Configuration could not be loaded or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// The transport (mailbox) could not complete the requested operation.
    #[error("transport error: {0}")]
    Transport(String),

    /// A received message failed wire-level validation.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Convenience alias for watchdog operations.
pub type WdResult<T> = Result<T, WdError>;

/// Log a fatal condition and abort the process.
///
/// This is the Rust expression of the spec's "Fatal" severity: aborts the
/// process rather than unwinding, so it cannot be intercepted by
/// `catch_unwind` further up the stack. A watchdog that has hit one of
/// these conditions (duplicate registration, malformed reply, empty
/// required name, ...) is in a state the protocol does not define recovery
/// for; continuing would risk silently corrupting the unit set it
/// supervises, which is worse than a loud, immediate exit.
#[track_caller]
pub fn fatal(message: impl AsRef<str>) -> ! {
    tracing::error!(location = %std::panic::Location::caller(), "{}", message.as_ref());
    std::process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_are_informative() {
        let err = WdError::Config("missing field".into());
        assert_eq!(err.to_string(), "configuration error: missing field");

        let err = WdError::Transport("endpoint not registered".into());
        assert_eq!(err.to_string(), "transport error: endpoint not registered");
    }
}
