//! End-to-end acceptance tests for the fleet watchdog protocol.
//!
//! These drive a real [`wd_runtime::WatchdogServer`] against real
//! [`wd_runtime::WatchdogClient`]s over the in-process mailbox transport,
//! exercising the numbered scenarios from the watchdog protocol design:
//! happy-path kicking, deadline-miss recovery, fleet-wide kill-all
//! fan-out, duplicate registration, reply timeouts, and termination
//! broadcasts. Timing-sensitive scenarios use generous margins since CI
//! schedulers are not real-time.

mod scenarios;
