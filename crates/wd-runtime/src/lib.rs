#![doc = "Fleet watchdog server and client runtime."]

pub mod client;
pub mod process_manager;
pub mod server;
pub mod timer;
pub mod unit;

pub use client::WatchdogClient;
pub use process_manager::{NullProcessManager, OsProcessManager, ProcessManager};
pub use server::WatchdogServer;
pub use timer::{ignore_alarm_signals, TimerStatus, UnitTimer};
pub use unit::WatchdogUnit;
