//! Fleet watchdog server entry point.
//!
//! Loads configuration, wires up the in-process mailbox registry and an
//! OS-backed process manager, and runs the [`wd_runtime::WatchdogServer`]
//! request/scan loop until a shutdown signal or fleet-wide termination
//! is observed.

mod diagnostics;
mod signals;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use wd_common::ServerConfig;
use wd_mailbox::MailboxRegistry;
use wd_runtime::{OsProcessManager, ProcessManager, WatchdogServer};

use crate::diagnostics::{format_prometheus_metrics, snapshot};
use crate::signals::SignalHandler;

/// Fleet watchdog server command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "wd-daemon",
    about = "Fleet watchdog server - process supervision and recovery",
    version,
    long_about = None
)]
struct Args {
    /// Path to a server configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the server's mailbox endpoint name.
    #[arg(long, short = 'n')]
    name: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,

    /// Print a diagnostics snapshot to stdout every `status-interval`
    /// seconds in addition to normal logging.
    #[arg(long, default_value = "30")]
    status_interval_secs: u64,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "starting fleet watchdog server");

    let mut config = load_config(&args)?;
    if let Some(name) = &args.name {
        config.name.clone_from(name);
    }
    info!(name = %config.name, scan_period = ?config.scan_period, "configuration loaded");

    let signal_handler = SignalHandler::new().context("failed to install signal handlers")?;

    let registry = MailboxRegistry::new();
    let process_manager: Arc<dyn ProcessManager> = Arc::new(OsProcessManager::new());

    let mut server = WatchdogServer::new(
        config.name.clone(),
        Arc::clone(&registry),
        process_manager,
        config.scan_period,
    )
    .context("failed to construct watchdog server")?;

    server.start().context("failed to start watchdog server threads")?;
    info!(name = %server.name(), "watchdog server running");

    run_until_shutdown(&server, &signal_handler, args.status_interval_secs);

    server.shutdown();
    server.join();
    info!("watchdog server stopped");

    Ok(())
}

/// Poll the signal handler and the server's own termination flag,
/// periodically logging a diagnostics snapshot, until either requests
/// shutdown.
fn run_until_shutdown(server: &WatchdogServer, signal_handler: &SignalHandler, status_interval_secs: u64) {
    let start_time = Instant::now();
    let status_interval = Duration::from_secs(status_interval_secs.max(1));
    let mut last_status = Instant::now();

    loop {
        if signal_handler.shutdown_requested() {
            info!("shutdown signal received, stopping watchdog server");
            break;
        }
        if server.is_terminating() {
            info!("fleet termination triggered internally, stopping watchdog server");
            break;
        }

        if last_status.elapsed() >= status_interval {
            let snap = snapshot(server, start_time);
            info!(
                health = %snap.health,
                units = snap.unit_count,
                scan_passes = snap.scan_pass_count,
                overruns = snap.scan_overrun_count,
                "periodic status"
            );
            last_status = Instant::now();
        }

        std::thread::sleep(Duration::from_millis(100));
    }

    let snap = snapshot(server, start_time);
    tracing::debug!(metrics = %format_prometheus_metrics(&snap), "final metrics snapshot");
}

fn init_logging(level: &str) {
    let filter = format!("wd_daemon={level},wd_runtime={level},wd_mailbox={level},wd_common={level}");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

fn load_config(args: &Args) -> Result<ServerConfig> {
    if let Some(path) = &args.config {
        ServerConfig::from_file(path).with_context(|| format!("failed to load config from {path:?}"))
    } else {
        let default_path = PathBuf::from("config/wd-daemon.toml");
        if default_path.exists() {
            info!(?default_path, "using default configuration file");
            ServerConfig::from_file(&default_path)
                .with_context(|| format!("failed to load default config from {default_path:?}"))
        } else {
            info!("no config file found, using built-in defaults");
            Ok(ServerConfig::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_parse_with_defaults() {
        let args = Args::parse_from(["wd-daemon"]);
        assert!(args.config.is_none());
        assert_eq!(args.log_level, "info");
        assert_eq!(args.status_interval_secs, 30);
    }

    #[test]
    fn args_parse_with_overrides() {
        let args = Args::parse_from(["wd-daemon", "-c", "wd.toml", "-n", "line1", "-l", "debug"]);
        assert_eq!(args.config, Some(PathBuf::from("wd.toml")));
        assert_eq!(args.name, Some("line1".to_string()));
        assert_eq!(args.log_level, "debug");
    }

    #[test]
    fn default_config_has_no_synchronization_barrier() {
        let config = ServerConfig::default();
        assert!(config.synchronization.is_none());
    }
}
