//! Health check and metrics export for the watchdog daemon.
//!
//! A point-in-time snapshot suitable for a status endpoint or log line,
//! plus a Prometheus text exposition formatter and a JSON encoding for
//! diagnostics tooling.

use std::time::{Duration, Instant};

use serde::Serialize;
use wd_runtime::WatchdogServer;

/// Health status of the watchdog daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Running, scan passes comfortably inside the configured period.
    Healthy,
    /// Running, but more than 1% of scan passes have overrun their period.
    Degraded,
    /// The termination flag has fired; the daemon is shutting down.
    ShuttingDown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::ShuttingDown => write!(f, "shutting_down"),
        }
    }
}

/// A point-in-time snapshot of fleet status.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsSnapshot {
    /// Current health status.
    pub health: HealthStatus,
    /// Number of currently registered units.
    pub unit_count: usize,
    /// Total expiration-scan passes completed.
    pub scan_pass_count: u64,
    /// Number of scan passes that overran the configured scan period.
    pub scan_overrun_count: u64,
    /// Mean scan-pass duration, if any have run.
    #[serde(serialize_with = "seconds::option")]
    pub mean_scan_duration: Option<Duration>,
    /// Maximum observed scan-pass duration, if any have run.
    #[serde(serialize_with = "seconds::option")]
    pub max_scan_duration: Option<Duration>,
    /// Daemon uptime.
    #[serde(serialize_with = "seconds::required")]
    pub uptime: Duration,
}

impl DiagnosticsSnapshot {
    /// Serialize this snapshot as a JSON status document, suitable for a
    /// `/healthz`-style endpoint or a structured log line.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails (it never should for this
    /// struct's shape - kept fallible since `serde_json::to_string` is).
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Serialize `Duration` fields as fractional seconds, matching the unit
/// convention `format_prometheus_metrics` already uses for the same data.
mod seconds {
    use serde::Serializer;
    use std::time::Duration;

    pub(super) fn required<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub(super) fn option<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }
}

/// Build a snapshot from a live server and the daemon's recorded start time.
#[must_use]
pub fn snapshot(server: &WatchdogServer, start_time: Instant) -> DiagnosticsSnapshot {
    let scan_pass_count = server.scan_pass_count();
    let scan_overrun_count = server.scan_overrun_count();

    let health = if server.is_terminating() {
        HealthStatus::ShuttingDown
    } else if scan_pass_count > 0 && scan_overrun_count as f64 / scan_pass_count as f64 > 0.01 {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    };

    DiagnosticsSnapshot {
        health,
        unit_count: server.unit_count(),
        scan_pass_count,
        scan_overrun_count,
        mean_scan_duration: server.mean_scan_duration(),
        max_scan_duration: server.max_scan_duration(),
        uptime: start_time.elapsed(),
    }
}

/// Format a snapshot for Prometheus text exposition.
#[must_use]
pub fn format_prometheus_metrics(snapshot: &DiagnosticsSnapshot) -> String {
    let mut output = String::new();

    output.push_str("# HELP wd_health Watchdog daemon health status (1=healthy, 0=not)\n");
    output.push_str("# TYPE wd_health gauge\n");
    output.push_str(&format!(
        "wd_health {{status=\"{}\"}} {}\n",
        snapshot.health,
        u8::from(snapshot.health == HealthStatus::Healthy)
    ));

    output.push_str("# HELP wd_units Currently registered units\n");
    output.push_str("# TYPE wd_units gauge\n");
    output.push_str(&format!("wd_units {}\n", snapshot.unit_count));

    output.push_str("# HELP wd_scan_passes_total Total expiration-scan passes completed\n");
    output.push_str("# TYPE wd_scan_passes_total counter\n");
    output.push_str(&format!("wd_scan_passes_total {}\n", snapshot.scan_pass_count));

    output.push_str("# HELP wd_scan_overruns_total Scan passes that exceeded the scan period\n");
    output.push_str("# TYPE wd_scan_overruns_total counter\n");
    output.push_str(&format!("wd_scan_overruns_total {}\n", snapshot.scan_overrun_count));

    output.push_str("# HELP wd_uptime_seconds Daemon uptime in seconds\n");
    output.push_str("# TYPE wd_uptime_seconds gauge\n");
    output.push_str(&format!("wd_uptime_seconds {:.3}\n", snapshot.uptime.as_secs_f64()));

    if let Some(mean) = snapshot.mean_scan_duration {
        output.push_str("# HELP wd_scan_time_mean_seconds Mean scan-pass duration\n");
        output.push_str("# TYPE wd_scan_time_mean_seconds gauge\n");
        output.push_str(&format!("wd_scan_time_mean_seconds {:.9}\n", mean.as_secs_f64()));
    }

    if let Some(max) = snapshot.max_scan_duration {
        output.push_str("# HELP wd_scan_time_max_seconds Maximum observed scan-pass duration\n");
        output.push_str("# TYPE wd_scan_time_max_seconds gauge\n");
        output.push_str(&format!("wd_scan_time_max_seconds {:.9}\n", max.as_secs_f64()));
    }

    output
}
