//! The watchdog server: owns the unit set, runs the request-dispatch and
//! expiration-scan threads, and applies recovery policy on deadline misses.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use wd_common::{fatal, ActionOnFailure, MessageClass, ScanMetrics, WatchdogMessage, WdError, WdResult};
use wd_mailbox::{Mailbox, MailboxRegistry, ReceiveOptions, Received, RegistryMailbox};

use crate::process_manager::ProcessManager;
use crate::timer;
use crate::unit::WatchdogUnit;

const REQUEST_THREAD_NAME: &str = "wd-server-request";
const SCAN_THREAD_NAME: &str = "wd-server-scan";
const SCAN_HISTOGRAM_SIZE: usize = 256;

/// The fleet supervisor.
///
/// Construct with [`WatchdogServer::new`], then either [`WatchdogServer::start`]
/// for the normal request/scan loop, or
/// [`WatchdogServer::run_synchronized_then`] to run an optional fleet
/// bring-up barrier first. Call [`WatchdogServer::join`] to wait for
/// shutdown and run the final termination broadcast and process teardown.
pub struct WatchdogServer {
    name: String,
    mailbox: Arc<dyn Mailbox>,
    units: Arc<Mutex<Vec<WatchdogUnit>>>,
    process_manager: Arc<dyn ProcessManager>,
    termination_flag: Arc<AtomicBool>,
    timed_out: Arc<AtomicBool>,
    nonblocking_queue_empty: Arc<AtomicBool>,
    scan_period: Duration,
    metrics: Arc<Mutex<ScanMetrics>>,
    request_thread: Option<JoinHandle<()>>,
    scan_thread: Option<JoinHandle<()>>,
}

impl WatchdogServer {
    /// Construct a server, opening its mailbox endpoint `"<name>.server"`.
    ///
    /// Aborts via [`fatal`] if `name` is empty. Blocks `SIGALRM`
    /// process-wide as a side effect (see [`timer::ignore_alarm_signals`]) -
    /// this runs exactly once per process, here, not per server instance.
    ///
    /// # Errors
    ///
    /// Returns [`WdError::Transport`] if the server's own mailbox endpoint
    /// name is already registered.
    pub fn new(
        name: impl Into<String>,
        registry: Arc<MailboxRegistry>,
        process_manager: Arc<dyn ProcessManager>,
        scan_period: Duration,
    ) -> WdResult<Self> {
        let name = name.into();
        if name.is_empty() {
            fatal("cannot start a watchdog server with an empty name");
        }

        if let Err(e) = timer::ignore_alarm_signals() {
            tracing::warn!(error = %e, "failed to block SIGALRM, continuing anyway");
        }

        let mailbox = RegistryMailbox::open(registry, format!("{name}.server"))?;

        Ok(Self {
            name,
            mailbox: Arc::new(mailbox),
            units: Arc::new(Mutex::new(Vec::new())),
            process_manager,
            termination_flag: Arc::new(AtomicBool::new(false)),
            timed_out: Arc::new(AtomicBool::new(false)),
            nonblocking_queue_empty: Arc::new(AtomicBool::new(false)),
            scan_period,
            metrics: Arc::new(Mutex::new(ScanMetrics::new(SCAN_HISTOGRAM_SIZE, scan_period))),
            request_thread: None,
            scan_thread: None,
        })
    }

    /// Server name (its mailbox endpoint is `"<name>.server"`).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of currently registered units.
    #[must_use]
    pub fn unit_count(&self) -> usize {
        self.units.lock().expect("unit set poisoned").len()
    }

    /// Whether the most recently completed request-thread receive timed out.
    /// Cleared at the start of each new receive attempt.
    #[must_use]
    pub fn timed_out(&self) -> bool {
        self.timed_out.load(Ordering::Acquire)
    }

    /// Whether the most recent post-dispatch non-blocking drain found the
    /// queue empty. Cleared at the start of each new receive attempt.
    #[must_use]
    pub fn nonblocking_read_empty(&self) -> bool {
        self.nonblocking_queue_empty.load(Ordering::Acquire)
    }

    /// Whether the termination flag has fired (a `KillAll` recovery or an
    /// external [`WatchdogServer::shutdown`] call).
    #[must_use]
    pub fn is_terminating(&self) -> bool {
        self.termination_flag.load(Ordering::Acquire)
    }

    /// Total expiration-scan passes completed so far.
    #[must_use]
    pub fn scan_pass_count(&self) -> u64 {
        self.metrics.lock().expect("metrics poisoned").total_passes()
    }

    /// Number of scan passes that took longer than the configured scan
    /// period.
    #[must_use]
    pub fn scan_overrun_count(&self) -> u64 {
        self.metrics.lock().expect("metrics poisoned").overrun_count()
    }

    /// Mean scan-pass duration, if any passes have run yet.
    #[must_use]
    pub fn mean_scan_duration(&self) -> Option<Duration> {
        self.metrics.lock().expect("metrics poisoned").mean()
    }

    /// Maximum observed scan-pass duration, if any passes have run yet.
    #[must_use]
    pub fn max_scan_duration(&self) -> Option<Duration> {
        self.metrics.lock().expect("metrics poisoned").max()
    }

    /// Request a graceful shutdown from outside the protocol (e.g. a Unix
    /// signal handler in `wd-daemon`). The request thread notices within one
    /// scan period; the scan thread notices at its next wake.
    pub fn shutdown(&self) {
        self.termination_flag.store(true, Ordering::Release);
    }

    /// Spawn the request-dispatch and expiration-scan threads.
    ///
    /// # Errors
    ///
    /// Returns [`WdError::Transport`] if either thread fails to spawn.
    pub fn start(&mut self) -> WdResult<()> {
        self.request_thread = Some(self.spawn_request_thread()?);
        self.scan_thread = Some(self.spawn_scan_thread()?);
        Ok(())
    }

    /// Block until both threads exit, then broadcast `TerminateBroadcast`
    /// to every still-registered unit, clear the unit set, and invoke the
    /// process manager's `kill_all` exactly once.
    pub fn join(mut self) {
        if let Some(handle) = self.request_thread.take() {
            if let Err(e) = handle.join() {
                tracing::warn!(?e, "request thread panicked");
            }
        }
        if let Some(handle) = self.scan_thread.take() {
            if let Err(e) = handle.join() {
                tracing::warn!(?e, "scan thread panicked");
            }
        }
        self.terminate_all();
    }

    /// Run the optional fleet bring-up barrier, then [`WatchdogServer::start`]
    /// and [`WatchdogServer::join`] in sequence.
    ///
    /// Blocks indefinitely for the first `RegisterRequest`, then tolerates up
    /// to `base_ttl` consecutive `timeout`-length gaps with no registration
    /// before releasing the barrier and broadcasting `SyncBroadcast` to every
    /// unit registered so far. Any registration during the countdown resets
    /// the patience back to `base_ttl` (plus one, to compensate for the
    /// decrement applied on the same pass - see the module-level note in
    /// `DESIGN.md` about this being carried over unchanged from the original
    /// timing behavior).
    ///
    /// # Errors
    ///
    /// Returns [`WdError::Transport`] if either loop thread fails to spawn.
    pub fn run_synchronized_then(mut self, timeout: Duration, base_ttl: u32) -> WdResult<()> {
        self.run_synchronization_barrier(timeout, base_ttl);
        self.start()?;
        self.join();
        Ok(())
    }

    fn run_synchronization_barrier(&self, timeout: Duration, base_ttl: u32) {
        tracing::info!(name = %self.name, "watchdog sync period start");

        self.block_for_first_registration();

        let mut ttl = base_ttl;
        loop {
            tracing::trace!(ttl, "sync period TTL left");
            if let Received::Message(msg) = self.mailbox.receive(ReceiveOptions::Timed(timeout)) {
                if msg.message_class == MessageClass::RegisterRequest {
                    self.add_new_unit(msg);
                    ttl = base_ttl + 1;
                }
            }
            ttl = ttl.saturating_sub(1);
            if ttl == 0 {
                break;
            }
        }

        tracing::info!(name = %self.name, "sync listen period over, broadcasting");
        let source = self.mailbox.name().to_string();
        let units = self.units.lock().expect("unit set poisoned");
        for unit in units.iter() {
            self.mailbox.send_connectionless(
                unit.name(),
                WatchdogMessage::server_signal(MessageClass::SyncBroadcast, &source),
            );
        }
    }

    fn block_for_first_registration(&self) {
        loop {
            if let Received::Message(msg) = self.mailbox.receive(ReceiveOptions::Normal) {
                if msg.message_class == MessageClass::RegisterRequest {
                    self.add_new_unit(msg);
                    return;
                }
            }
        }
    }

    fn spawn_request_thread(&self) -> WdResult<JoinHandle<()>> {
        let mailbox = Arc::clone(&self.mailbox);
        let units = Arc::clone(&self.units);
        let process_manager = Arc::clone(&self.process_manager);
        let termination_flag = Arc::clone(&self.termination_flag);
        let timed_out = Arc::clone(&self.timed_out);
        let nonblocking_queue_empty = Arc::clone(&self.nonblocking_queue_empty);
        let scan_period = self.scan_period;
        let name = self.name.clone();

        thread::Builder::new()
            .name(REQUEST_THREAD_NAME.into())
            .spawn(move || {
                request_loop(
                    &mailbox,
                    &units,
                    &process_manager,
                    &termination_flag,
                    &timed_out,
                    &nonblocking_queue_empty,
                    scan_period,
                    &name,
                );
            })
            .map_err(|e| WdError::Transport(format!("failed to spawn request thread: {e}")))
    }

    fn spawn_scan_thread(&self) -> WdResult<JoinHandle<()>> {
        let units = Arc::clone(&self.units);
        let process_manager = Arc::clone(&self.process_manager);
        let termination_flag = Arc::clone(&self.termination_flag);
        let metrics = Arc::clone(&self.metrics);
        let scan_period = self.scan_period;

        thread::Builder::new()
            .name(SCAN_THREAD_NAME.into())
            .spawn(move || {
                scan_loop(&units, &process_manager, &termination_flag, &metrics, scan_period);
            })
            .map_err(|e| WdError::Transport(format!("failed to spawn scan thread: {e}")))
    }

    fn add_new_unit(&self, msg: WatchdogMessage) {
        add_new_unit(&self.mailbox, &self.units, &self.process_manager, &self.name, msg);
    }

    fn terminate_all(&self) {
        terminate_all(&self.mailbox, &self.units, &self.process_manager, &self.name);
    }
}

fn request_loop(
    mailbox: &Arc<dyn Mailbox>,
    units: &Arc<Mutex<Vec<WatchdogUnit>>>,
    process_manager: &Arc<dyn ProcessManager>,
    termination_flag: &Arc<AtomicBool>,
    timed_out: &Arc<AtomicBool>,
    nonblocking_queue_empty: &Arc<AtomicBool>,
    scan_period: Duration,
    name: &str,
) {
    loop {
        if termination_flag.load(Ordering::Acquire) {
            break;
        }

        timed_out.store(false, Ordering::Release);
        nonblocking_queue_empty.store(false, Ordering::Release);

        match mailbox.receive(ReceiveOptions::Timed(scan_period)) {
            Received::TimedOut => {
                timed_out.store(true, Ordering::Release);
                continue;
            }
            Received::Empty => continue,
            Received::Message(msg) => {
                dispatch(mailbox, units, process_manager, name, msg);
            }
        }
    }
}

fn dispatch(
    mailbox: &Arc<dyn Mailbox>,
    units: &Arc<Mutex<Vec<WatchdogUnit>>>,
    process_manager: &Arc<dyn ProcessManager>,
    name: &str,
    msg: WatchdogMessage,
) {
    match msg.message_class {
        MessageClass::RegisterRequest => add_new_unit(mailbox, units, process_manager, name, msg),
        MessageClass::UnregisterRequest => remove_unit_by_name(units, process_manager, &msg.name),
        MessageClass::UpdateSettings => with_unit_crash(units, &msg.name, |u| {
            u.update_settings(msg.settings);
        }),
        MessageClass::Kick => with_unit_warn(units, &msg.name, |u| {
            u.restart_ttl();
            u.restart_timer();
        }),
        MessageClass::Start => with_unit_crash(units, &msg.name, WatchdogUnit::start_timer),
        MessageClass::Stop => with_unit_warn(units, &msg.name, WatchdogUnit::stop_timer),
        MessageClass::SyncRequest | MessageClass::TerminateRequest => {
            with_unit_ignore(units, &msg.name, |_| {});
        }
        other => tracing::warn!(class = other.name(), "unhandled message class, dropped"),
    }
}

fn with_unit_crash(units: &Arc<Mutex<Vec<WatchdogUnit>>>, name: &str, f: impl FnOnce(&mut WatchdogUnit)) {
    let mut units = units.lock().expect("unit set poisoned");
    match units.iter_mut().find(|u| u.name() == name) {
        Some(unit) => f(unit),
        None => fatal(format!("no such unit '{name}'")),
    }
}

fn with_unit_warn(units: &Arc<Mutex<Vec<WatchdogUnit>>>, name: &str, f: impl FnOnce(&mut WatchdogUnit)) {
    let mut units = units.lock().expect("unit set poisoned");
    match units.iter_mut().find(|u| u.name() == name) {
        Some(unit) => f(unit),
        None => tracing::warn!(name, "no such unit, request dropped"),
    }
}

fn with_unit_ignore(units: &Arc<Mutex<Vec<WatchdogUnit>>>, name: &str, f: impl FnOnce(&mut WatchdogUnit)) {
    let mut units = units.lock().expect("unit set poisoned");
    match units.iter_mut().find(|u| u.name() == name) {
        Some(unit) => f(unit),
        None => tracing::trace!(name, "no such unit, ignored"),
    }
}

fn add_new_unit(
    mailbox: &Arc<dyn Mailbox>,
    units: &Arc<Mutex<Vec<WatchdogUnit>>>,
    process_manager: &Arc<dyn ProcessManager>,
    server_name: &str,
    msg: WatchdogMessage,
) {
    let mut locked = units.lock().expect("unit set poisoned");
    if locked.iter().any(|u| u.name() == msg.name) {
        fatal(format!("duplicate registration for unit '{}'", msg.name));
    }

    let unit = WatchdogUnit::new(msg.name.clone(), msg.pid, msg.settings, msg.on_failure);
    process_manager.track(msg.pid);

    let source = msg.source.clone();
    locked.push(unit);
    drop(locked);

    mailbox.send_connectionless(
        &source,
        WatchdogMessage::server_signal(MessageClass::RegisterReply, format!("{server_name}.server")),
    );
}

fn remove_unit_by_name(units: &Arc<Mutex<Vec<WatchdogUnit>>>, process_manager: &Arc<dyn ProcessManager>, name: &str) {
    let mut locked = units.lock().expect("unit set poisoned");
    if let Some(idx) = locked.iter().position(|u| u.name() == name) {
        let unit = locked.remove(idx);
        process_manager.untrack(unit.pid());
    } else {
        tracing::trace!(name, "unregister request for unknown unit, ignored");
    }
}

fn terminate_all(
    mailbox: &Arc<dyn Mailbox>,
    units: &Arc<Mutex<Vec<WatchdogUnit>>>,
    process_manager: &Arc<dyn ProcessManager>,
    server_name: &str,
) {
    let mut locked = units.lock().expect("unit set poisoned");
    let source = format!("{server_name}.server");
    for unit in locked.iter() {
        mailbox.send_connectionless(
            unit.name(),
            WatchdogMessage::server_signal(MessageClass::TerminateBroadcast, &source),
        );
    }
    locked.clear();
    drop(locked);
    process_manager.kill_all();
}

fn scan_loop(
    units: &Arc<Mutex<Vec<WatchdogUnit>>>,
    process_manager: &Arc<dyn ProcessManager>,
    termination_flag: &Arc<AtomicBool>,
    metrics: &Arc<Mutex<ScanMetrics>>,
    scan_period: Duration,
) {
    loop {
        thread::sleep(scan_period);
        if termination_flag.load(Ordering::Acquire) {
            return;
        }
        scan_once(units, process_manager, termination_flag, metrics);
    }
}

fn scan_once(
    units: &Arc<Mutex<Vec<WatchdogUnit>>>,
    process_manager: &Arc<dyn ProcessManager>,
    termination_flag: &Arc<AtomicBool>,
    metrics: &Arc<Mutex<ScanMetrics>>,
) {
    let start = Instant::now();
    let mut killed_all = false;

    {
        let mut locked = units.lock().expect("unit set poisoned");
        let mut to_remove = Vec::new();

        for (idx, unit) in locked.iter_mut().enumerate() {
            if !unit.expired() {
                continue;
            }

            let remaining = unit.decrement_and_return_ttl();
            if remaining > 0 {
                unit.restart_timer();
                continue;
            }

            match unit.on_failure() {
                ActionOnFailure::ResetOnly => {
                    process_manager.reset(unit.pid());
                    to_remove.push(idx);
                }
                ActionOnFailure::KillAll => {
                    // `kill_all` itself is deferred to `terminate_all`, run
                    // only once both server threads have joined - killing
                    // here would race a fresh registration still in flight
                    // on the request thread.
                    termination_flag.store(true, Ordering::Release);
                    killed_all = true;
                    break;
                }
            }
        }

        if !killed_all {
            for idx in to_remove.into_iter().rev() {
                locked.remove(idx);
            }
        }
    }

    metrics.lock().expect("metrics poisoned").record(start.elapsed());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process_manager::NullProcessManager;
    use wd_common::SlotSettings;
    use wd_mailbox::MailboxRegistry;

    fn register_msg(name: &str, base_ttl: u32, timeout_ms: u32, on_failure: ActionOnFailure) -> WatchdogMessage {
        WatchdogMessage::new(
            MessageClass::RegisterRequest,
            name,
            name,
            SlotSettings::new(base_ttl, timeout_ms),
            1000,
            on_failure,
        )
    }

    #[test]
    fn register_reply_is_sent_back_to_source() {
        let registry = MailboxRegistry::new();
        let pm: Arc<dyn ProcessManager> = Arc::new(NullProcessManager::new());
        let mut server =
            WatchdogServer::new("fleet", Arc::clone(&registry), pm, Duration::from_millis(20)).unwrap();
        server.start().unwrap();

        let client = RegistryMailbox::open(Arc::clone(&registry), "unit.a").unwrap();
        client
            .send(
                "fleet.server",
                register_msg("unit.a", 3, 50, ActionOnFailure::ResetOnly),
            )
            .unwrap();

        match client.receive(ReceiveOptions::Timed(Duration::from_millis(200))) {
            Received::Message(m) => assert_eq!(m.message_class, MessageClass::RegisterReply),
            other => panic!("expected a reply, got {other:?}"),
        }

        server.shutdown();
        server.join();
    }

    /// The fatal path calls `std::process::exit`, so it can only be
    /// observed out-of-process: this test re-execs the test binary itself
    /// with a flag that steers it into the child behavior below, then
    /// asserts on the child's exit status.
    #[test]
    fn duplicate_registration_is_fatal() {
        const CHILD_FLAG: &str = "WD_RUNTIME_TEST_DUPLICATE_REGISTRATION_CHILD";

        if std::env::var_os(CHILD_FLAG).is_some() {
            let registry = MailboxRegistry::new();
            let pm: Arc<dyn ProcessManager> = Arc::new(NullProcessManager::new());
            let mut server =
                WatchdogServer::new("fleet", Arc::clone(&registry), pm, Duration::from_millis(50)).unwrap();
            server.start().unwrap();

            let client = RegistryMailbox::open(Arc::clone(&registry), "unit.a").unwrap();
            client
                .send("fleet.server", register_msg("unit.a", 3, 100, ActionOnFailure::ResetOnly))
                .unwrap();
            let _ = client.receive(ReceiveOptions::Timed(Duration::from_millis(200)));

            // Same name, second time: must abort via `fatal`.
            client
                .send("fleet.server", register_msg("unit.a", 3, 100, ActionOnFailure::ResetOnly))
                .unwrap();
            thread::sleep(Duration::from_millis(200));

            // Should never reach here; use a code distinguishable from
            // `fatal`'s exit(1) to fail loudly if it does.
            std::process::exit(42);
        }

        let exe = std::env::current_exe().expect("test binary path");
        let output = std::process::Command::new(exe)
            .args(["--exact", "server::tests::duplicate_registration_is_fatal"])
            .env(CHILD_FLAG, "1")
            .output()
            .expect("failed to spawn child test process");

        assert_eq!(
            output.status.code(),
            Some(1),
            "duplicate registration must abort with exit code 1, got {:?}\nstderr: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr),
        );
    }

    #[test]
    fn expired_unit_with_exhausted_ttl_triggers_reset_and_removal() {
        let registry = MailboxRegistry::new();
        let pm = Arc::new(NullProcessManager::new());
        let pm_dyn: Arc<dyn ProcessManager> = pm.clone();
        let mut server =
            WatchdogServer::new("fleet", Arc::clone(&registry), pm_dyn, Duration::from_millis(10)).unwrap();
        server.start().unwrap();

        let client = RegistryMailbox::open(Arc::clone(&registry), "unit.a").unwrap();
        client
            .send("fleet.server", register_msg("unit.a", 1, 15, ActionOnFailure::ResetOnly))
            .unwrap();
        let _ = client.receive(ReceiveOptions::Timed(Duration::from_millis(200)));

        // One missed deadline with base_ttl = 1 exhausts it immediately.
        thread::sleep(Duration::from_millis(100));

        assert_eq!(server.unit_count(), 0);
        assert_eq!(pm.reset_calls(), vec![1000]);

        server.shutdown();
        server.join();
    }

    #[test]
    fn kill_all_terminates_fleet_on_exhaustion() {
        let registry = MailboxRegistry::new();
        let pm = Arc::new(NullProcessManager::new());
        let pm_dyn: Arc<dyn ProcessManager> = pm.clone();
        let mut server =
            WatchdogServer::new("fleet", Arc::clone(&registry), pm_dyn, Duration::from_millis(10)).unwrap();
        server.start().unwrap();

        let client = RegistryMailbox::open(Arc::clone(&registry), "unit.a").unwrap();
        client
            .send("fleet.server", register_msg("unit.a", 1, 15, ActionOnFailure::KillAll))
            .unwrap();
        let _ = client.receive(ReceiveOptions::Timed(Duration::from_millis(200)));

        // `kill_all` only fires from `terminate_all`, which runs inside
        // `join` after both server threads have unwound - join concurrently
        // with the assertions below rather than before them.
        let join_handle = thread::spawn(move || server.join());

        match client.receive(ReceiveOptions::Timed(Duration::from_millis(1000))) {
            Received::Message(m) => assert_eq!(m.message_class, MessageClass::TerminateBroadcast),
            other => panic!("expected a terminate broadcast, got {other:?}"),
        }
        assert_eq!(pm.kill_all_count(), 1);

        join_handle.join().unwrap();
    }

    #[test]
    fn kick_resets_ttl_and_timer() {
        let registry = MailboxRegistry::new();
        let pm: Arc<dyn ProcessManager> = Arc::new(NullProcessManager::new());
        let mut server =
            WatchdogServer::new("fleet", Arc::clone(&registry), pm, Duration::from_millis(10)).unwrap();
        server.start().unwrap();

        let client = RegistryMailbox::open(Arc::clone(&registry), "unit.a").unwrap();
        client
            .send("fleet.server", register_msg("unit.a", 2, 40, ActionOnFailure::ResetOnly))
            .unwrap();
        let _ = client.receive(ReceiveOptions::Timed(Duration::from_millis(200)));

        for _ in 0..5 {
            thread::sleep(Duration::from_millis(20));
            client
                .send_connectionless(
                    "fleet.server",
                    WatchdogMessage::signal(
                        MessageClass::Kick,
                        "unit.a",
                        "unit.a",
                        SlotSettings::default(),
                        0,
                        ActionOnFailure::ResetOnly,
                    ),
                );
        }

        assert_eq!(server.unit_count(), 1);

        server.shutdown();
        server.join();
    }
}
