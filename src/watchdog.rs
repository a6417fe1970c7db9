//! # Integrity Watchdog
//!
//! Background thread that periodically scans environment indicators (process
//! or window names) against a prohibited set and reports matches to a
//! caller-supplied [`DetectionPolicy`].
//!
//! ## Lifecycle
//! ```text
//! Idle --start()--> Running --signal_stop()--> StopRequested --loop exits--> Stopped
//! ```
//! Cancellation is cooperative. The loop checks the running flag at the top of
//! every iteration and after its sleep, so an in-flight scan always finishes
//! before the thread reports `Stopped`. [`IntegrityWatchdog::request_stop`]
//! signals, then waits up to the grace period for `Stopped`; a loop that does not
//! get there in time is reported as `WatchdogStall`, never killed.
//!
//! The loop owns `Arc`s to everything it touches, so a stalled thread that
//! outlives its watchdog still never reads freed memory.

use crate::config::WatchdogConfig;
use crate::error::{EngineError, Result};
use crate::identity::IdentityCache;
use crate::utils::metrics::{global_metrics, Timer};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

/// Step between checks while waiting for the loop to stop
const STOP_POLL_STEP: Duration = Duration::from_micros(200);

/// Watchdog lifecycle state
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogState {
    Idle = 0,
    Running = 1,
    StopRequested = 2,
    Stopped = 3,
}

impl WatchdogState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WatchdogState::Idle,
            1 => WatchdogState::Running,
            2 => WatchdogState::StopRequested,
            _ => WatchdogState::Stopped,
        }
    }
}

/// A prohibited indicator seen during a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    /// The indicator as reported by the source
    pub indicator: String,
    /// The prohibited entry it matched (lowercased)
    pub matched: String,
    /// Scan number the match happened in (starting at 1)
    pub iteration: u64,
    pub machine_id: Option<String>,
    pub os_build: Option<u32>,
}

/// What the loop does after a detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionAction {
    Continue,
    /// Stop the loop after this scan
    Stop,
}

/// Caller-supplied response to a detection
pub trait DetectionPolicy: Send + Sync {
    fn on_detection(&self, detection: &Detection) -> DetectionAction;
}

impl<F> DetectionPolicy for F
where
    F: Fn(&Detection) -> DetectionAction + Send + Sync,
{
    fn on_detection(&self, detection: &Detection) -> DetectionAction {
        self(detection)
    }
}

/// Enumerates the current indicators once per scan
pub trait IndicatorSource: Send {
    fn indicators(&mut self) -> Vec<String>;
}

impl<F> IndicatorSource for F
where
    F: FnMut() -> Vec<String> + Send,
{
    fn indicators(&mut self) -> Vec<String> {
        self()
    }
}

/// Process names from `/proc`. Empty on other platforms.
///
/// Each process contributes the basename of its executable and of its argv[0],
/// which may differ for renamed or re-exec'd binaries. `comm` is only used when
/// neither is readable, since the kernel cuts it to 15 bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessListSource;

impl IndicatorSource for ProcessListSource {
    #[cfg(target_os = "linux")]
    fn indicators(&mut self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir("/proc") else {
            return Vec::new();
        };
        entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| name.bytes().all(|b| b.is_ascii_digit()))
            })
            .flat_map(|entry| process_names(&entry.path()))
            .collect()
    }

    #[cfg(not(target_os = "linux"))]
    fn indicators(&mut self) -> Vec<String> {
        Vec::new()
    }
}

#[cfg(target_os = "linux")]
fn process_names(dir: &std::path::Path) -> Vec<String> {
    let mut names = Vec::with_capacity(2);

    if let Ok(exe) = std::fs::read_link(dir.join("exe")) {
        if let Some(name) = exe.file_name().and_then(|n| n.to_str()) {
            push_name(&mut names, name.trim_end_matches(" (deleted)"));
        }
    }
    if let Ok(cmdline) = std::fs::read(dir.join("cmdline")) {
        if let Some(argv0) = cmdline.split(|&b| b == 0).next() {
            let argv0 = String::from_utf8_lossy(argv0);
            if let Some(name) = argv0.rsplit('/').next() {
                push_name(&mut names, name);
            }
        }
    }
    if names.is_empty() {
        if let Ok(comm) = std::fs::read_to_string(dir.join("comm")) {
            push_name(&mut names, &comm);
        }
    }
    names
}

#[cfg(target_os = "linux")]
fn push_name(names: &mut Vec<String>, name: &str) {
    let name = name.trim();
    if !name.is_empty() && !names.iter().any(|n| n == name) {
        names.push(name.to_string());
    }
}

/// Case-insensitive set of prohibited names with a first-character fast reject
#[derive(Debug, Clone, Default)]
pub struct ProhibitedSet {
    /// (first lowercase char, full lowercase name)
    entries: Vec<(char, String)>,
}

impl ProhibitedSet {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut entries: Vec<(char, String)> = names
            .into_iter()
            .map(|name| name.as_ref().trim().to_lowercase())
            .filter_map(|name| Some((name.chars().next()?, name)))
            .collect();
        entries.sort();
        entries.dedup();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The prohibited entry `candidate` matches, if any
    pub fn matches(&self, candidate: &str) -> Option<&str> {
        let first = candidate.chars().next()?.to_lowercase().next()?;
        if !self.entries.iter().any(|(head, _)| *head == first) {
            return None;
        }
        // Fold the whole string at once so context rules (final sigma) agree with `new`.
        let folded = candidate.to_lowercase();
        self.entries
            .iter()
            .find(|(head, name)| *head == first && *name == folded)
            .map(|(_, name)| name.as_str())
    }
}

struct Shared {
    state: AtomicU8,
    iterations: AtomicU64,
}

impl Shared {
    fn state(&self) -> WatchdogState {
        WatchdogState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn is_running(&self) -> bool {
        self.state() == WatchdogState::Running
    }

    fn transition(&self, from: WatchdogState, to: WatchdogState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Marks the watchdog Stopped when the loop exits, including by panic
struct StoppedOnExit(Arc<Shared>);

impl Drop for StoppedOnExit {
    fn drop(&mut self) {
        self.0
            .state
            .store(WatchdogState::Stopped as u8, Ordering::Release);
        debug!("Watchdog loop stopped");
    }
}

struct ScanLoop {
    shared: Arc<Shared>,
    prohibited: Arc<ProhibitedSet>,
    identity: Arc<IdentityCache>,
    source: Box<dyn IndicatorSource>,
    policy: Box<dyn DetectionPolicy>,
    poll_interval: Duration,
}

impl ScanLoop {
    fn run(mut self) {
        let _stopped = StoppedOnExit(self.shared.clone());
        info!(poll_ms = self.poll_interval.as_millis() as u64, "Watchdog loop started");

        while self.shared.is_running() {
            if !self.sleep_interval() {
                break;
            }
            if !self.scan() {
                break;
            }
        }
    }

    /// Park for the poll interval; an unpark from `signal_stop` cuts it short.
    /// Returns whether the loop should go on to scan.
    fn sleep_interval(&self) -> bool {
        let deadline = Instant::now() + self.poll_interval;
        loop {
            if !self.shared.is_running() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::park_timeout(deadline - now);
        }
    }

    /// One full scan. Returns false if the policy asked to stop.
    fn scan(&mut self) -> bool {
        let _timer = Timer::start("watchdog_scan");
        let iteration = self.shared.iterations.load(Ordering::Relaxed) + 1;
        let mut keep_running = true;

        for indicator in self.source.indicators() {
            let Some(matched) = self.prohibited.matches(&indicator) else {
                continue;
            };
            global_metrics().watchdog_detection();
            let detection = Detection {
                matched: matched.to_string(),
                indicator,
                iteration,
                machine_id: self.identity.machine_id().ok().map(str::to_string),
                os_build: self.identity.os_build().ok(),
            };
            warn!(
                indicator = %detection.indicator,
                matched = %detection.matched,
                iteration,
                "Prohibited indicator detected"
            );
            if self.policy.on_detection(&detection) == DetectionAction::Stop {
                keep_running = false;
                break;
            }
        }

        self.shared.iterations.store(iteration, Ordering::Release);
        global_metrics().watchdog_iteration();

        if !keep_running {
            self.shared
                .transition(WatchdogState::Running, WatchdogState::StopRequested);
            info!(iteration, "Watchdog stopping on policy request");
        }
        keep_running
    }
}

/// Background integrity scanner. Share it through an `Arc` to stop it from
/// another thread.
pub struct IntegrityWatchdog {
    config: WatchdogConfig,
    shared: Arc<Shared>,
    prohibited: Arc<ProhibitedSet>,
    identity: Arc<IdentityCache>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl IntegrityWatchdog {
    pub fn new(config: WatchdogConfig, identity: Arc<IdentityCache>) -> Self {
        let prohibited = Arc::new(ProhibitedSet::new(&config.prohibited));
        Self {
            config,
            shared: Arc::new(Shared {
                state: AtomicU8::new(WatchdogState::Idle as u8),
                iterations: AtomicU64::new(0),
            }),
            prohibited,
            identity,
            handle: Mutex::new(None),
        }
    }

    pub fn state(&self) -> WatchdogState {
        self.shared.state()
    }

    /// Completed scans so far
    pub fn iterations(&self) -> u64 {
        self.shared.iterations.load(Ordering::Acquire)
    }

    pub fn prohibited(&self) -> &ProhibitedSet {
        &self.prohibited
    }

    /// Idle -> Running: spawn the scan loop.
    ///
    /// # Errors
    /// `AlreadyStarted` outside the Idle state; `Io` if the thread cannot be spawned.
    #[instrument(skip(self, source, policy), fields(thread = %self.config.thread_name))]
    pub fn start<S, P>(&self, source: S, policy: P) -> Result<()>
    where
        S: IndicatorSource + 'static,
        P: DetectionPolicy + 'static,
    {
        if !self
            .shared
            .transition(WatchdogState::Idle, WatchdogState::Running)
        {
            return Err(EngineError::AlreadyStarted);
        }

        let scan_loop = ScanLoop {
            shared: self.shared.clone(),
            prohibited: self.prohibited.clone(),
            identity: self.identity.clone(),
            source: Box::new(source),
            policy: Box::new(policy),
            poll_interval: self.config.poll_interval,
        };

        let spawned = thread::Builder::new()
            .name(self.config.thread_name.clone())
            .spawn(move || scan_loop.run());

        match spawned {
            Ok(handle) => {
                *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
                info!(prohibited = self.prohibited.len(), "Watchdog started");
                Ok(())
            }
            Err(e) => {
                self.shared
                    .state
                    .store(WatchdogState::Idle as u8, Ordering::Release);
                error!(error = %e, "Failed to spawn watchdog thread");
                Err(EngineError::Io(e))
            }
        }
    }

    /// Phase one of stopping: Running -> StopRequested, and wake the loop if it is
    /// sleeping. Returns whether this call made the transition.
    pub fn signal_stop(&self) -> bool {
        let signalled = self
            .shared
            .transition(WatchdogState::Running, WatchdogState::StopRequested);
        if let Some(handle) = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            handle.thread().unpark();
        }
        if signalled {
            debug!("Watchdog stop requested");
        }
        signalled
    }

    /// Phase two: wait up to `timeout` for the loop to reach Stopped, then join it.
    ///
    /// # Errors
    /// `WatchdogStall` if the loop is still running at the deadline. The thread is
    /// left to finish on its own.
    pub fn wait_stopped(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.state() {
                WatchdogState::Idle => return Ok(()),
                WatchdogState::Stopped => {
                    self.join();
                    return Ok(());
                }
                WatchdogState::Running | WatchdogState::StopRequested => {}
            }

            let now = Instant::now();
            if now >= deadline {
                global_metrics().watchdog_stall();
                warn!(grace_ms = timeout.as_millis() as u64, "Watchdog did not stop in time");
                return Err(EngineError::WatchdogStall(timeout));
            }
            thread::sleep(STOP_POLL_STEP.min(deadline - now));
        }
    }

    /// Signal, then wait up to the configured grace period.
    /// A no-op while Idle.
    pub fn request_stop(&self) -> Result<()> {
        if self.state() == WatchdogState::Idle {
            return Ok(());
        }
        self.signal_stop();
        self.wait_stopped(self.config.grace_period)
    }

    fn join(&self) {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Watchdog loop exited by panic");
            }
        }
    }
}

impl Drop for IntegrityWatchdog {
    fn drop(&mut self) {
        if let Err(e) = self.request_stop() {
            warn!(error = %e, "Watchdog dropped while still running");
        }
    }
}

impl std::fmt::Debug for IntegrityWatchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrityWatchdog")
            .field("state", &self.state())
            .field("iterations", &self.iterations())
            .field("prohibited", &self.prohibited.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result as EngineResult;
    use crate::identity::IdentityProvider;
    use std::sync::atomic::AtomicUsize;

    struct FixedIdentity;

    impl IdentityProvider for FixedIdentity {
        fn machine_id(&self) -> EngineResult<String> {
            Ok("test-machine".into())
        }

        fn os_build(&self) -> EngineResult<u32> {
            Ok(22631)
        }
    }

    fn watchdog(prohibited: &[&str]) -> IntegrityWatchdog {
        let config = WatchdogConfig {
            poll_interval: Duration::from_millis(1),
            grace_period: Duration::from_millis(500),
            prohibited: prohibited.iter().map(|s| s.to_string()).collect(),
            ..WatchdogConfig::default()
        };
        IntegrityWatchdog::new(config, Arc::new(IdentityCache::new(FixedIdentity)))
    }

    fn wait_for_iterations(w: &IntegrityWatchdog, n: u64) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while w.iterations() < n {
            assert!(Instant::now() < deadline, "loop never iterated");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_prohibited_match_is_case_insensitive() {
        let set = ProhibitedSet::new(["CheatEngine", "x64dbg", ""]);
        assert_eq!(set.len(), 2);
        assert_eq!(set.matches("cheatengine"), Some("cheatengine"));
        assert_eq!(set.matches("CHEATENGINE"), Some("cheatengine"));
        assert_eq!(set.matches("X64DBG"), Some("x64dbg"));
        assert_eq!(set.matches("cheatengine2"), None);
        assert_eq!(set.matches("notepad"), None);
        assert_eq!(set.matches(""), None);

        let greek = ProhibitedSet::new(["ΣΟΦΟΣ"]);
        assert_eq!(greek.matches("ΣΟΦΟΣ"), Some("σοφος"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_process_source_reports_untruncated_names() {
        use std::os::unix::process::CommandExt;
        use std::process::Command;

        // Longer than the 15 bytes the kernel keeps in `comm`.
        let name = "cheatengine-x86_64";
        let mut child = Command::new("sleep").arg0(name).arg("30").spawn().unwrap();
        let pid_dir = std::path::PathBuf::from(format!("/proc/{}", child.id()));

        let own = process_names(&pid_dir);
        let all = ProcessListSource.indicators();
        child.kill().unwrap();
        child.wait().unwrap();

        assert!(own.iter().any(|n| n == name), "{own:?}");
        assert!(all.iter().any(|n| n == name));

        let set = ProhibitedSet::new([name]);
        assert!(all.iter().any(|n| set.matches(n).is_some()));
    }

    #[test]
    fn test_lifecycle_transitions() {
        let w = watchdog(&[]);
        assert_eq!(w.state(), WatchdogState::Idle);
        w.start(Vec::<String>::new, |_: &Detection| DetectionAction::Continue)
            .unwrap();
        assert_eq!(w.state(), WatchdogState::Running);
        assert!(matches!(
            w.start(Vec::<String>::new, |_: &Detection| DetectionAction::Continue),
            Err(EngineError::AlreadyStarted)
        ));

        wait_for_iterations(&w, 1);
        w.request_stop().unwrap();
        assert_eq!(w.state(), WatchdogState::Stopped);
        // Stopping again is harmless
        w.request_stop().unwrap();
    }

    #[test]
    fn test_stop_while_idle_is_noop() {
        let w = watchdog(&[]);
        w.request_stop().unwrap();
        assert_eq!(w.state(), WatchdogState::Idle);
    }

    #[test]
    fn test_detection_reaches_policy_with_identity() {
        let w = watchdog(&["cheatengine"]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        w.start(
            || vec!["explorer".to_string(), "CheatEngine".to_string()],
            move |d: &Detection| {
                sink.lock().unwrap().push(d.clone());
                DetectionAction::Stop
            },
        )
        .unwrap();

        w.wait_stopped(Duration::from_secs(5)).unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].indicator, "CheatEngine");
        assert_eq!(seen[0].matched, "cheatengine");
        assert_eq!(seen[0].machine_id.as_deref(), Some("test-machine"));
        assert_eq!(seen[0].os_build, Some(22631));
        assert_eq!(w.iterations(), 1);
    }

    #[test]
    fn test_in_flight_scan_completes_before_stopped() {
        let w = Arc::new(watchdog(&[]));
        let scans = Arc::new(AtomicUsize::new(0));
        let counter = scans.clone();
        w.start(
            move || {
                thread::sleep(Duration::from_millis(20));
                counter.fetch_add(1, Ordering::SeqCst);
                Vec::<String>::new()
            },
            |_: &Detection| DetectionAction::Continue,
        )
        .unwrap();

        // Wait until a scan is underway, then stop.
        thread::sleep(Duration::from_millis(10));
        w.request_stop().unwrap();
        assert_eq!(w.state(), WatchdogState::Stopped);
        assert_eq!(scans.load(Ordering::SeqCst) as u64, w.iterations());
    }

    #[test]
    fn test_stall_is_reported_not_hung() {
        let config = WatchdogConfig {
            poll_interval: Duration::from_millis(1),
            grace_period: Duration::from_millis(20),
            ..WatchdogConfig::default()
        };
        let w = IntegrityWatchdog::new(config, Arc::new(IdentityCache::new(FixedIdentity)));
        w.start(
            || {
                thread::sleep(Duration::from_millis(300));
                Vec::<String>::new()
            },
            |_: &Detection| DetectionAction::Continue,
        )
        .unwrap();

        thread::sleep(Duration::from_millis(20));
        let started = Instant::now();
        assert!(matches!(w.request_stop(), Err(EngineError::WatchdogStall(_))));
        assert!(started.elapsed() < Duration::from_millis(250));

        // The loop still finishes on its own.
        w.wait_stopped(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn test_panicking_source_still_reaches_stopped() {
        let w = watchdog(&[]);
        w.start(
            || -> Vec<String> { panic!("source failed") },
            |_: &Detection| DetectionAction::Continue,
        )
        .unwrap();
        w.wait_stopped(Duration::from_secs(5)).unwrap();
        assert_eq!(w.state(), WatchdogState::Stopped);
    }
}
