//! Health monitor.
//!
//! Polls the service status endpoint on a dedicated thread and publishes the
//! latest `HealthSnapshot` through `SharedHealth`. Polling is best effort: a
//! failed poll downgrades the snapshot to unavailable and is never reported
//! to the capture path, and a slow or hung endpoint only delays the next poll.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard};
use std::time::{Duration, Instant};

use crate::clock::Clock;
use crate::result::ErrorKind;
use crate::transport::CancelFlag;

pub const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(30);

const MAX_HEALTH_BODY_BYTES: u64 = 64 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Unknown,
    Starting,
    Running,
    Offline,
}

impl WorkerState {
    /// Lenient parse of a state or status word.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "running" | "ready" | "healthy" | "idle" | "busy" => Self::Running,
            "starting" | "loading" | "warming" | "warming_up" => Self::Starting,
            "offline" | "stopped" | "down" => Self::Offline,
            _ => Self::Unknown,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub available: bool,
    pub worker_state: WorkerState,
    pub queue_depth: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu_memory_gb: Option<f64>,
    /// Set when the snapshot stands in for a poll that failed outright.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
}

impl HealthSnapshot {
    /// State before the first poll and after any failed poll.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            worker_state: WorkerState::Unknown,
            queue_depth: 0,
            status: None,
            model_name: None,
            device: None,
            gpu_memory_gb: None,
            error: None,
        }
    }

    /// Replacement published after a poll that got no usable answer.
    pub fn poll_failed() -> Self {
        Self {
            error: Some(ErrorKind::HealthPollFailure),
            ..Self::unavailable()
        }
    }
}

impl Default for HealthSnapshot {
    fn default() -> Self {
        Self::unavailable()
    }
}

#[derive(Debug, Default, Deserialize)]
struct HealthResponse {
    status: Option<String>,
    model_loaded: Option<bool>,
    worker_state: Option<String>,
    queue_depth: Option<u32>,
    device: Option<String>,
    model_name: Option<String>,
    gpu_memory_gb: Option<f64>,
}

impl HealthResponse {
    fn worker_state(&self) -> WorkerState {
        if let Some(state) = self.worker_state.as_deref() {
            return WorkerState::parse(state);
        }
        match self.model_loaded {
            Some(true) => return WorkerState::Running,
            Some(false) => return WorkerState::Starting,
            None => {}
        }
        self.status
            .as_deref()
            .map(WorkerState::parse)
            .unwrap_or(WorkerState::Unknown)
    }
}

/// Build a snapshot from a status endpoint reply. Fails only when the body is
/// not a JSON object.
pub fn interpret_health_response(status: u16, body: &str) -> Result<HealthSnapshot> {
    let response: HealthResponse = serde_json::from_str(body)
        .with_context(|| format!("health endpoint returned HTTP {} with unparseable body", status))?;
    let worker_state = response.worker_state();
    Ok(HealthSnapshot {
        available: (200..300).contains(&status) && worker_state != WorkerState::Offline,
        worker_state,
        queue_depth: response.queue_depth.unwrap_or(0),
        status: response.status,
        model_name: response.model_name,
        device: response.device,
        gpu_memory_gb: response.gpu_memory_gb,
        error: None,
    })
}

pub trait HealthProbe: Send {
    fn describe(&self) -> String;

    fn probe(&mut self) -> Result<HealthSnapshot>;
}

/// Unauthenticated `GET` against the status endpoint.
pub struct HttpHealthProbe {
    url: String,
    agent: ureq::Agent,
}

impl HttpHealthProbe {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let parsed = url::Url::parse(url).context("parse health url")?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(anyhow!("health endpoint must be http(s), got '{}'", parsed.scheme()));
        }
        Ok(Self {
            url: url.to_string(),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        })
    }
}

impl HealthProbe for HttpHealthProbe {
    fn describe(&self) -> String {
        self.url.clone()
    }

    fn probe(&mut self) -> Result<HealthSnapshot> {
        let response = match self.agent.get(&self.url).set("Accept", "application/json").call() {
            Ok(response) => response,
            Err(ureq::Error::Status(_, response)) => response,
            Err(ureq::Error::Transport(err)) => {
                return Err(anyhow!("health request to {} failed: {}", self.url, err));
            }
        };
        let status = response.status();
        let mut body = String::new();
        response
            .into_reader()
            .take(MAX_HEALTH_BODY_BYTES)
            .read_to_string(&mut body)
            .context("read health response body")?;
        interpret_health_response(status, &body)
    }
}

/// Process-wide latest snapshot. Writers swap the whole value under the lock,
/// so readers see either the old or the new snapshot, never a mix.
#[derive(Clone, Debug, Default)]
pub struct SharedHealth(Arc<RwLock<Published>>);

#[derive(Debug, Default)]
struct Published {
    snapshot: HealthSnapshot,
    polls: u64,
    failures: u64,
    consecutive_failures: u32,
}

impl SharedHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> HealthSnapshot {
        self.read().snapshot.clone()
    }

    /// Completed polls so far. Doubles as a generation number for `updated_since`.
    pub fn polls(&self) -> u64 {
        self.read().polls
    }

    pub fn failures(&self) -> u64 {
        self.read().failures
    }

    /// The latest snapshot and its generation, if newer than `generation`.
    pub fn updated_since(&self, generation: u64) -> Option<(u64, HealthSnapshot)> {
        let published = self.read();
        (published.polls > generation).then(|| (published.polls, published.snapshot.clone()))
    }

    fn read(&self) -> RwLockReadGuard<'_, Published> {
        self.0.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Publish one poll outcome. The streak is the failure run including this
    /// poll, or on success the run it just ended.
    fn record(
        &self,
        outcome: Result<HealthSnapshot>,
    ) -> (HealthSnapshot, Option<anyhow::Error>, u32) {
        let mut published = self.0.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        published.polls += 1;
        let (snapshot, error, streak) = match outcome {
            Ok(snapshot) => {
                let ended = std::mem::take(&mut published.consecutive_failures);
                (snapshot, None, ended)
            }
            Err(err) => {
                published.failures += 1;
                published.consecutive_failures += 1;
                (HealthSnapshot::poll_failed(), Some(err), published.consecutive_failures)
            }
        };
        published.snapshot = snapshot.clone();
        (snapshot, error, streak)
    }
}

type SharedProbe = Arc<Mutex<Box<dyn HealthProbe>>>;

/// Run one probe and publish the result, unless `stopped` was raised while
/// the probe was outstanding.
fn poll_once(
    probe: &SharedProbe,
    shared: &SharedHealth,
    stopped: &CancelFlag,
) -> Option<HealthSnapshot> {
    let outcome = probe
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .probe();
    if stopped.is_cancelled() {
        log::debug!("health poll finished after stop; result discarded");
        return None;
    }
    let (snapshot, error, streak) = shared.record(outcome);
    match error {
        Some(err) if streak == 1 => log::warn!("health poll failed: {:#}", err),
        Some(err) => log::debug!("health poll failed ({} in a row): {:#}", streak, err),
        None if streak > 0 => {
            log::info!("health endpoint reachable again after {} failed polls", streak)
        }
        None => {}
    }
    Some(snapshot)
}

/// Poll cadence: due immediately on start and on resume, then every
/// `interval`. Pure; every decision takes `now`.
#[derive(Clone, Debug)]
pub struct HealthCadence {
    interval: Duration,
    next_poll_at: Option<Instant>,
    paused: bool,
}

impl HealthCadence {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            next_poll_at: None,
            paused: false,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn start(&mut self, now: Instant) {
        self.next_poll_at = Some(now);
        self.paused = false;
    }

    pub fn stop(&mut self) {
        self.next_poll_at = None;
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn pause(&mut self) -> bool {
        let changed = self.next_poll_at.is_some() && !self.paused;
        self.paused |= changed;
        changed
    }

    /// Leave the paused state; the next poll is due immediately.
    pub fn resume(&mut self, now: Instant) -> bool {
        if self.next_poll_at.is_none() || !self.paused {
            return false;
        }
        self.paused = false;
        self.next_poll_at = Some(now);
        true
    }

    /// `None` while stopped or paused.
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.paused {
            None
        } else {
            self.next_poll_at
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.next_deadline().is_some_and(|deadline| now >= deadline)
    }

    /// Record that a poll started at `now`.
    pub fn polled(&mut self, now: Instant) {
        self.next_poll_at = Some(now + self.interval);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Control {
    Pause,
    Resume,
    Stop,
}

struct Worker {
    control: Sender<Control>,
    stopped: CancelFlag,
}

/// Owns the polling thread. Capture code only ever reads the published
/// snapshot, so a blocked probe cannot hold up a capture tick and a long
/// upload cannot hold up a poll.
pub struct HealthMonitor {
    probe: SharedProbe,
    target: String,
    interval: Duration,
    shared: SharedHealth,
    worker: Option<Worker>,
    paused: bool,
}

impl HealthMonitor {
    pub fn new(probe: Box<dyn HealthProbe>, interval: Duration) -> Self {
        Self {
            target: probe.describe(),
            probe: Arc::new(Mutex::new(probe)),
            interval: interval.max(Duration::from_millis(1)),
            shared: SharedHealth::new(),
            worker: None,
            paused: false,
        }
    }

    /// Handle for readers outside the monitor.
    pub fn shared(&self) -> SharedHealth {
        self.shared.clone()
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        self.shared.latest()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn polls(&self) -> u64 {
        self.shared.polls()
    }

    pub fn failures(&self) -> u64 {
        self.shared.failures()
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Spawn the polling thread: one poll right away, then every interval.
    /// Returns false if it is already running.
    pub fn start(&mut self, clock: Arc<dyn Clock>) -> Result<bool> {
        if self.worker.is_some() {
            return Ok(false);
        }
        let (control, commands) = mpsc::channel();
        let stopped = CancelFlag::new();
        let probe = self.probe.clone();
        let shared = self.shared.clone();
        let interval = self.interval;
        let thread_stopped = stopped.clone();

        std::thread::Builder::new()
            .name("health-monitor".to_string())
            .spawn(move || poll_loop(probe, shared, clock, interval, commands, thread_stopped))
            .context("spawn health monitor thread")?;

        log::info!(
            "health monitor polling {} every {} ms",
            self.target,
            interval.as_millis()
        );
        self.worker = Some(Worker { control, stopped });
        self.paused = false;
        Ok(true)
    }

    /// Stop polling. A probe still outstanding finishes in the background and
    /// its result is discarded.
    pub fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stopped.cancel();
            let _ = worker.control.send(Control::Stop);
        }
        self.paused = false;
    }

    pub fn pause(&mut self) {
        if !self.paused && self.send(Control::Pause) {
            log::debug!("health monitor paused");
            self.paused = true;
        }
    }

    /// Leave the paused state; the thread polls immediately.
    pub fn resume(&mut self) {
        if self.paused && self.send(Control::Resume) {
            log::debug!("health monitor resumed");
            self.paused = false;
        }
    }

    /// One poll on the calling thread, published like any other. Blocks while
    /// the polling thread holds the probe.
    pub fn poll_now(&mut self) -> HealthSnapshot {
        let stopped = CancelFlag::new();
        poll_once(&self.probe, &self.shared, &stopped).unwrap_or_else(|| self.shared.latest())
    }

    fn send(&self, control: Control) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| worker.control.send(control).is_ok())
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn poll_loop(
    probe: SharedProbe,
    shared: SharedHealth,
    clock: Arc<dyn Clock>,
    interval: Duration,
    commands: Receiver<Control>,
    stopped: CancelFlag,
) {
    let mut cadence = HealthCadence::new(interval);
    cadence.start(clock.now());

    loop {
        // Apply queued pause/resume before deciding whether a poll is due.
        loop {
            match commands.try_recv() {
                Ok(control) => {
                    if !apply(&mut cadence, control, clock.as_ref()) {
                        return;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return,
            }
        }
        if stopped.is_cancelled() {
            return;
        }

        let now = clock.now();
        if cadence.is_due(now) {
            cadence.polled(now);
            if poll_once(&probe, &shared, &stopped).is_none() {
                return;
            }
            continue;
        }

        let received = match cadence.next_deadline() {
            Some(deadline) => commands.recv_timeout(deadline.saturating_duration_since(now)),
            None => commands.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match received {
            Ok(control) => {
                if !apply(&mut cadence, control, clock.as_ref()) {
                    return;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

/// Returns false once the loop should exit.
fn apply(cadence: &mut HealthCadence, control: Control, clock: &dyn Clock) -> bool {
    match control {
        Control::Pause => {
            cadence.pause();
        }
        Control::Resume => {
            cadence.resume(clock.now());
        }
        Control::Stop => {
            cadence.stop();
            log::debug!("health monitor stopped");
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Scripted(VecDeque<Result<HealthSnapshot>>);

    impl HealthProbe for Scripted {
        fn describe(&self) -> String {
            "scripted".to_string()
        }

        fn probe(&mut self) -> Result<HealthSnapshot> {
            self.0
                .pop_front()
                .unwrap_or_else(|| Err(anyhow!("endpoint down")))
        }
    }

    struct Counting(Arc<AtomicU32>);

    impl HealthProbe for Counting {
        fn describe(&self) -> String {
            "counting".to_string()
        }

        fn probe(&mut self) -> Result<HealthSnapshot> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(running(0))
        }
    }

    fn running(queue_depth: u32) -> HealthSnapshot {
        HealthSnapshot {
            available: true,
            worker_state: WorkerState::Running,
            queue_depth,
            ..HealthSnapshot::unavailable()
        }
    }

    fn wait_until(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn worker_state_derivation() -> Result<()> {
        let loaded = interpret_health_response(
            200,
            r#"{"status": "healthy", "model_loaded": true, "device": "cuda", "gpu_memory_gb": 4.2}"#,
        )?;
        assert!(loaded.available);
        assert_eq!(loaded.worker_state, WorkerState::Running);
        assert_eq!(loaded.device.as_deref(), Some("cuda"));
        assert_eq!(loaded.queue_depth, 0);
        assert_eq!(loaded.error, None);

        let loading = interpret_health_response(200, r#"{"status": "loading", "model_loaded": false}"#)?;
        assert_eq!(loading.worker_state, WorkerState::Starting);
        assert!(loading.available);

        let backend = interpret_health_response(
            200,
            r#"{"status": "healthy", "model_loaded": false, "service": "webcam-caption-api"}"#,
        )?;
        assert_eq!(backend.worker_state, WorkerState::Starting);

        let explicit = interpret_health_response(
            200,
            r#"{"status": "healthy", "worker_state": "offline", "queue_depth": 7}"#,
        )?;
        assert_eq!(explicit.worker_state, WorkerState::Offline);
        assert!(!explicit.available);
        assert_eq!(explicit.queue_depth, 7);

        let server_error = interpret_health_response(500, r#"{"status": "error"}"#)?;
        assert!(!server_error.available);
        assert_eq!(server_error.worker_state, WorkerState::Unknown);
        Ok(())
    }

    #[test]
    fn unparseable_body_is_an_error() {
        assert!(interpret_health_response(200, "ok").is_err());
    }

    #[test]
    fn failure_downgrades_snapshot() {
        let probe = Scripted(VecDeque::from(vec![Ok(running(2)), Err(anyhow!("refused"))]));
        let mut monitor = HealthMonitor::new(Box::new(probe), Duration::from_secs(30));
        let shared = monitor.shared();

        assert_eq!(monitor.poll_now(), running(2));
        assert_eq!(shared.latest(), running(2));

        let failed = monitor.poll_now();
        assert!(!failed.available);
        assert_eq!(failed.worker_state, WorkerState::Unknown);
        assert_eq!(failed.error, Some(ErrorKind::HealthPollFailure));
        assert_eq!(shared.latest(), failed);
        assert_eq!((monitor.polls(), monitor.failures()), (2, 1));
    }

    #[test]
    fn readers_see_each_generation_once() {
        let probe = Scripted(VecDeque::from(vec![Ok(running(1))]));
        let mut monitor = HealthMonitor::new(Box::new(probe), Duration::from_secs(30));
        let shared = monitor.shared();
        assert_eq!(shared.updated_since(0), None);

        monitor.poll_now();
        assert_eq!(shared.updated_since(0), Some((1, running(1))));
        assert_eq!(shared.updated_since(1), None);
    }

    #[test]
    fn cadence_polls_on_start_then_every_interval() {
        let t0 = Instant::now();
        let mut cadence = HealthCadence::new(Duration::from_secs(30));
        assert_eq!(cadence.next_deadline(), None);

        cadence.start(t0);
        assert!(cadence.is_due(t0));
        cadence.polled(t0);
        assert!(!cadence.is_due(t0 + Duration::from_secs(29)));
        assert!(cadence.is_due(t0 + Duration::from_secs(30)));
    }

    #[test]
    fn paused_cadence_is_never_due() {
        let t0 = Instant::now();
        let mut cadence = HealthCadence::new(Duration::from_secs(30));
        assert!(!cadence.pause());
        cadence.start(t0);
        cadence.polled(t0);

        assert!(cadence.pause());
        assert!(!cadence.pause());
        assert_eq!(cadence.next_deadline(), None);
        assert!(!cadence.is_due(t0 + Duration::from_secs(300)));

        assert!(cadence.resume(t0 + Duration::from_secs(301)));
        assert_eq!(cadence.next_deadline(), Some(t0 + Duration::from_secs(301)));
        assert!(cadence.is_due(t0 + Duration::from_secs(301)));
    }

    #[test]
    fn monitor_thread_polls_pauses_and_stops() -> Result<()> {
        let probes = Arc::new(AtomicU32::new(0));
        let mut monitor = HealthMonitor::new(
            Box::new(Counting(probes.clone())),
            Duration::from_millis(10),
        );
        assert!(monitor.start(Arc::new(SystemClock))?);
        assert!(!monitor.start(Arc::new(SystemClock))?);
        assert!(wait_until(|| monitor.polls() >= 3));
        assert!(monitor.snapshot().available);

        monitor.pause();
        assert!(monitor.is_paused());
        monitor.resume();
        assert!(!monitor.is_paused());

        monitor.stop();
        assert!(!monitor.is_running());
        Ok(())
    }
}
