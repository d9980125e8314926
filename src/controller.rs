//! Capture controller.
//!
//! Owns every collaborator and drives capture ticks plus user commands on
//! the calling thread. Health polling runs on the monitor's own thread; the
//! loop only reads the published snapshot and forwards new ones to the sink.
//! The only blocking points here are the frame grab, the upload with its
//! backoff, and the wait for the next deadline or command.

use anyhow::Result;
use std::io::BufRead;
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::clock::Clock;
use crate::config::CaptionConfig;
use crate::health::{HealthMonitor, HealthSnapshot, HttpHealthProbe, SharedHealth};
use crate::ingest::{open_source, FrameSource};
use crate::result::CaptureResult;
use crate::scheduler::{
    Delivery, PauseReason, ScheduleConfig, Scheduler, SchedulerState, SchedulerStats, Submission,
    TickOutcome,
};
use crate::sink::{ResultSink, StatusBadge};
use crate::transport::{CancelFlag, HttpTransport, RetryingTransport};

/// Upper bound on a single wait, so health updates reach the sink and a
/// paused loop still notices a dropped channel.
const IDLE_WAIT: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    CaptureNow,
    Pause,
    Resume,
    /// The view went to the background.
    Hide,
    /// The view is visible again.
    Show,
    Stop,
}

impl Command {
    /// Parse one line of console input.
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "c" | "capture" => Some(Self::CaptureNow),
            "p" | "pause" => Some(Self::Pause),
            "r" | "resume" => Some(Self::Resume),
            "h" | "hide" => Some(Self::Hide),
            "s" | "show" => Some(Self::Show),
            "q" | "quit" | "stop" => Some(Self::Stop),
            _ => None,
        }
    }
}

pub struct CaptureController {
    scheduler: Scheduler,
    health: HealthMonitor,
    shared_health: SharedHealth,
    health_seen: u64,
    source: Box<dyn FrameSource>,
    transport: RetryingTransport,
    sink: Box<dyn ResultSink>,
    clock: Arc<dyn Clock>,
    cancel: CancelFlag,
    source_connected: bool,
}

impl CaptureController {
    pub fn new(
        schedule: ScheduleConfig,
        source: Box<dyn FrameSource>,
        transport: RetryingTransport,
        health: HealthMonitor,
        sink: Box<dyn ResultSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cancel = transport.cancel_flag();
        let shared_health = health.shared();
        Self {
            scheduler: Scheduler::new(schedule),
            health,
            shared_health,
            health_seen: 0,
            source,
            transport,
            sink,
            clock,
            cancel,
            source_connected: false,
        }
    }

    /// Wire up the HTTP transport, HTTP health probe and the configured frame source.
    pub fn from_config(
        cfg: &CaptionConfig,
        sink: Box<dyn ResultSink>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let source = open_source(
            &cfg.source.url,
            cfg.source.width,
            cfg.source.height,
            cfg.encode_options(),
        )?;
        let transport = RetryingTransport::new(
            Box::new(HttpTransport::new(cfg.http_transport())?),
            cfg.retry_policy(),
            clock.clone(),
        );
        let probe = HttpHealthProbe::new(&cfg.health_url(), cfg.health_timeout)?;
        let health = HealthMonitor::new(Box::new(probe), cfg.health_check_interval);
        Ok(Self::new(cfg.schedule(), source, transport, health, sink, clock))
    }

    /// Raise this from another thread (e.g. a signal handler) to cut a
    /// running backoff short.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn stats(&self) -> &SchedulerStats {
        self.scheduler.stats()
    }

    pub fn health_snapshot(&self) -> HealthSnapshot {
        self.health.snapshot()
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }

    /// Connect the source and begin ticking. Returns false if already running.
    pub fn start(&mut self) -> Result<bool> {
        if matches!(
            self.scheduler.state(),
            SchedulerState::Active | SchedulerState::Paused
        ) {
            return Ok(false);
        }
        self.cancel.reset();
        if !self.source_connected {
            self.source.connect()?;
            self.source_connected = true;
        }
        self.health.start(self.clock.clone())?;
        self.scheduler.start(self.clock.now());
        self.sink.status(StatusBadge::Live, Some(&self.source.describe()));
        Ok(true)
    }

    pub fn pause(&mut self) -> bool {
        let paused = self.scheduler.pause(PauseReason::User);
        if paused {
            self.sink.status(StatusBadge::Paused, None);
        }
        paused
    }

    pub fn resume(&mut self) -> bool {
        let resumed = self.scheduler.resume(PauseReason::User, self.clock.now());
        if resumed {
            self.sink.status(StatusBadge::Live, None);
        }
        resumed
    }

    /// Background the view: capture ticks and health polls both stop.
    pub fn hide(&mut self) -> bool {
        if self.scheduler.session().is_none() {
            return false;
        }
        let hidden = self.scheduler.pause(PauseReason::Hidden);
        self.health.pause();
        if hidden {
            self.sink.status(StatusBadge::Hidden, None);
        }
        hidden
    }

    pub fn show(&mut self) -> bool {
        let now = self.clock.now();
        let was_hidden = self
            .scheduler
            .session()
            .is_some_and(|session| session.is_paused_for(PauseReason::Hidden));
        if !was_hidden {
            return false;
        }
        self.health.resume();
        if self.scheduler.resume(PauseReason::Hidden, now) {
            self.sink.status(StatusBadge::Live, None);
        } else {
            self.sink.status(StatusBadge::Paused, None);
        }
        true
    }

    /// Manual trigger. Returns the delivery if a submission actually ran.
    pub fn capture_now(&mut self) -> Option<Delivery> {
        let outcome = self.scheduler.capture_now(self.clock.now());
        self.dispatch(outcome)
    }

    /// Forward any new health snapshot, then service the capture timer.
    /// Never waits on the health endpoint.
    pub fn tick(&mut self) -> Option<Delivery> {
        self.forward_health();
        let outcome = self.scheduler.poll_tick(self.clock.now());
        self.dispatch(outcome)
    }

    /// Stop the session, drop any pending backoff and release the source.
    pub fn stop(&mut self) -> bool {
        self.cancel.cancel();
        let was_running = self.scheduler.stop();
        self.health.stop();
        if self.source_connected {
            self.source.release();
            self.source_connected = false;
        }
        if was_running {
            let stats = self.scheduler.stats();
            log::info!(
                "capture stopped: {} submitted, {} captions, {} failures, {} skipped",
                stats.submitted,
                stats.successes,
                stats.failures,
                stats.skipped_in_flight + stats.skipped_throttled
            );
            self.sink.status(StatusBadge::Stopped, None);
        }
        was_running
    }

    /// Next capture deadline, `None` while paused or stopped.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduler.next_tick_at()
    }

    /// Apply one command. Returns false once the loop should end.
    pub fn handle(&mut self, command: Command) -> bool {
        log::debug!("command: {:?}", command);
        match command {
            Command::CaptureNow => {
                self.capture_now();
            }
            Command::Pause => {
                self.pause();
            }
            Command::Resume => {
                self.resume();
            }
            Command::Hide => {
                self.hide();
            }
            Command::Show => {
                self.show();
            }
            Command::Stop => {
                self.stop();
                return false;
            }
        }
        true
    }

    /// Drive the session until a `Stop` command arrives or the cancel flag is
    /// raised. Starts the session if it is not running yet.
    pub fn run(&mut self, commands: &Receiver<Command>) -> Result<()> {
        self.start()?;
        let mut commands_open = true;

        loop {
            if self.cancel.is_cancelled() {
                self.stop();
                return Ok(());
            }
            self.tick();

            let wait = self
                .next_deadline()
                .map(|deadline| deadline.saturating_duration_since(self.clock.now()))
                .unwrap_or(IDLE_WAIT)
                .min(IDLE_WAIT);

            if !commands_open {
                self.clock.sleep(wait);
                continue;
            }
            match commands.recv_timeout(wait) {
                Ok(command) => {
                    if !self.handle(command) {
                        return Ok(());
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    log::debug!("command channel closed; running on timers only");
                    commands_open = false;
                }
            }
        }
    }

    fn forward_health(&mut self) {
        if let Some((generation, snapshot)) = self.shared_health.updated_since(self.health_seen) {
            self.health_seen = generation;
            self.sink.health(&snapshot);
        }
    }

    fn dispatch(&mut self, outcome: TickOutcome) -> Option<Delivery> {
        match outcome {
            TickOutcome::Submit(submission) => self.run_submission(submission),
            TickOutcome::Skipped(_) | TickOutcome::NotDue => None,
        }
    }

    fn run_submission(&mut self, submission: Submission) -> Option<Delivery> {
        let result = match self.source.next_frame() {
            Ok(frame) => {
                log::debug!(
                    "frame #{} captured ({}x{}, {} bytes)",
                    submission.sequence,
                    frame.width,
                    frame.height,
                    frame.byte_len()
                );
                let report = self.transport.submit(&frame);
                if report.cancelled {
                    log::debug!("frame #{} abandoned: shutting down", submission.sequence);
                    self.scheduler.abandon(&submission);
                    return None;
                }
                if !report.retries.is_empty() {
                    log::debug!(
                        "frame #{} took {} attempts",
                        submission.sequence,
                        report.attempts
                    );
                }
                report.result
            }
            Err(err) => CaptureResult::device_failure(format!("{:#}", err)),
        };
        let now = self.clock.now();
        Some(
            self.scheduler
                .complete(&submission, result, now, self.sink.as_mut()),
        )
    }
}

/// Feed console lines into the command channel until input ends or the loop
/// hangs up. `Stop` raises `cancel` before it is queued, so an upload that is
/// backing off gives up at its next attempt instead of running out its retries.
pub fn forward_commands<R: BufRead>(
    input: R,
    commands: &Sender<Command>,
    cancel: &CancelFlag,
) {
    for line in input.lines() {
        let Ok(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        let Some(command) = Command::parse(&line) else {
            log::warn!(
                "unknown command '{}'; use c=capture p=pause r=resume h=hide s=show q=quit",
                line.trim()
            );
            continue;
        };
        if command == Command::Stop {
            cancel.cancel();
        }
        if commands.send(command).is_err() {
            break;
        }
    }
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        if self.source_connected {
            self.source.release();
        }
    }
}
