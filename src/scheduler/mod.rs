//! Capture scheduler.
//!
//! Pure state machine over an owned `CaptureSession`. It never sleeps, never
//! touches the network and never reads a clock: callers pass `now` in and
//! carry out the submissions it hands back.
//!
//! ```text
//! Idle --start--> Active <--pause/resume--> Paused
//!   any --stop--> Stopped --start--> Active
//! ```
//!
//! Guarantees:
//! - Single-flight: at most one `Submission` is outstanding per session.
//! - Minimum spacing: two submissions are never closer than `min_spacing`.
//! - A submission's result is delivered even if the session paused meanwhile,
//!   and dropped if the session it belongs to is gone.

use std::time::{Duration, Instant};

use crate::result::CaptureResult;
use crate::sink::{CaptionUpdate, ResultSink, StatusBadge};

mod latency;
mod session;

pub use latency::{LatencyWindow, DEFAULT_LATENCY_WINDOW};
pub use session::{CaptureSession, PauseReason};

/// Timer granularity floor; keeps a zero interval from spinning.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScheduleConfig {
    /// Sampling period of the recurring timer.
    pub interval: Duration,
    /// Minimum gap between two submissions, enforced for every trigger.
    pub min_spacing: Duration,
    /// Samples kept for the average latency.
    pub latency_window: usize,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(3_000),
            min_spacing: Duration::from_millis(2_000),
            latency_window: DEFAULT_LATENCY_WINDOW,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Active,
    Paused,
    Stopped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    Timer,
    Manual,
}

/// Ticket for one admitted submission. Hand it back to `complete` or `abandon`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submission {
    pub session_id: u64,
    /// 1-based position within the session.
    pub sequence: u64,
    pub trigger: Trigger,
    pub issued_at: Instant,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// No session is running.
    Inactive,
    Paused,
    InFlight,
    Throttled,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Go: capture a frame and submit it.
    Submit(Submission),
    /// Trigger fired but a guard refused it. Not an error.
    Skipped(SkipReason),
    /// The recurring timer has not reached its deadline.
    NotDue,
}

impl TickOutcome {
    pub fn submission(self) -> Option<Submission> {
        match self {
            Self::Submit(submission) => Some(submission),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// The owning session was stopped before the result arrived.
    Dropped,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub submitted: u64,
    pub skipped_paused: u64,
    pub skipped_in_flight: u64,
    pub skipped_throttled: u64,
    pub successes: u64,
    pub deferred: u64,
    pub budget_exceeded: u64,
    pub failures: u64,
    pub abandoned: u64,
    pub dropped_late: u64,
}

pub struct Scheduler {
    config: ScheduleConfig,
    session: Option<CaptureSession>,
    stopped: bool,
    next_session_id: u64,
    latency: LatencyWindow,
    stats: SchedulerStats,
}

impl Scheduler {
    pub fn new(config: ScheduleConfig) -> Self {
        let config = ScheduleConfig {
            interval: config.interval.max(MIN_INTERVAL),
            ..config
        };
        Self {
            config,
            session: None,
            stopped: false,
            next_session_id: 1,
            latency: LatencyWindow::new(config.latency_window),
            stats: SchedulerStats::default(),
        }
    }

    pub fn config(&self) -> ScheduleConfig {
        self.config
    }

    pub fn state(&self) -> SchedulerState {
        match &self.session {
            Some(session) if session.is_paused() => SchedulerState::Paused,
            Some(_) => SchedulerState::Active,
            None if self.stopped => SchedulerState::Stopped,
            None => SchedulerState::Idle,
        }
    }

    pub fn session(&self) -> Option<&CaptureSession> {
        self.session.as_ref()
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    pub fn average_latency(&self) -> Option<Duration> {
        self.latency.average()
    }

    pub fn latency_window(&self) -> &LatencyWindow {
        &self.latency
    }

    /// Next recurring tick, `None` while idle, paused or stopped.
    pub fn next_tick_at(&self) -> Option<Instant> {
        self.session.as_ref().and_then(CaptureSession::next_tick_at)
    }

    /// Idle/Stopped -> Active. Returns false (and does nothing) if a session is already running.
    pub fn start(&mut self, now: Instant) -> bool {
        if self.session.is_some() {
            log::debug!("start ignored: capture session already running");
            return false;
        }
        let id = self.next_session_id;
        self.next_session_id += 1;
        self.session = Some(CaptureSession::new(
            id,
            self.config.interval,
            self.config.min_spacing,
            now,
        ));
        self.stopped = false;
        self.latency.clear();
        log::info!(
            "capture session {} started (interval {} ms, min spacing {} ms)",
            id,
            self.config.interval.as_millis(),
            self.config.min_spacing.as_millis()
        );
        true
    }

    /// Hold the recurring trigger. An in-flight submission keeps running and
    /// its result is still delivered. Returns true on Active -> Paused.
    pub fn pause(&mut self, reason: PauseReason) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        let was_paused = session.is_paused();
        session.set_paused(reason, true);
        if !was_paused {
            log::info!("capture session {} paused ({:?})", session.id, reason);
        }
        !was_paused
    }

    /// Clear one pause reason. Ticking restarts one interval from `now`;
    /// ticks missed while paused are not replayed. Returns true on Paused -> Active.
    pub fn resume(&mut self, reason: PauseReason, now: Instant) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        if !session.is_paused_for(reason) {
            return false;
        }
        session.set_paused(reason, false);
        if session.is_paused() {
            return false;
        }
        session.next_tick_at = now + session.interval;
        log::info!("capture session {} resumed", session.id);
        true
    }

    /// Any -> Stopped. Discards the session; results still in flight will be dropped.
    /// Returns true if a session was running.
    pub fn stop(&mut self) -> bool {
        self.stopped = true;
        match self.session.take() {
            Some(session) => {
                log::info!(
                    "capture session {} stopped after {} submissions",
                    session.id,
                    session.submissions
                );
                true
            }
            None => false,
        }
    }

    /// Recurring timer entry point. Call whenever the timer may have fired.
    pub fn poll_tick(&mut self, now: Instant) -> TickOutcome {
        let Some(session) = self.session.as_mut() else {
            return TickOutcome::Skipped(SkipReason::Inactive);
        };
        // The timer is cancelled while paused; nothing to count.
        if session.is_paused() {
            return TickOutcome::Skipped(SkipReason::Paused);
        }
        if now < session.next_tick_at {
            return TickOutcome::NotDue;
        }
        session.advance_timer(now);
        self.admit(now, Trigger::Timer)
    }

    /// Manual trigger. Bypasses the timer, never the guards.
    pub fn capture_now(&mut self, now: Instant) -> TickOutcome {
        self.admit(now, Trigger::Manual)
    }

    fn admit(&mut self, now: Instant, trigger: Trigger) -> TickOutcome {
        let Some(session) = self.session.as_mut() else {
            return TickOutcome::Skipped(SkipReason::Inactive);
        };
        if session.is_paused() {
            self.stats.skipped_paused += 1;
            return TickOutcome::Skipped(SkipReason::Paused);
        }
        if session.in_flight {
            self.stats.skipped_in_flight += 1;
            log::debug!("{:?} trigger skipped: submission in flight", trigger);
            return TickOutcome::Skipped(SkipReason::InFlight);
        }
        if !session.spacing_elapsed(now) {
            self.stats.skipped_throttled += 1;
            log::debug!("{:?} trigger skipped: inside minimum spacing", trigger);
            return TickOutcome::Skipped(SkipReason::Throttled);
        }

        session.in_flight = true;
        session.last_submit_at = Some(now);
        session.submissions += 1;
        self.stats.submitted += 1;

        TickOutcome::Submit(Submission {
            session_id: session.id,
            sequence: session.submissions,
            trigger,
            issued_at: now,
        })
    }

    /// Route a finished submission to the sink and free the in-flight slot.
    pub fn complete(
        &mut self,
        submission: &Submission,
        result: CaptureResult,
        now: Instant,
        sink: &mut dyn ResultSink,
    ) -> Delivery {
        let Some(session) = self
            .session
            .as_mut()
            .filter(|session| session.id == submission.session_id)
        else {
            self.stats.dropped_late += 1;
            log::debug!(
                "dropping result #{} for ended session {}",
                submission.sequence,
                submission.session_id
            );
            return Delivery::Dropped;
        };
        session.in_flight = false;

        let round_trip = now.saturating_duration_since(submission.issued_at);
        match result {
            CaptureResult::Success {
                caption,
                processing_time_ms,
            } => {
                self.stats.successes += 1;
                self.latency.record(round_trip);
                sink.caption(&CaptionUpdate {
                    sequence: submission.sequence,
                    caption,
                    processing_time_ms,
                    round_trip,
                    average_latency: self.latency.average(),
                });
            }
            CaptureResult::Deferred { reason } => {
                self.stats.deferred += 1;
                log::info!("frame #{} deferred: {}", submission.sequence, reason);
                sink.status(StatusBadge::WarmingUp, Some(&reason));
            }
            CaptureResult::BudgetExceeded => {
                self.stats.budget_exceeded += 1;
                log::warn!("frame #{} refused: budget exceeded", submission.sequence);
                sink.status(StatusBadge::BudgetExceeded, None);
            }
            CaptureResult::Failure { kind, message } => {
                self.stats.failures += 1;
                log::warn!(
                    "frame #{} failed ({}): {}",
                    submission.sequence,
                    kind.error_kind(),
                    message
                );
                sink.status(StatusBadge::Error(kind.error_kind()), Some(&message));
            }
        }
        Delivery::Delivered
    }

    /// Free the in-flight slot without delivering anything.
    pub fn abandon(&mut self, submission: &Submission) {
        if let Some(session) = self
            .session
            .as_mut()
            .filter(|session| session.id == submission.session_id)
        {
            session.in_flight = false;
        }
        self.stats.abandoned += 1;
    }
}
