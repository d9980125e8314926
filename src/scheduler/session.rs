use std::time::{Duration, Instant};

/// Why a session is paused. Both can hold at once; the session only runs
/// again once neither does.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PauseReason {
    /// Explicit `pause()` from the user.
    User,
    /// The view went to the background.
    Hidden,
}

/// One active streaming session. Owned exclusively by the scheduler; created
/// on `start()` and discarded on `stop()`.
#[derive(Clone, Debug)]
pub struct CaptureSession {
    pub(super) id: u64,
    pub(super) in_flight: bool,
    pub(super) last_submit_at: Option<Instant>,
    pub(super) interval: Duration,
    pub(super) min_spacing: Duration,
    pub(super) next_tick_at: Instant,
    pub(super) user_paused: bool,
    pub(super) hidden: bool,
    pub(super) submissions: u64,
}

impl CaptureSession {
    pub(super) fn new(id: u64, interval: Duration, min_spacing: Duration, now: Instant) -> Self {
        Self {
            id,
            in_flight: false,
            last_submit_at: None,
            interval,
            min_spacing,
            next_tick_at: now + interval,
            user_paused: false,
            hidden: false,
            submissions: 0,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_paused(&self) -> bool {
        self.user_paused || self.hidden
    }

    pub fn is_paused_for(&self, reason: PauseReason) -> bool {
        match reason {
            PauseReason::User => self.user_paused,
            PauseReason::Hidden => self.hidden,
        }
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn last_submit_at(&self) -> Option<Instant> {
        self.last_submit_at
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn min_spacing(&self) -> Duration {
        self.min_spacing
    }

    /// Next timer deadline, or `None` while paused.
    pub fn next_tick_at(&self) -> Option<Instant> {
        (!self.is_paused()).then_some(self.next_tick_at)
    }

    /// Submissions issued in this session so far.
    pub fn submissions(&self) -> u64 {
        self.submissions
    }

    pub(super) fn set_paused(&mut self, reason: PauseReason, paused: bool) {
        match reason {
            PauseReason::User => self.user_paused = paused,
            PauseReason::Hidden => self.hidden = paused,
        }
    }

    /// Throttle check: has at least `min_spacing` passed since the last submission?
    pub(super) fn spacing_elapsed(&self, now: Instant) -> bool {
        match self.last_submit_at {
            Some(last) => now.saturating_duration_since(last) >= self.min_spacing,
            None => true,
        }
    }

    /// Move the timer past `now`. Missed ticks collapse into the current one.
    pub(super) fn advance_timer(&mut self, now: Instant) {
        if self.next_tick_at > now {
            return;
        }
        let behind = now.saturating_duration_since(self.next_tick_at).as_nanos();
        let missed = behind / self.interval.as_nanos().max(1) + 1;
        let step = u32::try_from(missed)
            .ok()
            .and_then(|missed| self.interval.checked_mul(missed));
        self.next_tick_at = match step {
            Some(step) => self.next_tick_at + step,
            None => now + self.interval,
        };
    }
}
