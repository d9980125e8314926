use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

use crate::health::{HealthSnapshot, WorkerState};
use crate::sink::{CaptionUpdate, ResultSink, StatusBadge};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

impl UiMode {
    pub fn from_flag(ui_flag: Option<&str>) -> Self {
        match ui_flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        }
    }

    fn use_pretty(self, is_tty: bool, disable_pretty: bool) -> bool {
        is_tty
            && match self {
                UiMode::Pretty => true,
                UiMode::Auto => !disable_pretty,
                UiMode::Plain => false,
            }
    }
}

/// Terminal sink: captions go to stdout, the status line lives on stderr.
///
/// In pretty mode the status line is a spinner that keeps the current badge,
/// latency and health summary; captions are printed above it.
pub struct ConsoleSink {
    spinner: Option<ProgressBar>,
    badge: StatusBadge,
    detail: Option<String>,
    latency: Option<Duration>,
    health: Option<HealthSnapshot>,
}

impl ConsoleSink {
    pub fn new(mode: UiMode, is_tty: bool, disable_pretty: bool) -> Self {
        let spinner = mode.use_pretty(is_tty, disable_pretty).then(|| {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            let style = ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            spinner.set_style(style);
            spinner
        });
        let mut sink = Self {
            spinner,
            badge: StatusBadge::Stopped,
            detail: None,
            latency: None,
            health: None,
        };
        sink.redraw();
        sink
    }

    pub fn from_args(ui_flag: Option<&str>, is_tty: bool, disable_pretty: bool) -> Self {
        Self::new(UiMode::from_flag(ui_flag), is_tty, disable_pretty)
    }

    pub fn is_pretty(&self) -> bool {
        self.spinner.is_some()
    }

    fn status_line(&self) -> String {
        let mut line = format!("[{}]", self.badge.label());
        if let StatusBadge::Error(kind) = self.badge {
            line.push_str(&format!(" {}", kind));
        }
        if let Some(detail) = &self.detail {
            line.push_str(&format!(": {}", detail));
        }
        if let Some(latency) = self.latency {
            line.push_str(&format!(" | avg {}", format_duration(latency)));
        }
        if let Some(health) = &self.health {
            line.push_str(&format!(" | {}", health_summary(health)));
        }
        line
    }

    fn redraw(&mut self) {
        if let Some(spinner) = &self.spinner {
            spinner.set_message(self.status_line());
        }
    }
}

impl ResultSink for ConsoleSink {
    fn caption(&mut self, update: &CaptionUpdate) {
        self.latency = update.average_latency;
        let line = format!(
            "#{} {} ({})",
            update.sequence,
            update.caption,
            format_duration(update.round_trip)
        );
        match &self.spinner {
            Some(spinner) => spinner.println(line),
            None => println!("{line}"),
        }
        if self.badge != StatusBadge::Live {
            self.badge = StatusBadge::Live;
            self.detail = None;
        }
        self.redraw();
    }

    fn status(&mut self, badge: StatusBadge, detail: Option<&str>) {
        self.badge = badge;
        self.detail = detail.map(str::to_string);
        if self.spinner.is_none() {
            eprintln!("==> {}", self.status_line());
        }
        if badge == StatusBadge::Stopped {
            if let Some(spinner) = &self.spinner {
                spinner.finish_with_message(self.status_line());
                return;
            }
        }
        self.redraw();
    }

    fn health(&mut self, snapshot: &HealthSnapshot) {
        let changed = self
            .health
            .as_ref()
            .is_none_or(|previous| previous.available != snapshot.available);
        self.health = Some(snapshot.clone());
        if self.spinner.is_none() && changed {
            eprintln!("==> {}", health_summary(snapshot));
        }
        self.redraw();
    }
}

impl Drop for ConsoleSink {
    fn drop(&mut self) {
        if let Some(spinner) = &self.spinner {
            if !spinner.is_finished() {
                spinner.finish_and_clear();
            }
        }
    }
}

fn health_summary(snapshot: &HealthSnapshot) -> String {
    let worker = match snapshot.worker_state {
        WorkerState::Unknown => "unknown",
        WorkerState::Starting => "starting",
        WorkerState::Running => "running",
        WorkerState::Offline => "offline",
    };
    if let Some(kind) = snapshot.error {
        return format!("service down ({})", kind);
    }
    let availability = if snapshot.available { "up" } else { "down" };
    if snapshot.queue_depth > 0 {
        format!("service {} ({}, queue {})", availability, worker, snapshot.queue_depth)
    } else {
        format!("service {} ({})", availability, worker)
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
