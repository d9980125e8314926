//! Result sinks.
//!
//! The scheduler and health monitor push updates; nothing ever pulls. A sink
//! must tolerate any order of status/health calls and never block for long,
//! since it runs on the control loop.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::health::HealthSnapshot;
use crate::result::ErrorKind;

/// Short status shown next to the caption.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusBadge {
    Live,
    Paused,
    Hidden,
    WarmingUp,
    BudgetExceeded,
    Error(ErrorKind),
    Stopped,
}

impl StatusBadge {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Paused => "paused",
            Self::Hidden => "hidden",
            Self::WarmingUp => "starting up",
            Self::BudgetExceeded => "budget exceeded",
            Self::Error(_) => "error",
            Self::Stopped => "stopped",
        }
    }
}

/// A caption ready to render.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptionUpdate {
    /// Submission sequence within the session.
    pub sequence: u64,
    pub caption: String,
    /// Processing time reported by the service.
    pub processing_time_ms: Option<u64>,
    /// Client-observed latency for this frame.
    pub round_trip: Duration,
    /// Mean over the rolling latency window, this frame included.
    pub average_latency: Option<Duration>,
}

pub trait ResultSink: Send {
    fn caption(&mut self, update: &CaptionUpdate);

    fn status(&mut self, badge: StatusBadge, detail: Option<&str>);

    fn health(&mut self, snapshot: &HealthSnapshot);
}

// ----------------------------------------------------------------------------
// LogSink
// ----------------------------------------------------------------------------

/// Renders everything through the `log` facade.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl ResultSink for LogSink {
    fn caption(&mut self, update: &CaptionUpdate) {
        log::info!(
            "caption #{} ({} ms): {}",
            update.sequence,
            update.round_trip.as_millis(),
            update.caption
        );
    }

    fn status(&mut self, badge: StatusBadge, detail: Option<&str>) {
        match (badge, detail) {
            (StatusBadge::Error(kind), Some(detail)) => log::warn!("status: {} - {}", kind, detail),
            (StatusBadge::Error(kind), None) => log::warn!("status: {}", kind),
            (badge, Some(detail)) => log::info!("status: {} ({})", badge.label(), detail),
            (badge, None) => log::info!("status: {}", badge.label()),
        }
    }

    fn health(&mut self, snapshot: &HealthSnapshot) {
        match snapshot.error {
            Some(kind) => log::debug!("health: {}", kind),
            None => log::debug!(
                "health: available={} worker={:?} queue={}",
                snapshot.available,
                snapshot.worker_state,
                snapshot.queue_depth
            ),
        }
    }
}

// ----------------------------------------------------------------------------
// MemorySink
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub enum SinkEvent {
    Caption(CaptionUpdate),
    Status {
        badge: StatusBadge,
        detail: Option<String>,
    },
    Health(HealthSnapshot),
}

/// Records every update. Clones share the same event log.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<SinkEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.lock().clone()
    }

    pub fn captions(&self) -> Vec<CaptionUpdate> {
        self.lock()
            .iter()
            .filter_map(|event| match event {
                SinkEvent::Caption(update) => Some(update.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn badges(&self) -> Vec<StatusBadge> {
        self.lock()
            .iter()
            .filter_map(|event| match event {
                SinkEvent::Status { badge, .. } => Some(*badge),
                _ => None,
            })
            .collect()
    }

    pub fn health_updates(&self) -> Vec<HealthSnapshot> {
        self.lock()
            .iter()
            .filter_map(|event| match event {
                SinkEvent::Health(snapshot) => Some(snapshot.clone()),
                _ => None,
            })
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<SinkEvent>> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ResultSink for MemorySink {
    fn caption(&mut self, update: &CaptionUpdate) {
        self.lock().push(SinkEvent::Caption(update.clone()));
    }

    fn status(&mut self, badge: StatusBadge, detail: Option<&str>) {
        self.lock().push(SinkEvent::Status {
            badge,
            detail: detail.map(str::to_string),
        });
    }

    fn health(&mut self, snapshot: &HealthSnapshot) {
        self.lock().push(SinkEvent::Health(snapshot.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_clones_share_events() {
        let sink = MemorySink::new();
        let mut writer = sink.clone();

        writer.status(StatusBadge::Live, None);
        writer.caption(&CaptionUpdate {
            sequence: 1,
            caption: "a desk".to_string(),
            processing_time_ms: Some(120),
            round_trip: Duration::from_millis(300),
            average_latency: Some(Duration::from_millis(300)),
        });
        writer.health(&HealthSnapshot::unavailable());

        assert_eq!(sink.badges(), vec![StatusBadge::Live]);
        assert_eq!(sink.captions()[0].caption, "a desk");
        assert_eq!(sink.health_updates().len(), 1);
        assert_eq!(sink.events().len(), 3);
    }
}
