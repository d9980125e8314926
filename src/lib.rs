//! Caption Relay
//!
//! Client side of a live captioning service: samples stills from a video
//! feed, uploads them to a remote captioning endpoint and renders the latest
//! caption while staying responsive under latency, failure and backpressure.
//!
//! # Architecture
//!
//! The capture loop holds a few guarantees by construction:
//!
//! 1. **Single-flight**: at most one upload is outstanding per session.
//! 2. **Minimum spacing**: submissions are never closer than `min_spacing`,
//!    whatever triggered them.
//! 3. **Never wedged**: every submission ends in a `CaptureResult`, and the
//!    in-flight slot is freed on every path.
//! 4. **Health is advisory**: a dead status endpoint downgrades the health
//!    snapshot and nothing else.
//!
//! # Module Structure
//!
//! - `scheduler`: capture state machine (sessions, ticks, throttling, routing)
//! - `transport`: caption upload over HTTP and the retrying wrapper
//! - `health`: status polling on its own thread and the shared health snapshot
//! - `ingest`: frame sources (synthetic, HTTP snapshot)
//! - `frame`: JPEG stills and payload limits
//! - `controller`: drives capture and user commands on one loop
//! - `sink`, `ui`: result rendering

pub mod clock;
pub mod config;
pub mod controller;
pub mod frame;
pub mod health;
pub mod ingest;
pub mod result;
pub mod scheduler;
pub mod sink;
pub mod transport;
pub mod ui;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CaptionConfig, SourceSettings};
pub use controller::{forward_commands, CaptureController, Command};
pub use frame::{EncodeOptions, Frame, MAX_UPLOAD_BYTES, MIN_UPLOAD_BYTES};
pub use health::{
    HealthCadence, HealthMonitor, HealthProbe, HealthSnapshot, HttpHealthProbe, SharedHealth,
    WorkerState,
};
pub use ingest::{open_source, FrameSource, SnapshotSource, SyntheticSource};
pub use result::{CaptureResult, ErrorKind, FailureKind};
pub use scheduler::{
    CaptureSession, Delivery, LatencyWindow, PauseReason, ScheduleConfig, Scheduler,
    SchedulerState, SchedulerStats, SkipReason, Submission, TickOutcome, Trigger,
};
pub use sink::{CaptionUpdate, LogSink, MemorySink, ResultSink, SinkEvent, StatusBadge};
pub use transport::{
    CancelFlag, HttpTransport, HttpTransportConfig, RetryAttempt, RetryPolicy, RetryingTransport,
    SubmissionReport, Transport,
};
pub use ui::{ConsoleSink, UiMode};
