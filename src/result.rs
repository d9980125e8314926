use serde::Serialize;
use std::fmt;

/// Outcome of one logical submission.
///
/// Produced once by the retrying transport (or by the controller when the
/// frame source fails) and consumed once by the scheduler's routing step.
#[derive(Clone, Debug, PartialEq)]
pub enum CaptureResult {
    /// The service produced a caption.
    Success {
        caption: String,
        /// Processing time reported by the service, if it reported one.
        processing_time_ms: Option<u64>,
    },
    /// The service is still warming up; no caption yet.
    Deferred { reason: String },
    /// A cost or quota ceiling was hit on the service side.
    BudgetExceeded,
    /// Terminal failure for this frame.
    Failure { kind: FailureKind, message: String },
}

/// Where a `CaptureResult::Failure` came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// Network or HTTP-level failure that survived every retry.
    Transport,
    /// The frame source produced nothing usable. Never retried.
    CaptureDevice,
    /// The service answered but reported that caption generation failed.
    Inference,
}

/// Error taxonomy shared by results, logs, health snapshots and the status badge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TransportFailure,
    ServiceWarmingUp,
    BudgetExceeded,
    CaptureDeviceFailure,
    InferenceFailure,
    HealthPollFailure,
}

impl CaptureResult {
    pub fn transport_failure(message: impl Into<String>) -> Self {
        Self::Failure {
            kind: FailureKind::Transport,
            message: message.into(),
        }
    }

    pub fn device_failure(message: impl Into<String>) -> Self {
        Self::Failure {
            kind: FailureKind::CaptureDevice,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Taxonomy entry for non-success outcomes.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Success { .. } => None,
            Self::Deferred { .. } => Some(ErrorKind::ServiceWarmingUp),
            Self::BudgetExceeded => Some(ErrorKind::BudgetExceeded),
            Self::Failure { kind, .. } => Some(kind.error_kind()),
        }
    }
}

impl FailureKind {
    pub fn error_kind(self) -> ErrorKind {
        match self {
            Self::Transport => ErrorKind::TransportFailure,
            Self::CaptureDevice => ErrorKind::CaptureDeviceFailure,
            Self::Inference => ErrorKind::InferenceFailure,
        }
    }
}

impl ErrorKind {
    /// Only these kinds are worth trying again for the same frame.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::TransportFailure)
    }

    /// Warming up and budget exhaustion are policy states, not faults.
    pub fn is_error(self) -> bool {
        !matches!(self, Self::ServiceWarmingUp | Self::BudgetExceeded)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::TransportFailure => "transport failure",
            Self::ServiceWarmingUp => "service warming up",
            Self::BudgetExceeded => "budget exceeded",
            Self::CaptureDeviceFailure => "capture device failure",
            Self::InferenceFailure => "inference failure",
            Self::HealthPollFailure => "health poll failure",
        };
        f.write_str(label)
    }
}
