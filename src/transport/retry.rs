//! Retrying transport wrapper.
//!
//! One logical submission = up to `max_attempts` calls on the inner transport.
//! After failed attempt `n` the wrapper waits `retry_delay * n` before trying
//! again. Only transport failures consume the budget: deferred, budget and
//! inference outcomes pass through on the attempt that produced them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::Transport;
use crate::clock::Clock;
use crate::frame::Frame;
use crate::result::CaptureResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per submission, including the first. Treated as at least 1.
    pub max_attempts: u32,
    /// Backoff unit.
    pub retry_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            max_attempts,
            retry_delay,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Wait applied after failed attempt `attempt_number` (1-based).
    pub fn delay_after(&self, attempt_number: u32) -> Duration {
        self.retry_delay.saturating_mul(attempt_number)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(1_000))
    }
}

/// Transient record of one failed attempt and the backoff that followed it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryAttempt {
    pub attempt_number: u32,
    pub delay: Duration,
    pub error: String,
}

/// What one logical submission produced.
#[derive(Clone, Debug, PartialEq)]
pub struct SubmissionReport {
    pub result: CaptureResult,
    /// Calls made on the inner transport.
    pub attempts: u32,
    pub retries: Vec<RetryAttempt>,
    /// The submission was abandoned because the session is shutting down.
    pub cancelled: bool,
}

/// Shared stop signal checked between attempts.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct RetryingTransport {
    inner: Box<dyn Transport>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    cancel: CancelFlag,
}

impl RetryingTransport {
    pub fn new(inner: Box<dyn Transport>, policy: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner,
            policy,
            clock,
            cancel: CancelFlag::new(),
        }
    }

    /// Share an externally owned cancel flag (e.g. raised by a signal handler).
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run one logical submission. Never fails: every error ends up in the report.
    pub fn submit(&mut self, frame: &Frame) -> SubmissionReport {
        let max_attempts = self.policy.attempts();
        let mut retries = Vec::new();
        let mut last_error = String::from("no attempt made");

        for attempt in 1..=max_attempts {
            if self.cancel.is_cancelled() {
                log::debug!(
                    "{} submission cancelled before attempt {}",
                    self.inner.name(),
                    attempt
                );
                return SubmissionReport {
                    result: CaptureResult::transport_failure("submission cancelled"),
                    attempts: attempt - 1,
                    retries,
                    cancelled: true,
                };
            }

            let error = match classify(self.inner.submit(frame)) {
                Ok(result) => {
                    return SubmissionReport {
                        result,
                        attempts: attempt,
                        retries,
                        cancelled: false,
                    };
                }
                Err(error) => error,
            };

            log::warn!(
                "{} attempt {}/{} failed: {}",
                self.inner.name(),
                attempt,
                max_attempts,
                error
            );

            if attempt < max_attempts {
                let delay = self.policy.delay_after(attempt);
                retries.push(RetryAttempt {
                    attempt_number: attempt,
                    delay,
                    error: error.clone(),
                });
                self.clock.sleep(delay);
            }
            last_error = error;
        }

        SubmissionReport {
            result: CaptureResult::transport_failure(last_error),
            attempts: max_attempts,
            retries,
            cancelled: false,
        }
    }
}

/// `Ok` = final for this submission, `Err` = retryable failure message.
fn classify(outcome: anyhow::Result<CaptureResult>) -> Result<CaptureResult, String> {
    match outcome {
        Ok(result) => match result.kind() {
            Some(kind) if kind.is_retryable() => match result {
                CaptureResult::Failure { message, .. } => Err(message),
                other => Ok(other),
            },
            _ => Ok(result),
        },
        Err(err) => Err(format!("{:#}", err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::result::FailureKind;
    use anyhow::anyhow;
    use std::collections::VecDeque;
    use std::time::Instant;

    struct Scripted {
        outcomes: VecDeque<anyhow::Result<CaptureResult>>,
        calls: Arc<std::sync::atomic::AtomicU32>,
    }

    impl Transport for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn submit(&mut self, _frame: &Frame) -> anyhow::Result<CaptureResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcomes
                .pop_front()
                .unwrap_or_else(|| Err(anyhow!("script exhausted")))
        }
    }

    fn frame() -> Frame {
        Frame::from_jpeg(vec![0xAB; 256], 8, 8, Instant::now()).unwrap()
    }

    fn wrapper(
        outcomes: Vec<anyhow::Result<CaptureResult>>,
        clock: Arc<ManualClock>,
    ) -> (RetryingTransport, Arc<std::sync::atomic::AtomicU32>) {
        let calls = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let inner = Scripted {
            outcomes: outcomes.into(),
            calls: calls.clone(),
        };
        let transport = RetryingTransport::new(
            Box::new(inner),
            RetryPolicy::new(3, Duration::from_millis(500)),
            clock,
        );
        (transport, calls)
    }

    #[test]
    fn backoff_is_linear_in_attempt_number() {
        let policy = RetryPolicy::new(3, Duration::from_millis(500));
        assert_eq!(policy.delay_after(1), Duration::from_millis(500));
        assert_eq!(policy.delay_after(2), Duration::from_millis(1_000));
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).attempts(), 1);
    }

    #[test]
    fn inner_failure_results_are_retried() {
        let clock = Arc::new(ManualClock::new());
        let (mut transport, calls) = wrapper(
            vec![
                Ok(CaptureResult::transport_failure("connection reset")),
                Ok(CaptureResult::Success {
                    caption: "ok".to_string(),
                    processing_time_ms: None,
                }),
            ],
            clock.clone(),
        );

        let report = transport.submit(&frame());
        assert!(report.result.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(report.retries[0].error, "connection reset");
    }

    #[test]
    fn inference_failures_pass_through() {
        let clock = Arc::new(ManualClock::new());
        let (mut transport, calls) = wrapper(
            vec![Ok(CaptureResult::Failure {
                kind: FailureKind::Inference,
                message: "oom".to_string(),
            })],
            clock.clone(),
        );

        let report = transport.submit(&frame());
        assert_eq!(report.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn cancelled_flag_stops_before_next_attempt() {
        let clock = Arc::new(ManualClock::new());
        let (mut transport, calls) = wrapper(vec![], clock);
        transport.cancel_flag().cancel();

        let report = transport.submit(&frame());
        assert!(report.cancelled);
        assert_eq!(report.attempts, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
