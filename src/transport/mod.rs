//! Transport layer for caption submissions.
//!
//! - `Transport`: one network call per `submit`, no retries.
//! - `HttpTransport`: multipart upload to the caption endpoint.
//! - `RetryingTransport`: bounded retry with linear backoff, folding every
//!   failure into a `CaptureResult` so callers never see an error.

use anyhow::Result;

use crate::frame::Frame;
use crate::result::CaptureResult;

pub mod http;
mod multipart;
pub mod retry;

pub use http::{interpret_caption_response, HttpTransport, HttpTransportConfig};
pub use multipart::MultipartBody;
pub use retry::{CancelFlag, RetryAttempt, RetryPolicy, RetryingTransport, SubmissionReport};

/// A single network call carrying one frame.
///
/// `Err` is a transport-level failure (network error, unexpected HTTP status,
/// unreadable body) and counts against the retry budget. `Ok` carries whatever
/// the service decided, including policy outcomes that must not be retried.
pub trait Transport: Send {
    /// Transport identifier for logs.
    fn name(&self) -> &'static str;

    fn submit(&mut self, frame: &Frame) -> Result<CaptureResult>;
}
