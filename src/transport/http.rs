//! HTTP caption transport.
//!
//! One `POST {caption_url}` per attempt, body `multipart/form-data` with a
//! single JPEG part. The service answers with
//! `{success?, caption?, processing_time?, error?, status?}`; FastAPI-style
//! error bodies carry `{detail}`.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::time::Duration;

use super::{MultipartBody, Transport};
use crate::frame::Frame;
use crate::result::{CaptureResult, FailureKind};

/// Largest response body we are willing to buffer.
const MAX_RESPONSE_BYTES: u64 = 1024 * 1024;

#[derive(Clone, Debug)]
pub struct HttpTransportConfig {
    /// Full caption endpoint URL.
    pub caption_url: String,
    /// Multipart field name for the image part.
    pub upload_field: String,
    /// Optional prompt, sent as the `prompt` query parameter.
    pub prompt: Option<String>,
    /// Per-attempt timeout.
    pub timeout: Duration,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            caption_url: "http://127.0.0.1:8000/caption".to_string(),
            upload_field: "file".to_string(),
            prompt: None,
            timeout: Duration::from_secs(30),
        }
    }
}

pub struct HttpTransport {
    config: HttpTransportConfig,
    agent: ureq::Agent,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Result<Self> {
        let url = url::Url::parse(&config.caption_url).context("parse caption url")?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!(
                "caption endpoint must be http(s), got '{}'",
                url.scheme()
            ));
        }
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        Ok(Self { config, agent })
    }
}

impl Transport for HttpTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    fn submit(&mut self, frame: &Frame) -> Result<CaptureResult> {
        let (content_type, body) = MultipartBody::new()
            .file(&self.config.upload_field, "frame.jpg", "image/jpeg", frame.jpeg())
            .finish();

        let mut request = self
            .agent
            .post(&self.config.caption_url)
            .set("Content-Type", &content_type)
            .set("Accept", "application/json");
        if let Some(prompt) = self.config.prompt.as_deref() {
            request = request.query("prompt", prompt);
        }

        match request.send_bytes(&body) {
            Ok(response) => {
                let status = response.status();
                let text = read_body(response)?;
                interpret_caption_response(status, &text)
            }
            Err(ureq::Error::Status(status, response)) => {
                let text = read_body(response).unwrap_or_default();
                interpret_caption_response(status, &text)
            }
            Err(ureq::Error::Transport(err)) => {
                Err(anyhow!("caption request to {} failed: {}", self.config.caption_url, err))
            }
        }
    }
}

fn read_body(response: ureq::Response) -> Result<String> {
    use std::io::Read;

    let mut text = String::new();
    response
        .into_reader()
        .take(MAX_RESPONSE_BYTES)
        .read_to_string(&mut text)
        .context("read caption response body")?;
    Ok(text)
}

#[derive(Debug, Default, Deserialize)]
struct CaptionResponse {
    success: Option<bool>,
    caption: Option<String>,
    /// Seconds.
    processing_time: Option<f64>,
    error: Option<String>,
    status: Option<String>,
    detail: Option<serde_json::Value>,
}

impl CaptionResponse {
    fn message(&self) -> Option<String> {
        if let Some(error) = &self.error {
            return Some(error.clone());
        }
        match &self.detail {
            Some(serde_json::Value::String(detail)) => Some(detail.clone()),
            Some(other) => Some(other.to_string()),
            None => None,
        }
    }
}

/// Map an HTTP status and body onto a submission outcome.
///
/// - 503: the model is still loading -> `Deferred`
/// - 402, 429: quota or budget ceiling -> `BudgetExceeded`
/// - any other non-2xx: transport failure (`Err`, retried)
/// - 2xx with `success: false`: `Failure{Inference}` (not retried)
/// - 2xx with `status: "loading"`: `Deferred`
/// - 2xx with a caption: `Success`
/// - 2xx that does not parse: transport failure
pub fn interpret_caption_response(status: u16, body: &str) -> Result<CaptureResult> {
    let parsed: Option<CaptionResponse> = serde_json::from_str(body).ok();

    match status {
        503 => {
            let reason = parsed
                .as_ref()
                .and_then(CaptionResponse::message)
                .unwrap_or_else(|| "model not ready".to_string());
            return Ok(CaptureResult::Deferred { reason });
        }
        402 | 429 => return Ok(CaptureResult::BudgetExceeded),
        200..=299 => {}
        _ => {
            let detail = parsed
                .as_ref()
                .and_then(CaptionResponse::message)
                .unwrap_or_else(|| truncate(body, 200));
            return Err(anyhow!("caption endpoint returned HTTP {}: {}", status, detail));
        }
    }

    let response = parsed.ok_or_else(|| anyhow!("caption endpoint returned unparseable body"))?;

    if response.success == Some(false) {
        let message = response
            .message()
            .unwrap_or_else(|| "caption generation failed".to_string());
        return Ok(CaptureResult::Failure {
            kind: FailureKind::Inference,
            message,
        });
    }

    if matches!(response.status.as_deref(), Some("loading") | Some("starting")) {
        return Ok(CaptureResult::Deferred {
            reason: response
                .message()
                .unwrap_or_else(|| "model loading".to_string()),
        });
    }

    match response.caption {
        Some(caption) => Ok(CaptureResult::Success {
            caption: caption.trim().to_string(),
            processing_time_ms: response
                .processing_time
                .filter(|secs| secs.is_finite() && *secs >= 0.0)
                .map(|secs| (secs * 1000.0).round() as u64),
        }),
        None => Err(anyhow!("caption endpoint returned no caption")),
    }
}

fn truncate(body: &str, max_chars: usize) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= max_chars {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}
