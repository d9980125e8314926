//! HTTP snapshot frame source.
//!
//! Fetches one JPEG per frame from a camera's snapshot endpoint, decodes it to
//! make sure the device handed back a real image, then re-encodes it with the
//! configured quality and size bound.
//!
//! The snapshot source MUST NOT:
//! - Store fetched frames to disk
//! - Retain frames beyond handoff to the transport

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::time::{Duration, Instant};

use super::FrameSource;
use crate::frame::{decode_jpeg, encode_rgb, EncodeOptions, Frame, MAX_UPLOAD_BYTES};

/// Configuration for an HTTP snapshot source.
#[derive(Clone, Debug)]
pub struct SnapshotConfig {
    /// Snapshot URL, http(s)://.
    pub url: String,
    /// Per-fetch timeout.
    pub timeout: Duration,
    pub encode: EncodeOptions,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:81/capture".to_string(),
            timeout: Duration::from_secs(5),
            encode: EncodeOptions::default(),
        }
    }
}

pub struct SnapshotSource {
    config: SnapshotConfig,
    agent: Option<ureq::Agent>,
    frame_count: u64,
    last_error: Option<String>,
}

impl SnapshotSource {
    pub fn new(config: SnapshotConfig) -> Result<Self> {
        let url = url::Url::parse(&config.url).context("parse snapshot url")?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!(
                "unsupported snapshot scheme '{}'; expected http(s)",
                url.scheme()
            ));
        }
        Ok(Self {
            config,
            agent: None,
            frame_count: 0,
            last_error: None,
        })
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    fn fetch(&self, agent: &ureq::Agent) -> Result<Vec<u8>> {
        let response = agent
            .get(&self.config.url)
            .call()
            .with_context(|| format!("fetch jpeg snapshot from {}", self.config.url))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_UPLOAD_BYTES as u64 + 1)
            .read_to_end(&mut bytes)
            .context("read jpeg snapshot")?;
        if bytes.is_empty() {
            return Err(anyhow!("empty jpeg snapshot"));
        }
        if bytes.len() > MAX_UPLOAD_BYTES {
            return Err(anyhow!("jpeg snapshot exceeds {} bytes", MAX_UPLOAD_BYTES));
        }
        Ok(bytes)
    }
}

impl FrameSource for SnapshotSource {
    fn describe(&self) -> String {
        self.config.url.clone()
    }

    fn connect(&mut self) -> Result<()> {
        let agent = ureq::AgentBuilder::new()
            .timeout(self.config.timeout)
            .build();
        self.agent = Some(agent);
        self.last_error = None;
        log::info!("SnapshotSource: polling {}", self.config.url);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        let agent = self
            .agent
            .clone()
            .ok_or_else(|| anyhow!("snapshot source not connected; call connect() first"))?;

        let result = self.fetch(&agent).and_then(|bytes| {
            let image = decode_jpeg(&bytes)?;
            let (jpeg, width, height) = encode_rgb(image, self.config.encode)?;
            Frame::from_jpeg(jpeg, width, height, Instant::now())
        });

        match result {
            Ok(frame) => {
                self.frame_count += 1;
                self.last_error = None;
                Ok(frame)
            }
            Err(err) => {
                self.last_error = Some(err.to_string());
                Err(err)
            }
        }
    }

    fn release(&mut self) {
        if self.agent.take().is_some() {
            log::info!("SnapshotSource: released {}", self.config.url);
        }
    }

    fn is_healthy(&self) -> bool {
        self.agent.is_some() && self.last_error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_http_urls() {
        let config = SnapshotConfig {
            url: "udp://127.0.0.1:5000".to_string(),
            ..SnapshotConfig::default()
        };
        assert!(SnapshotSource::new(config).is_err());
    }

    #[test]
    fn requires_connect_before_capture() -> Result<()> {
        let mut source = SnapshotSource::new(SnapshotConfig::default())?;
        assert!(!source.is_healthy());
        assert!(source.next_frame().is_err());
        Ok(())
    }
}
