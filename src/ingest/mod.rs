//! Frame sources.
//!
//! A frame source produces one encoded still on demand from a live feed:
//! - Synthetic source (`stub://`) for demos and tests
//! - HTTP snapshot source (`http://`, `https://`) for cameras exposing a JPEG endpoint
//!
//! The capture controller owns exactly one source for the lifetime of a
//! session: `connect()` runs on start, `release()` on stop. A source error is
//! reported as a capture device failure and never retried for that frame.

use anyhow::{anyhow, Result};

use crate::frame::{EncodeOptions, Frame};

pub mod snapshot;
pub mod synthetic;

pub use snapshot::{SnapshotConfig, SnapshotSource};
pub use synthetic::{SyntheticConfig, SyntheticSource};

/// Producer of still images from a live feed.
pub trait FrameSource: Send {
    /// Source identifier for logs.
    fn describe(&self) -> String;

    /// Acquire the underlying feed.
    fn connect(&mut self) -> Result<()>;

    /// Produce the next still. An error means the device gave us nothing usable.
    fn next_frame(&mut self) -> Result<Frame>;

    /// Release the underlying feed. Must be safe to call more than once.
    fn release(&mut self);

    /// True while the feed is acquired and producing.
    fn is_healthy(&self) -> bool;
}

/// Build a source from its URL scheme.
pub fn open_source(
    url: &str,
    width: u32,
    height: u32,
    encode: EncodeOptions,
) -> Result<Box<dyn FrameSource>> {
    if url.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(SyntheticConfig {
            url: url.to_string(),
            width,
            height,
            encode,
        })));
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        return Ok(Box::new(SnapshotSource::new(SnapshotConfig {
            url: url.to_string(),
            encode,
            ..SnapshotConfig::default()
        })?));
    }
    Err(anyhow!(
        "unsupported frame source '{}'; expected stub:// or http(s)://",
        url
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_source_dispatches_on_scheme() -> Result<()> {
        let source = open_source("stub://desk", 64, 48, EncodeOptions::default())?;
        assert_eq!(source.describe(), "stub://desk");

        let source = open_source(
            "http://127.0.0.1:81/capture",
            64,
            48,
            EncodeOptions::default(),
        )?;
        assert_eq!(source.describe(), "http://127.0.0.1:81/capture");

        assert!(open_source("v4l2:///dev/video0", 64, 48, EncodeOptions::default()).is_err());
        Ok(())
    }
}
