//! Synthetic frame source (`stub://`).
//!
//! Generates a moving RGB pattern and encodes it like a real capture, so the
//! whole pipeline can run without a camera.

use anyhow::{anyhow, Result};
use std::time::Instant;

use super::FrameSource;
use crate::frame::{EncodeOptions, Frame};

/// Configuration for a synthetic source.
#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    /// `stub://` URL, used only as the source name.
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub encode: EncodeOptions,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            url: "stub://webcam".to_string(),
            width: 640,
            height: 480,
            encode: EncodeOptions::default(),
        }
    }
}

pub struct SyntheticSource {
    config: SyntheticConfig,
    connected: bool,
    frame_count: u64,
    /// Simulated scene; changes every so often so captions have something to vary on.
    scene_state: u8,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            connected: false,
            frame_count: 0,
            scene_state: 0,
        }
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    fn generate_pixels(&mut self) -> Result<Vec<u8>> {
        let pixel_count = rgb_buffer_len(self.config.width, self.config.height)?;

        if self.frame_count.is_multiple_of(10) {
            self.scene_state = self.scene_state.wrapping_add(37);
        }

        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 / 3 + self.frame_count * 4 + self.scene_state as u64) % 256) as u8;
        }
        Ok(pixels)
    }
}

/// Byte length of an RGB8 buffer, or an error if it does not fit in memory.
fn rgb_buffer_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|pixels| pixels.checked_mul(3))
        .ok_or_else(|| anyhow!("synthetic frame {}x{} is too large", width, height))
}

impl FrameSource for SyntheticSource {
    fn describe(&self) -> String {
        self.config.url.clone()
    }

    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        log::info!("SyntheticSource: connected to {}", self.config.url);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if !self.connected {
            return Err(anyhow!("synthetic source not connected; call connect() first"));
        }
        self.frame_count += 1;
        let pixels = self.generate_pixels()?;
        Frame::encode(
            pixels,
            self.config.width,
            self.config.height,
            self.config.encode,
            Instant::now(),
        )
    }

    fn release(&mut self) {
        if self.connected {
            log::info!("SyntheticSource: released {}", self.config.url);
        }
        self.connected = false;
    }

    fn is_healthy(&self) -> bool {
        self.connected
    }
}
