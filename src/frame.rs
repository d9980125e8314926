//! Encoded still images handed from a frame source to the transport.
//!
//! - `Frame`: one JPEG-encoded still with its dimensions and capture instant.
//! - `encode_rgb`: downscale + JPEG encode at the configured quality.
//!
//! The caption service rejects uploads outside `MIN_UPLOAD_BYTES..=MAX_UPLOAD_BYTES`,
//! so `Frame::from_jpeg` refuses them up front instead of burning retries.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::RgbImage;
use std::time::Instant;

/// Largest upload the caption service accepts.
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Anything smaller cannot be a real image.
pub const MIN_UPLOAD_BYTES: usize = 100;

/// The service resizes larger images to this bound anyway.
pub const DEFAULT_MAX_DIMENSION: u32 = 512;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// A JPEG still ready for upload. Bytes are immutable once built.
#[derive(Clone)]
pub struct Frame {
    jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Monotonic instant the source produced this frame.
    pub captured_at: Instant,
}

impl Frame {
    /// Wrap already-encoded JPEG bytes, enforcing the upload size limits.
    pub fn from_jpeg(jpeg: Vec<u8>, width: u32, height: u32, captured_at: Instant) -> Result<Self> {
        if jpeg.len() < MIN_UPLOAD_BYTES {
            return Err(anyhow!(
                "encoded frame too small ({} bytes, minimum {})",
                jpeg.len(),
                MIN_UPLOAD_BYTES
            ));
        }
        if jpeg.len() > MAX_UPLOAD_BYTES {
            return Err(anyhow!(
                "encoded frame too large ({} bytes, maximum {})",
                jpeg.len(),
                MAX_UPLOAD_BYTES
            ));
        }
        Ok(Self {
            jpeg,
            width,
            height,
            captured_at,
        })
    }

    /// Encode raw RGB8 pixels into a frame.
    pub fn encode(
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        options: EncodeOptions,
        captured_at: Instant,
    ) -> Result<Self> {
        let image = RgbImage::from_raw(width, height, pixels).ok_or_else(|| {
            anyhow!(
                "pixel buffer does not match {}x{} RGB dimensions",
                width,
                height
            )
        })?;
        let (jpeg, width, height) = encode_rgb(image, options)?;
        Self::from_jpeg(jpeg, width, height, captured_at)
    }

    pub fn jpeg(&self) -> &[u8] {
        &self.jpeg
    }

    pub fn byte_len(&self) -> usize {
        self.jpeg.len()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Payload bytes stay out of logs.
        f.debug_struct("Frame")
            .field("bytes", &self.jpeg.len())
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Encoding
// ----------------------------------------------------------------------------

/// JPEG encode settings applied by every frame source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EncodeOptions {
    /// JPEG quality, 1..=100.
    pub quality: u8,
    /// Longest side after downscaling.
    pub max_dimension: u32,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            quality: 80,
            max_dimension: DEFAULT_MAX_DIMENSION,
        }
    }
}

/// Downscale to fit `max_dimension` (aspect preserved) and JPEG-encode.
///
/// Returns the encoded bytes and the encoded dimensions.
pub fn encode_rgb(image: RgbImage, options: EncodeOptions) -> Result<(Vec<u8>, u32, u32)> {
    let image = fit_within(image, options.max_dimension);
    let (width, height) = image.dimensions();
    let mut jpeg = Vec::new();
    let quality = options.quality.clamp(1, 100);
    JpegEncoder::new_with_quality(&mut jpeg, quality)
        .encode_image(&image)
        .context("encode jpeg")?;
    Ok((jpeg, width, height))
}

/// Decode JPEG bytes into RGB8 (validates what a network source handed us).
pub fn decode_jpeg(bytes: &[u8]) -> Result<RgbImage> {
    let image = image::load_from_memory(bytes).context("decode jpeg")?;
    Ok(image.into_rgb8())
}

fn fit_within(image: RgbImage, max_dimension: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    let longest = width.max(height);
    if max_dimension == 0 || longest <= max_dimension {
        return image;
    }
    let scale = max_dimension as f64 / longest as f64;
    let new_width = ((width as f64 * scale).round() as u32).max(1);
    let new_height = ((height as f64 * scale).round() as u32).max(1);
    image::imageops::resize(&image, new_width, new_height, FilterType::Triangle)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
