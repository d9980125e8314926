use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::frame::{EncodeOptions, DEFAULT_MAX_DIMENSION};
use crate::scheduler::{ScheduleConfig, DEFAULT_LATENCY_WINDOW};
use crate::transport::{HttpTransportConfig, RetryPolicy};

const DEFAULT_INTERVAL_MS: u64 = 3_000;
const DEFAULT_MIN_SPACING_MS: u64 = 2_000;
const DEFAULT_IMAGE_QUALITY: u8 = 80;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;
const DEFAULT_HEALTH_INTERVAL_MS: u64 = 30_000;
const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8000";
const DEFAULT_CAPTION_PATH: &str = "/caption";
const DEFAULT_HEALTH_PATH: &str = "/health";
const DEFAULT_UPLOAD_FIELD: &str = "file";
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_HEALTH_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_SOURCE_URL: &str = "stub://webcam";
const DEFAULT_SOURCE_WIDTH: u32 = 640;
const DEFAULT_SOURCE_HEIGHT: u32 = 480;
const MAX_SOURCE_DIMENSION: u32 = 8_192;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CaptionConfigFile {
    interval_ms: Option<u64>,
    min_spacing_ms: Option<u64>,
    image_quality: Option<u8>,
    max_retries: Option<u32>,
    retry_delay_ms: Option<u64>,
    health_check_interval_ms: Option<u64>,
    endpoint: Option<String>,
    caption_path: Option<String>,
    health_path: Option<String>,
    upload_field: Option<String>,
    prompt: Option<String>,
    request_timeout_ms: Option<u64>,
    health_timeout_ms: Option<u64>,
    max_dimension: Option<u32>,
    latency_window: Option<usize>,
    source: Option<SourceConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SourceConfigFile {
    url: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct CaptionConfig {
    pub interval: Duration,
    pub min_spacing: Duration,
    pub image_quality: u8,
    /// Total attempts per submission.
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub health_check_interval: Duration,
    pub endpoint: String,
    pub caption_path: String,
    pub health_path: String,
    pub upload_field: String,
    pub prompt: Option<String>,
    pub request_timeout: Duration,
    pub health_timeout: Duration,
    pub max_dimension: u32,
    pub latency_window: usize,
    pub source: SourceSettings,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub url: String,
    pub width: u32,
    pub height: u32,
}

impl Default for CaptionConfig {
    fn default() -> Self {
        Self::from_file(CaptionConfigFile::default())
    }
}

impl CaptionConfig {
    /// File named by `CAPTION_CONFIG` (if any), then env overrides, then validation.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CAPTION_CONFIG").ok();
        Self::load_from(
            config_path
                .as_deref()
                .filter(|path| !path.trim().is_empty())
                .map(Path::new),
        )
    }

    /// Same as `load` with an explicit config file.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: CaptionConfigFile) -> Self {
        let source = file.source.unwrap_or_default();
        Self {
            interval: Duration::from_millis(file.interval_ms.unwrap_or(DEFAULT_INTERVAL_MS)),
            min_spacing: Duration::from_millis(
                file.min_spacing_ms.unwrap_or(DEFAULT_MIN_SPACING_MS),
            ),
            image_quality: file.image_quality.unwrap_or(DEFAULT_IMAGE_QUALITY),
            max_retries: file.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            retry_delay: Duration::from_millis(
                file.retry_delay_ms.unwrap_or(DEFAULT_RETRY_DELAY_MS),
            ),
            health_check_interval: Duration::from_millis(
                file.health_check_interval_ms
                    .unwrap_or(DEFAULT_HEALTH_INTERVAL_MS),
            ),
            endpoint: file
                .endpoint
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            caption_path: file
                .caption_path
                .unwrap_or_else(|| DEFAULT_CAPTION_PATH.to_string()),
            health_path: file
                .health_path
                .unwrap_or_else(|| DEFAULT_HEALTH_PATH.to_string()),
            upload_field: file
                .upload_field
                .unwrap_or_else(|| DEFAULT_UPLOAD_FIELD.to_string()),
            prompt: file.prompt.filter(|prompt| !prompt.trim().is_empty()),
            request_timeout: Duration::from_millis(
                file.request_timeout_ms
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS),
            ),
            health_timeout: Duration::from_millis(
                file.health_timeout_ms.unwrap_or(DEFAULT_HEALTH_TIMEOUT_MS),
            ),
            max_dimension: file.max_dimension.unwrap_or(DEFAULT_MAX_DIMENSION),
            latency_window: file.latency_window.unwrap_or(DEFAULT_LATENCY_WINDOW),
            source: SourceSettings {
                url: source
                    .url
                    .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
                width: source.width.unwrap_or(DEFAULT_SOURCE_WIDTH),
                height: source.height.unwrap_or(DEFAULT_SOURCE_HEIGHT),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(ms) = env_number::<u64>("CAPTION_INTERVAL_MS")? {
            self.interval = Duration::from_millis(ms);
        }
        if let Some(ms) = env_number::<u64>("CAPTION_MIN_SPACING_MS")? {
            self.min_spacing = Duration::from_millis(ms);
        }
        if let Some(quality) = env_number::<u8>("CAPTION_IMAGE_QUALITY")? {
            self.image_quality = quality;
        }
        if let Some(retries) = env_number::<u32>("CAPTION_MAX_RETRIES")? {
            self.max_retries = retries;
        }
        if let Some(ms) = env_number::<u64>("CAPTION_RETRY_DELAY_MS")? {
            self.retry_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = env_number::<u64>("CAPTION_HEALTH_INTERVAL_MS")? {
            self.health_check_interval = Duration::from_millis(ms);
        }
        if let Ok(endpoint) = std::env::var("CAPTION_ENDPOINT") {
            if !endpoint.trim().is_empty() {
                self.endpoint = endpoint.trim().to_string();
            }
        }
        if let Ok(prompt) = std::env::var("CAPTION_PROMPT") {
            if !prompt.trim().is_empty() {
                self.prompt = Some(prompt);
            }
        }
        if let Ok(url) = std::env::var("CAPTION_SOURCE_URL") {
            if !url.trim().is_empty() {
                self.source.url = url.trim().to_string();
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        for (name, value) in [
            ("interval_ms", self.interval),
            ("health_check_interval_ms", self.health_check_interval),
            ("request_timeout_ms", self.request_timeout),
            ("health_timeout_ms", self.health_timeout),
        ] {
            if value.is_zero() {
                return Err(anyhow!("{} must be greater than zero", name));
            }
        }
        if !(1..=100).contains(&self.image_quality) {
            return Err(anyhow!(
                "image_quality must be within 1..=100, got {}",
                self.image_quality
            ));
        }
        if self.max_retries == 0 {
            return Err(anyhow!("max_retries must be at least 1 (it counts total attempts)"));
        }
        if self.latency_window == 0 {
            return Err(anyhow!("latency_window must be at least 1"));
        }
        if self.max_dimension == 0 {
            return Err(anyhow!("max_dimension must be greater than zero"));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("source dimensions must be non-zero"));
        }
        if self.source.width > MAX_SOURCE_DIMENSION || self.source.height > MAX_SOURCE_DIMENSION {
            return Err(anyhow!(
                "source dimensions {}x{} exceed the {} px limit",
                self.source.width,
                self.source.height,
                MAX_SOURCE_DIMENSION
            ));
        }
        if self.upload_field.trim().is_empty() {
            return Err(anyhow!("upload_field must not be empty"));
        }

        let endpoint = url::Url::parse(&self.endpoint)
            .map_err(|e| anyhow!("invalid endpoint '{}': {}", self.endpoint, e))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(anyhow!(
                "endpoint must be an http(s) URL, got '{}'",
                self.endpoint
            ));
        }
        self.endpoint = self.endpoint.trim_end_matches('/').to_string();
        self.caption_path = normalize_path(&self.caption_path);
        self.health_path = normalize_path(&self.health_path);
        Ok(())
    }

    pub fn caption_url(&self) -> String {
        join_endpoint(&self.endpoint, &self.caption_path)
    }

    pub fn health_url(&self) -> String {
        join_endpoint(&self.endpoint, &self.health_path)
    }

    pub fn encode_options(&self) -> EncodeOptions {
        EncodeOptions {
            quality: self.image_quality,
            max_dimension: self.max_dimension,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.retry_delay)
    }

    pub fn schedule(&self) -> ScheduleConfig {
        ScheduleConfig {
            interval: self.interval,
            min_spacing: self.min_spacing,
            latency_window: self.latency_window,
        }
    }

    pub fn http_transport(&self) -> HttpTransportConfig {
        HttpTransportConfig {
            caption_url: self.caption_url(),
            upload_field: self.upload_field.clone(),
            prompt: self.prompt.clone(),
            timeout: self.request_timeout,
        }
    }
}

fn read_config_file(path: &Path) -> Result<CaptionConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg: CaptionConfigFile = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_number<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a non-negative integer, got '{}'", key, value)),
        _ => Ok(None),
    }
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

fn join_endpoint(endpoint: &str, path: &str) -> String {
    format!("{}{}", endpoint.trim_end_matches('/'), path)
}
