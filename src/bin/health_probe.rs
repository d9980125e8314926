//! health_probe - one-shot status check against the caption service
//!
//! Prints the health snapshot as JSON on stdout. Exits non-zero when the
//! service is unavailable or unreachable.

use anyhow::Result;
use clap::Parser;
use std::time::Duration;

use caption_relay::{CaptionConfig, HealthProbe, HealthSnapshot, HttpHealthProbe};

#[derive(Parser, Debug)]
#[command(author, version, about = "Query the caption service health endpoint")]
struct Args {
    /// Full health URL; defaults to the configured endpoint + health path
    #[arg(long, value_name = "URL")]
    url: Option<String>,
    /// Request timeout in milliseconds
    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u64>,
    /// Compact single-line JSON
    #[arg(long)]
    compact: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let cfg = CaptionConfig::load()?;
    let url = args.url.unwrap_or_else(|| cfg.health_url());
    let timeout = args
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(cfg.health_timeout);

    let mut probe = HttpHealthProbe::new(&url, timeout)?;
    let snapshot = match probe.probe() {
        Ok(snapshot) => snapshot,
        Err(err) => {
            log::warn!("health_probe: {:#}", err);
            HealthSnapshot::poll_failed()
        }
    };

    let json = if args.compact {
        serde_json::to_string(&snapshot)?
    } else {
        serde_json::to_string_pretty(&snapshot)?
    };
    println!("{json}");

    if !snapshot.available {
        std::process::exit(1);
    }
    Ok(())
}
