//! captiond - live caption client
//!
//! Samples stills from the configured frame source, uploads them to the
//! caption service and renders the latest caption on the terminal.
//!
//! Console commands (one per line): c = capture now, p = pause, r = resume,
//! h = hide, s = show, q = quit. Ctrl-C also quits.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};

use caption_relay::{
    forward_commands, CaptionConfig, CaptureController, Command, ConsoleSink, SystemClock,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Live frame captioning client")]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension)
    #[arg(long, env = "CAPTION_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,
    /// UI mode for the status line (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
    /// Ignore stdin; only Ctrl-C stops the client
    #[arg(long)]
    no_stdin: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let cfg = CaptionConfig::load_from(args.config.as_deref())?;
    log::info!(
        "captiond: endpoint={} source={} interval={}ms min_spacing={}ms",
        cfg.endpoint,
        cfg.source.url,
        cfg.interval.as_millis(),
        cfg.min_spacing.as_millis()
    );

    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let sink = ConsoleSink::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let mut controller =
        CaptureController::from_config(&cfg, Box::new(sink), Arc::new(SystemClock))?;

    let (tx, rx) = mpsc::channel();
    let cancel = controller.cancel_flag();
    let signal_tx = tx.clone();
    ctrlc::set_handler(move || {
        cancel.cancel();
        let _ = signal_tx.send(Command::Stop);
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    if !args.no_stdin {
        let cancel = controller.cancel_flag();
        std::thread::spawn(move || forward_commands(std::io::stdin().lock(), &tx, &cancel));
    } else {
        drop(tx);
    }

    controller.run(&rx)?;

    let stats = controller.stats();
    log::info!(
        "captiond: {} captions, {} deferred, {} over budget, {} failures, {} late results dropped",
        stats.successes,
        stats.deferred,
        stats.budget_exceeded,
        stats.failures,
        stats.dropped_late
    );
    Ok(())
}
