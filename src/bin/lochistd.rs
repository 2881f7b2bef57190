//! lochistd: runs the capture pipeline until terminated.
//!
//! CLI surface only - config parsing, start-up, and shutdown wiring. The
//! HTTP/SSE host that serves history to a browser is a separate,
//! external process; this binary only needs to keep the core alive and
//! stop it cleanly on SIGINT/SIGTERM.

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use lochist::{Config, LoggingNotifier, Service};

const DEFAULT_CONFIG_PATH: &str = "./lochist.json";

fn main() -> Result<()> {
    let config_path = parse_config_arg();
    let config = Config::load(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    println!(
        "lochist: watching {} group(s), store at {}",
        config.groups.len(),
        config.db_path.display()
    );

    let service = Service::start(config, Arc::new(LoggingNotifier))?;
    let shutdown = service.shutdown_flag();

    #[cfg(unix)]
    {
        use signal_hook::consts::signal;
        use signal_hook::iterator::Signals;

        let shutdown_clone = Arc::clone(&shutdown);
        let mut signals = Signals::new([signal::SIGTERM, signal::SIGINT])
            .context("registering signal handlers")?;
        std::thread::spawn(move || {
            for _ in &mut signals {
                shutdown_clone.store(true, Ordering::SeqCst);
                break;
            }
        });
    }

    while !shutdown.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
    }

    println!("lochist: shutting down");
    service.shutdown();
    Ok(())
}

fn parse_config_arg() -> PathBuf {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            if let Some(path) = args.next() {
                return PathBuf::from(path);
            }
        } else if let Some(path) = arg.strip_prefix("--config=") {
            return PathBuf::from(path);
        }
    }
    PathBuf::from(DEFAULT_CONFIG_PATH)
}
