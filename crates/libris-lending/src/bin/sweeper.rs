//! # Overdue Sweeper
//!
//! Runs the overdue sweep against the configured database.
//!
//! ## Usage
//! ```bash
//! # Sweep every `sweep.interval_secs` until Ctrl-C
//! cargo run -p libris-lending --bin libris-sweeper
//!
//! # One pass, then exit (cron / systemd timer)
//! cargo run -p libris-lending --bin libris-sweeper -- --once
//!
//! # Explicit config file
//! cargo run -p libris-lending --bin libris-sweeper -- --config ./libris.toml
//! ```
//!
//! Log verbosity follows `RUST_LOG`.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use libris_db::migrations::migration_status;
use libris_lending::{retry_transient, LendingConfig, LendingEngine, RetryPolicy, SweepRunner};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,libris=debug,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn print_usage() {
    println!("Usage: libris-sweeper [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --once             Run a single sweep pass and exit");
    println!("  -c, --config PATH  Configuration file (default: platform config dir)");
    println!("  -h, --help         Print this help");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let mut once = false;
    let mut config_path: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--once" => once = true,
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                print_usage();
                return Ok(());
            }
            other => {
                eprintln!("Unknown argument: {other}");
                print_usage();
                std::process::exit(2);
            }
        }
        i += 1;
    }

    init_tracing();

    let config = LendingConfig::load(config_path)?;
    let retry = RetryPolicy::from(&config.retry);
    let engine = Arc::new(LendingEngine::from_config(&config).await?);

    let (embedded, applied) = migration_status(engine.db().pool()).await?;
    info!(
        db = %config.database.path.display(),
        embedded,
        applied,
        "Sweeper starting"
    );

    if once {
        let report = retry_transient(retry, || engine.run_sweep()).await?;
        info!(
            scanned = report.scanned,
            flagged = report.flagged,
            blacklisted = report.blacklisted,
            failed = report.failed,
            "Sweep complete"
        );
        engine.db().close().await;
        return Ok(());
    }

    if !config.sweep.enabled {
        warn!("Periodic sweep disabled in config; use --once for a single pass");
        return Ok(());
    }

    let (runner, handle) = SweepRunner::new(engine.clone(), config.sweep_interval());
    let task = tokio::spawn(runner.run());

    tokio::signal::ctrl_c().await?;
    info!("Interrupt received, stopping sweeper");

    handle.shutdown().await;
    task.await?;
    engine.db().close().await;

    Ok(())
}
