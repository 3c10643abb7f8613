//! Backend Availability Monitor Binary

use backend_monitor::{
    banner_line, classify, BackendStatus, BackendStatusChecker, Config, HealthProbe,
    HttpHealthProbe, MonitorError, Result, StatusMirror, StatusSnapshot,
};
use chrono::Utc;
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "backend_monitor", version, about = "Watch grading backend availability")]
struct Args {
    /// Base URL of the grading backend
    #[arg(long, env = "BACKEND_URL")]
    base_url: Option<String>,

    /// Probe once, print the status snapshot as JSON and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    initialize_tracing();

    let args = Args::parse();

    let mut config = Config::from_env();
    if let Some(base_url) = args.base_url {
        config.base_url = base_url.trim_end_matches('/').to_string();
    }

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        std::process::exit(1);
    }

    let probe = HttpHealthProbe::from_config(&config)?;

    if args.once {
        let online = probe_once(&probe).await?;
        std::process::exit(if online { 0 } else { 1 });
    }

    info!(
        "Starting backend monitor v{} - Backend: {}, poll every {}s",
        env!("CARGO_PKG_VERSION"),
        config.health_url(),
        config.poll_interval.as_secs()
    );

    let mirror = StatusMirror::global();
    let checker = BackendStatusChecker::mount(&config, Arc::new(probe), &mirror)?;
    let mut updates = mirror.subscribe();

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let latest = updates.borrow_and_update().clone();
                if let Some(snapshot) = latest {
                    match banner_line(snapshot.status, snapshot.error.as_deref()) {
                        Some(banner) => warn!(
                            "Status mirror: {} at {} - {}",
                            snapshot.status,
                            snapshot.last_checked.to_rfc3339(),
                            banner
                        ),
                        None => info!(
                            "Status mirror: {} at {}",
                            snapshot.status,
                            snapshot.last_checked.to_rfc3339()
                        ),
                    }
                    if snapshot.status.is_terminal() {
                        info!("Waiting for next periodic check or a manual retry");
                    }
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.map_err(|e| {
                    MonitorError::Other(format!("Failed to wait for shutdown signal: {}", e))
                })?;
                break;
            }
        }
    }

    info!("Shutting down backend monitor");
    checker.unmount().await;
    Ok(())
}

/// Single classified probe printed as a status snapshot
async fn probe_once(probe: &HttpHealthProbe) -> Result<bool> {
    let verdict = classify(&probe.probe().await);
    let status = verdict.resulting_status();

    let snapshot = StatusSnapshot {
        status,
        last_checked: Utc::now(),
        error: verdict.detail().map(str::to_string),
    };

    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(status == BackendStatus::Online)
}

/// Initialize structured logging
fn initialize_tracing() {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .json();

    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&log_level))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}
