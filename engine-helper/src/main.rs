//! Stand-in Voice engine.
//!
//! Serves a simulated device set over the controller's JSON-lines protocol so
//! `voice-ctl` and the controller tests can run without the real engine.

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, LevelFilter};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use voice_controller::channel::{serve, InMemoryBackend};
use voice_controller::logging;

#[derive(Parser, Debug)]
#[command(name = "voice-engine-helper", version, about = "Simulated Voice audio engine")]
struct Args {
    /// Address to accept controller connections on
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: String,

    /// Start with the session already running
    #[arg(long)]
    running: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(if args.verbose { LevelFilter::Debug } else { LevelFilter::Info });
    logging::setup_panic_hook();

    let engine = InMemoryBackend::with_demo_devices();
    if args.running {
        engine.set_running(true);
    }
    for device in engine.devices().iter() {
        info!(
            "Device: {} [{}]{}{}",
            device.name,
            device.device_type,
            if device.active { " active" } else { "" },
            if device.default { " default" } else { "" }
        );
    }

    let listener = TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("Failed to bind {}", args.listen))?;

    let shutdown = CancellationToken::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
        }
        ctrl_c.cancel();
    });

    serve(listener, Arc::new(engine), shutdown)
        .await
        .context("Engine listener failed")
}
