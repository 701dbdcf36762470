//! shelfscand - perception-to-inventory daemon
//!
//! This daemon:
//! 1. Opens the inventory document
//! 2. Starts frame capture and the detection/tracking loop
//! 3. Serves the inventory API until Ctrl-C

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use shelfscan::{
    api::{ApiConfig, ApiServer},
    BackendRegistry, Pipeline, ShelfscanConfig,
};

const HEALTH_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "shelfscand", about = "Track shelf items and log them to inventory")]
struct Args {
    /// JSON config file (overrides SHELFSCAN_CONFIG)
    #[arg(long)]
    config: Option<PathBuf>,

    /// List compiled-in tracking backends and exit
    #[arg(long)]
    list_backends: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let backends = BackendRegistry::with_builtin();
    if args.list_backends {
        for name in backends.list() {
            println!("{}", name);
        }
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => ShelfscanConfig::load_from(Some(path.as_path()))?,
        None => ShelfscanConfig::load()?,
    };
    log::info!(
        "shelfscand {} starting (inventory={}, camera={}, backend={})",
        env!("CARGO_PKG_VERSION"),
        config.inventory_path.display(),
        config.camera.device,
        config.tracking.backend
    );

    let pipeline = Pipeline::start(&config, &backends)?;
    if !pipeline.source_available() {
        log::warn!("shelfscand: camera unavailable; serving inventory without perception");
    }

    let api_config = ApiConfig {
        addr: config.api_addr.clone(),
    };
    let api_handle = ApiServer::new(api_config, pipeline.service()).spawn()?;
    log::info!("shelfscand running. api on {}", api_handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!("shelfscand waiting for shutdown signal (Ctrl-C)...");
    loop {
        match rx.recv_timeout(HEALTH_INTERVAL) {
            Err(RecvTimeoutError::Timeout) => log::info!("health: {}", pipeline.health_line()),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;
    pipeline.stop()?;
    Ok(())
}
