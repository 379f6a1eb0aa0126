// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of FleetLink.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! FleetLink Supervisor - entry point
//!
//! Runs fleet passes on an interval until Ctrl-C or SIGTERM, then flushes
//! the record store and exits.

use clap::Parser;
use fleetlink_dfu::Radio;
use fleetlink_supervisor::{Runtime, SupervisorConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "fleetlink", version, about = "Keeps a fleet of BLE nodes provisioned and up to date")]
struct Cli {
    /// Configuration file (.toml, anything else is read as JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run one pass per application, then exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fleetlink=debug".parse()?)
                .add_directive("fleetlink_core=debug".parse()?)
                .add_directive("fleetlink_dfu=debug".parse()?),
        )
        .init();

    let cli = Cli::parse();
    info!("Starting FleetLink {}", env!("CARGO_PKG_VERSION"));

    let config = SupervisorConfig::load(cli.config.as_deref())?;
    info!(
        "Loaded config: api={}, data_dir={}, interval={}s",
        config.api_base_url,
        config.data_dir.display(),
        config.pass_interval_secs
    );

    let radio = open_radio().await?;
    let runtime = Runtime::build(config, radio).await?;

    let shutdown = Arc::new(Notify::new());
    tokio::spawn(wait_for_signal(Arc::clone(&shutdown)));

    runtime.run(shutdown, cli.once).await?;
    info!("Shutting down");
    Ok(())
}

#[cfg(feature = "btleplug")]
async fn open_radio() -> anyhow::Result<Arc<dyn Radio>> {
    let radio = fleetlink_dfu::radio::btle::BtleRadio::first_adapter().await?;
    info!("Using Bluetooth adapter");
    Ok(Arc::new(radio))
}

#[cfg(not(feature = "btleplug"))]
async fn open_radio() -> anyhow::Result<Arc<dyn Radio>> {
    warn!("Built without the btleplug feature, Bluetooth applications will fail their scans");
    Ok(Arc::new(fleetlink_dfu::radio::UnsupportedRadio::new(
        "bluetooth",
    )))
}

async fn wait_for_signal(shutdown: Arc<Notify>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Ctrl-C received"),
                    _ = sigterm.recv() => info!("SIGTERM received"),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {e}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl-C received");
    }
    shutdown.notify_one();
}
