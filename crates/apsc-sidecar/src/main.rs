//! Active/passive sidecar
//!
//! Runs next to an application container and labels its pod active while it
//! holds the group's lease.

use anyhow::Result;
use apsc_sidecar::{shutdown, Args, KubeLeaseLock, KubePodStore, SideCar, SidecarError};
use clap::Parser;
use kube::Client;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug { "debug" } else { "info" };
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(format!(
                    "apsc_sidecar={},kube={}",
                    log_level, log_level
                ))
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting active/passive sidecar");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(args).await {
        error!("{}", e);
        std::process::exit(1);
    }

    info!("Sidecar stopped");
    Ok(())
}

async fn run(args: Args) -> apsc_sidecar::Result<()> {
    let config = args.into_config()?;
    let client = Client::try_default().await?;

    let store = KubePodStore::new(client.clone(), &config.namespace, &config.pod_name);
    let sidecar = Arc::new(SideCar::new(config, store));

    let signals = shutdown::spawn_signal_handler(sidecar.clone())?;

    sidecar.build_lock().await?;
    let elected = sidecar
        .run_leader_election(|descriptor, election| {
            KubeLeaseLock::new(client.clone(), descriptor.clone(), election.lease_duration)
        })
        .await;

    // once a demotion has started, let it finish and surface its outcome
    if sidecar.is_shutting_down() {
        signals
            .await
            .map_err(|e| SidecarError::internal(format!("Signal task failed: {}", e)))??;
    } else {
        signals.abort();
    }

    elected
}
