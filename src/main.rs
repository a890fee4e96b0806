// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::Result;
use kube::Client;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::info;

use switchyard::backend::{NbctlClient, NetworkBackend};
use switchyard::config::Config;
use switchyard::controller::Controller;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    info!("Starting Switchyard controller");

    // Load configuration
    let config = Config::from_env()?;
    info!(
        "Configuration loaded: router={} node_switch={}",
        config.cluster_router, config.node_switch
    );

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    // Network backend over the northbound database
    let backend: Arc<dyn NetworkBackend> = Arc::new(NbctlClient::new(
        &config.nb_address,
        &config.node_switch_cidr,
        &config.node_switch_gateway,
    ));

    // Raise the process-wide shutdown signal on SIGTERM or ctrl-c
    let mut sigterm = signal(SignalKind::terminate())?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = sigterm.recv() => {},
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let controller = Controller::new(client, config, backend);
    controller.run(shutdown_rx).await?;

    info!("Switchyard controller stopped");
    Ok(())
}
