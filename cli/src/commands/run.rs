// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `agentmesh run`: the controller loop until Ctrl-C.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;
use tracing::{info, warn};

use agentmesh_core::domain::controller_config::ControllerConfigManifest;
use agentmesh_core::infrastructure::event_bus::EventBusError;

use crate::embedded::EmbeddedControlPlane;

#[derive(Args)]
pub struct RunArgs {
    /// Manifest file or directory to seed the cluster store with
    #[arg(short, long, value_name = "PATH")]
    pub manifests: Option<PathBuf>,
}

pub async fn execute(args: RunArgs, config: ControllerConfigManifest) -> Result<()> {
    let embedded = EmbeddedControlPlane::new(config)?;
    let watch = embedded.store.subscribe();

    if let Some(path) = &args.manifests {
        let count = embedded.load_manifests(path)?;
        println!("{}", format!("✓ Loaded {} resources from {}", count, path.display()).green());
    }

    let mut events = embedded.plane.event_bus.subscribe();
    let event_log = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => info!(event = %json, "Reconcile event"),
                    Err(e) => warn!("Failed to render reconcile event: {}", e),
                },
                Err(EventBusError::Lagged(missed)) => warn!(missed, "Event log fell behind"),
                Err(_) => break,
            }
        }
    });

    let controller = embedded.plane.controller.clone();
    let shutdown = controller.shutdown_token();
    let handle = controller.start(watch);

    println!("{}", "AgentMesh controller running. Press Ctrl-C to stop.".bold());
    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;

    info!("Shutdown requested");
    shutdown.cancel();
    handle.await.context("Controller task failed")?;
    event_log.abort();

    println!(
        "{}",
        format!(
            "✓ Controller stopped with {} published routes",
            embedded.plane.routing.len()
        )
        .green()
    );
    Ok(())
}
