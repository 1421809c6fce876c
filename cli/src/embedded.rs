// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Embedded control plane
//!
//! Builds the reconcilers in-process over an in-memory cluster store seeded
//! from manifest files, with HTTP adapters for upstream agents and MCP tool
//! discovery.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use agentmesh_core::{
    application::control_plane::{ControlPlane, ControlPlaneAdapters},
    domain::controller_config::ControllerConfigManifest,
    infrastructure::{
        downstream::InMemoryDeploymentApplier,
        repositories::{manifest_loader::ManifestLoader, InMemoryResourceStore},
        tool_discovery::HttpToolDiscovery,
        upstream_client::{ForwardingAuthHook, HttpUpstreamClientFactory},
    },
};

pub struct EmbeddedControlPlane {
    pub config: ControllerConfigManifest,
    pub store: Arc<InMemoryResourceStore>,
    pub applier: Arc<InMemoryDeploymentApplier>,
    pub plane: ControlPlane,
}

impl EmbeddedControlPlane {
    pub fn new(config: ControllerConfigManifest) -> Result<Self> {
        config.validate().context("Configuration validation failed")?;

        let store = Arc::new(InMemoryResourceStore::new());
        let applier = Arc::new(InMemoryDeploymentApplier::new());
        let clients = HttpUpstreamClientFactory::new(config.reconcile_timeout())
            .context("Failed to build upstream HTTP client")?;

        let plane = ControlPlane::new(
            &config,
            ControlPlaneAdapters {
                store: store.clone(),
                applier: applier.clone(),
                clients: Arc::new(clients),
                discovery: Arc::new(HttpToolDiscovery::new()),
                auth_hook: Arc::new(ForwardingAuthHook::default()),
            },
        );

        Ok(Self {
            config,
            store,
            applier,
            plane,
        })
    }

    /// Apply every manifest under `path` (a file or a directory).
    pub fn load_manifests(&self, path: &Path) -> Result<usize> {
        let resources = ManifestLoader::load_path(path)
            .with_context(|| format!("Failed to load manifests from {}", path.display()))?;
        let count = resources.len();
        for resource in resources {
            let kind = resource.kind();
            let key = resource.key();
            self.store
                .apply(resource)
                .with_context(|| format!("Failed to apply {} {}", kind, key))?;
        }
        info!(count, path = %path.display(), "Loaded manifests");
        Ok(count)
    }
}
