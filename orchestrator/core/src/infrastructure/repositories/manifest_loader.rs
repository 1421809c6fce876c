// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Resource Manifest Loader
//!
//! Parses multi-document YAML (the `kubectl apply -f` format) into
//! [`Resource`] values for the in-memory store.
//!
//! ```yaml
//! apiVersion: agentmesh.dev/v1alpha2
//! kind: Agent
//! metadata:
//!   name: planner
//!   namespace: ns1
//! spec:
//!   declarative:
//!     modelConfig: default-model
//! ---
//! apiVersion: v1
//! kind: Namespace
//! metadata:
//!   name: ns1
//!   labels:
//!     shared-access: "true"
//! ```
//!
//! Documents of kinds the orchestrator does not track are skipped with a
//! warning; `apiVersion` is not interpreted.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::domain::repository::Resource;

const KNOWN_KINDS: &[&str] = &[
    "Agent",
    "ModelConfig",
    "RemoteMCPServer",
    "MCPServer",
    "Service",
    "Secret",
    "Namespace",
];

pub struct ManifestLoader;

impl ManifestLoader {
    /// Parse every document in a YAML stream.
    pub fn parse_str(yaml: &str) -> Result<Vec<Resource>> {
        let mut resources = Vec::new();
        for (index, document) in serde_yaml::Deserializer::from_str(yaml).enumerate() {
            let value = serde_yaml::Value::deserialize(document)
                .with_context(|| format!("Failed to parse YAML document {}", index + 1))?;
            if value.is_null() {
                continue;
            }

            let kind = value
                .get("kind")
                .and_then(|k| k.as_str())
                .unwrap_or_default()
                .to_string();
            if !KNOWN_KINDS.contains(&kind.as_str()) {
                warn!("Skipping document {} with untracked kind '{}'", index + 1, kind);
                continue;
            }

            let resource: Resource = serde_yaml::from_value(value)
                .with_context(|| format!("Invalid {} manifest in document {}", kind, index + 1))?;
            resources.push(resource);
        }
        Ok(resources)
    }

    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Vec<Resource>> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest file: {}", path.display()))?;
        Self::parse_str(&yaml).with_context(|| format!("In manifest file: {}", path.display()))
    }

    /// Load a file, or every `.yaml`/`.yml` file of a directory in name order.
    pub fn load_path<P: AsRef<Path>>(path: P) -> Result<Vec<Resource>> {
        let path = path.as_ref();
        if !path.is_dir() {
            return Self::parse_file(path);
        }

        let mut files: Vec<PathBuf> = std::fs::read_dir(path)
            .with_context(|| format!("Failed to read manifest directory: {}", path.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.is_file()
                    && p.extension()
                        .and_then(|ext| ext.to_str())
                        .is_some_and(|ext| ext == "yaml" || ext == "yml")
            })
            .collect();
        files.sort();

        let mut resources = Vec::new();
        for file in files {
            resources.extend(Self::parse_file(&file)?);
        }
        Ok(resources)
    }
}
