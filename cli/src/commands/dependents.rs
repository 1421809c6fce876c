// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `agentmesh dependents`: which Agents a change to an object would
//! re-reconcile.

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use colored::Colorize;
use std::path::PathBuf;

use agentmesh_core::domain::controller_config::ControllerConfigManifest;
use agentmesh_core::domain::resource::{NamespacedName, ResourceKind, DEFAULT_NAMESPACE};

use crate::commands::reconcile::OutputFormat;
use crate::embedded::EmbeddedControlPlane;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    Agent,
    ModelConfig,
    #[value(name = "remote-mcp-server")]
    RemoteMcpServer,
    #[value(name = "mcp-server")]
    McpServer,
    Service,
    Secret,
    Namespace,
}

impl From<KindArg> for ResourceKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Agent => ResourceKind::Agent,
            KindArg::ModelConfig => ResourceKind::ModelConfig,
            KindArg::RemoteMcpServer => ResourceKind::RemoteMcpServer,
            KindArg::McpServer => ResourceKind::McpServer,
            KindArg::Service => ResourceKind::Service,
            KindArg::Secret => ResourceKind::Secret,
            KindArg::Namespace => ResourceKind::Namespace,
        }
    }
}

#[derive(Args)]
pub struct DependentsArgs {
    /// Kind of the changed object
    #[arg(value_enum)]
    pub kind: KindArg,

    /// `namespace/name`, or `name` in the default namespace. Namespaces are
    /// given by name alone.
    #[arg(value_name = "OBJECT")]
    pub object: String,

    /// Manifest file or directory
    #[arg(short, long, value_name = "PATH")]
    pub manifests: PathBuf,

    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

/// Resolve the object argument to a store key.
pub fn object_key(kind: ResourceKind, object: &str) -> NamespacedName {
    if kind.is_namespaced() {
        NamespacedName::parse_with_default(object, DEFAULT_NAMESPACE)
    } else {
        NamespacedName::new("", object)
    }
}

pub async fn execute(args: DependentsArgs, config: ControllerConfigManifest) -> Result<()> {
    let embedded = EmbeddedControlPlane::new(config)?;
    embedded.load_manifests(&args.manifests)?;

    let kind = ResourceKind::from(args.kind);
    let key = object_key(kind, &args.object);
    let dependents = embedded
        .plane
        .resolver
        .find_dependents(kind, &key)
        .await
        .with_context(|| format!("Failed to resolve dependents of {} {}", kind, key))?;

    match args.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&dependents)?);
        }
        OutputFormat::Text => {
            if dependents.is_empty() {
                println!("{}", format!("No agents depend on {} {}", kind, key).yellow());
            } else {
                println!("{}", format!("Agents depending on {} {}:", kind, key).bold());
                for agent in &dependents {
                    println!("  {}", agent);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_parsing() {
        assert_eq!(
            object_key(ResourceKind::Secret, "team-a/openai-key"),
            NamespacedName::new("team-a", "openai-key")
        );
        assert_eq!(
            object_key(ResourceKind::ModelConfig, "gpt"),
            NamespacedName::new(DEFAULT_NAMESPACE, "gpt")
        );
        assert_eq!(
            object_key(ResourceKind::Namespace, "team-a"),
            NamespacedName::new("", "team-a")
        );
    }
}
