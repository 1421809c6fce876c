// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `agentmesh reconcile`: one pass over a manifest set, then a report of
//! what each Agent ended up as.

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;

use agentmesh_core::domain::agent::{Agent, CONDITION_ACCEPTED, CONDITION_READY};
use agentmesh_core::domain::controller_config::ControllerConfigManifest;
use agentmesh_core::domain::repository::ResourceStoreExt;
use agentmesh_core::domain::resource::{find_condition, ConditionStatus};

use crate::embedded::EmbeddedControlPlane;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Args)]
pub struct ReconcileArgs {
    /// Manifest file or directory
    #[arg(value_name = "PATH")]
    pub manifests: PathBuf,

    /// Report format
    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentReport {
    pub namespace: String,
    pub name: String,
    pub accepted: bool,
    pub ready: bool,
    pub routed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_hash: Option<String>,
}

impl AgentReport {
    fn from_agent(agent: &Agent, endpoint: Option<String>) -> Self {
        let accepted = find_condition(&agent.status.conditions, CONDITION_ACCEPTED);
        let ready = find_condition(&agent.status.conditions, CONDITION_READY);
        // The first condition that is not True explains the state
        let blocking = [accepted, ready]
            .into_iter()
            .flatten()
            .find(|c| c.status != ConditionStatus::True);

        Self {
            namespace: agent.metadata.namespace.clone(),
            name: agent.metadata.name.clone(),
            accepted: accepted.is_some_and(|c| c.status == ConditionStatus::True),
            ready: ready.is_some_and(|c| c.status == ConditionStatus::True),
            routed: endpoint.is_some(),
            reason: blocking.map(|c| c.reason.clone()),
            message: blocking.map(|c| c.message.clone()).filter(|m| !m.is_empty()),
            endpoint,
            secret_hash: agent.status.last_applied_secret_hash.clone(),
        }
    }
}

/// Seed the store, queue everything and process until the queue is idle.
/// Delayed retries and refreshes are not waited for.
pub async fn reconcile_once(embedded: &EmbeddedControlPlane) -> Result<Vec<AgentReport>> {
    let controller = &embedded.plane.controller;
    controller.resync_all().await.context("Failed to list resources")?;
    while !controller.queue().is_empty() {
        if controller.process_next().await.is_none() {
            break;
        }
    }

    let agents = embedded.store.list_agents(None).await.context("Failed to list agents")?;
    let reports = agents
        .iter()
        .map(|agent| {
            let endpoint = embedded
                .plane
                .routing
                .get(&agent.metadata.key())
                .map(|route| route.client.endpoint().to_string());
            AgentReport::from_agent(agent, endpoint)
        })
        .collect();
    Ok(reports)
}

pub async fn execute(args: ReconcileArgs, config: ControllerConfigManifest) -> Result<()> {
    let embedded = EmbeddedControlPlane::new(config)?;
    embedded.load_manifests(&args.manifests)?;
    let reports = reconcile_once(&embedded).await?;

    match args.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
        OutputFormat::Text => print_reports(&reports),
    }

    if reports.iter().any(|r| !r.accepted) {
        anyhow::bail!("{} agent(s) rejected", reports.iter().filter(|r| !r.accepted).count());
    }
    Ok(())
}

fn print_reports(reports: &[AgentReport]) {
    if reports.is_empty() {
        println!("{}", "No agents found.".yellow());
        return;
    }

    println!("{}", "Agents:".bold());
    for report in reports {
        let state = if report.routed {
            "routed".green()
        } else if report.accepted {
            "pending".yellow()
        } else {
            "rejected".red()
        };
        println!("  {}/{} [{}]", report.namespace, report.name.bold(), state);
        if let Some(endpoint) = &report.endpoint {
            println!("    Endpoint: {}", endpoint);
        }
        if let Some(hash) = &report.secret_hash {
            println!("    Secret hash: {}", hash.dimmed());
        }
        if let Some(reason) = &report.reason {
            println!("    Reason: {}", reason);
        }
        if let Some(message) = &report.message {
            println!("    {}", message.dimmed());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFESTS: &str = r#"
kind: ModelConfig
metadata: { name: llama, namespace: team-a }
spec: { provider: Ollama, model: llama3, baseUrl: "http://ollama.team-a:11434" }
---
kind: Agent
metadata: { name: helper, namespace: team-a }
spec:
  declarative:
    systemMessage: Help out.
    modelConfig: llama
---
kind: Agent
metadata: { name: broken, namespace: team-a }
spec:
  declarative:
    modelConfig: llama
    tools:
      - { kind: Agent, name: broken }
"#;

    #[tokio::test]
    async fn test_reconcile_once_reports_routed_and_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agents.yaml");
        std::fs::write(&path, MANIFESTS).unwrap();

        let embedded = EmbeddedControlPlane::new(ControllerConfigManifest::default()).unwrap();
        assert_eq!(embedded.load_manifests(&path).unwrap(), 3);
        let reports = reconcile_once(&embedded).await.unwrap();

        let helper = reports.iter().find(|r| r.name == "helper").unwrap();
        assert!(helper.accepted && helper.ready && helper.routed);
        assert_eq!(helper.endpoint.as_deref(), Some("http://helper.team-a:8080"));

        let broken = reports.iter().find(|r| r.name == "broken").unwrap();
        assert!(!broken.accepted);
        assert!(!broken.routed);
        assert_eq!(broken.reason.as_deref(), Some("ValidationFailed"));
    }
}
