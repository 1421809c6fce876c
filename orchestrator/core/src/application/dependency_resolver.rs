// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Dependency Resolver
//!
//! Reverse lookup from a changed resource to the Agents that depend on it.
//! There is no persistent reverse index: every query lists Agents from the
//! store and tests each reference.
//!
//! | Changed kind | Dependents |
//! |--------------|------------|
//! | `ModelConfig` | same-namespace Agents whose `modelConfig` names it |
//! | `RemoteMCPServer`, `MCPServer`, `Service`, `Agent` | Agents with a matching tool reference |
//! | `Secret` | dependents of ModelConfigs and RemoteMCPServers reading it |
//! | `Namespace` | every Agent in the namespace (labels feed selectors) |
//!
//! Only Declarative Agents carry references; Unmanaged Agents never match.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

use crate::domain::agent::Agent;
use crate::domain::repository::{Resource, ResourceStore, ResourceStoreExt, StoreError};
use crate::domain::resource::{NamespacedName, ResourceKind};
use crate::domain::tool_provider::ToolKind;

pub struct DependencyResolver {
    store: Arc<dyn ResourceStore>,
}

impl DependencyResolver {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }

    /// Agents to re-enqueue after `kind`/`key` changed.
    pub async fn find_dependents(
        &self,
        kind: ResourceKind,
        key: &NamespacedName,
    ) -> Result<BTreeSet<NamespacedName>, StoreError> {
        let dependents = match kind {
            ResourceKind::ModelConfig => self.agents_using_model_config(key).await?,
            ResourceKind::Secret => self.agents_using_secret(key).await?,
            ResourceKind::Namespace => self.agents_in_namespace(&key.name).await?,
            ResourceKind::Agent
            | ResourceKind::RemoteMcpServer
            | ResourceKind::McpServer
            | ResourceKind::Service => match ToolKind::from_resource_kind(kind) {
                Some(tool_kind) => self.agents_using_tool(tool_kind, key).await?,
                None => BTreeSet::new(),
            },
        };

        debug!(kind = %kind, key = %key, dependents = dependents.len(), "Resolved dependents");
        Ok(dependents)
    }

    /// ModelConfig references never cross namespaces, so only the
    /// ModelConfig's own namespace is scanned.
    pub async fn agents_using_model_config(
        &self,
        key: &NamespacedName,
    ) -> Result<BTreeSet<NamespacedName>, StoreError> {
        let agents = self.store.list_agents(Some(&key.namespace)).await?;
        Ok(agents
            .iter()
            .filter(|agent| references_model_config(agent, key))
            .map(Agent::key)
            .collect())
    }

    pub async fn agents_using_tool(
        &self,
        kind: ToolKind,
        key: &NamespacedName,
    ) -> Result<BTreeSet<NamespacedName>, StoreError> {
        let agents = self.store.list_agents(None).await?;
        Ok(matching_tool_users(&agents, kind, key))
    }

    /// Secrets are read by ModelConfigs (API key) and RemoteMCPServers
    /// (`headersFrom`), both in the Secret's own namespace.
    pub async fn agents_using_secret(
        &self,
        key: &NamespacedName,
    ) -> Result<BTreeSet<NamespacedName>, StoreError> {
        let mut dependents = BTreeSet::new();

        let mut model_configs = Vec::new();
        for resource in self.store.list(ResourceKind::ModelConfig, Some(&key.namespace)).await? {
            if let Resource::ModelConfig(model_config) = resource {
                if model_config.api_key_secret_ref().as_ref() == Some(key) {
                    model_configs.push(model_config.metadata.key());
                }
            }
        }

        let mut servers = Vec::new();
        let remote_servers = self
            .store
            .list(ResourceKind::RemoteMcpServer, Some(&key.namespace))
            .await?;
        for resource in remote_servers {
            if let Resource::RemoteMcpServer(server) = resource {
                if server.header_secrets().contains(key) {
                    servers.push(server.metadata.key());
                }
            }
        }

        if !model_configs.is_empty() {
            let agents = self.store.list_agents(Some(&key.namespace)).await?;
            for model_config in &model_configs {
                dependents.extend(
                    agents
                        .iter()
                        .filter(|agent| references_model_config(agent, model_config))
                        .map(Agent::key),
                );
            }
        }

        if !servers.is_empty() {
            let agents = self.store.list_agents(None).await?;
            for server in &servers {
                dependents.extend(matching_tool_users(&agents, ToolKind::RemoteMcpServer, server));
            }
        }

        Ok(dependents)
    }

    pub async fn agents_in_namespace(
        &self,
        namespace: &str,
    ) -> Result<BTreeSet<NamespacedName>, StoreError> {
        let agents = self.store.list_agents(Some(namespace)).await?;
        Ok(agents
            .iter()
            .filter(|agent| agent.declarative().is_some())
            .map(Agent::key)
            .collect())
    }
}

fn matching_tool_users(
    agents: &[Agent],
    kind: ToolKind,
    key: &NamespacedName,
) -> BTreeSet<NamespacedName> {
    agents
        .iter()
        .filter(|agent| references_tool(agent, kind, key))
        .map(Agent::key)
        .collect()
}

pub fn references_model_config(agent: &Agent, key: &NamespacedName) -> bool {
    match agent.declarative() {
        Some(spec) if !spec.model_config.is_empty() => {
            agent.metadata.namespace == key.namespace && spec.model_config == key.name
        }
        _ => false,
    }
}

/// An empty reference namespace means the Agent's own namespace.
pub fn references_tool(agent: &Agent, kind: ToolKind, key: &NamespacedName) -> bool {
    agent.declarative().is_some_and(|spec| {
        spec.tools
            .iter()
            .any(|tool| tool.targets(&agent.metadata.namespace, kind, key))
    })
}
