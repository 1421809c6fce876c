// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Cluster Object Store Interface
//!
//! Read access to every resource kind plus the narrow status/finalizer write
//! paths the orchestrator owns. Implemented in
//! `crate::infrastructure::repositories`.
//!
//! | Method | Used by |
//! |--------|---------|
//! | `get` / `list` | dependency resolution, translation, policy checks |
//! | `update_agent_status` | agent reconciler |
//! | `update_agent_finalizers` | agent reconciler (finalizer add/remove) |
//! | `update_tool_server_status` | tool-server reconciler |

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::agent::{Agent, AgentStatus};
use crate::domain::model_config::ModelConfig;
use crate::domain::resource::{Namespace, NamespacedName, ObjectMeta, ResourceKind};
use crate::domain::secret::Secret;
use crate::domain::tool_provider::{
    ClusterLocalMcpServer, ClusterService, RemoteMcpServer, ToolKind, ToolProvider,
    ToolServerStatus,
};

/// Any object the store holds, tagged by `kind` as in a manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Resource {
    Agent(Agent),
    ModelConfig(ModelConfig),
    #[serde(rename = "RemoteMCPServer")]
    RemoteMcpServer(RemoteMcpServer),
    #[serde(rename = "MCPServer")]
    McpServer(ClusterLocalMcpServer),
    Service(ClusterService),
    Secret(Secret),
    Namespace(Namespace),
}

impl Resource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Agent(_) => ResourceKind::Agent,
            Self::ModelConfig(_) => ResourceKind::ModelConfig,
            Self::RemoteMcpServer(_) => ResourceKind::RemoteMcpServer,
            Self::McpServer(_) => ResourceKind::McpServer,
            Self::Service(_) => ResourceKind::Service,
            Self::Secret(_) => ResourceKind::Secret,
            Self::Namespace(_) => ResourceKind::Namespace,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Self::Agent(r) => &r.metadata,
            Self::ModelConfig(r) => &r.metadata,
            Self::RemoteMcpServer(r) => &r.metadata,
            Self::McpServer(r) => &r.metadata,
            Self::Service(r) => &r.metadata,
            Self::Secret(r) => &r.metadata,
            Self::Namespace(r) => &r.metadata,
        }
    }

    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Self::Agent(r) => &mut r.metadata,
            Self::ModelConfig(r) => &mut r.metadata,
            Self::RemoteMcpServer(r) => &mut r.metadata,
            Self::McpServer(r) => &mut r.metadata,
            Self::Service(r) => &mut r.metadata,
            Self::Secret(r) => &mut r.metadata,
            Self::Namespace(r) => &mut r.metadata,
        }
    }

    /// The identity the store indexes by. Namespaces have an empty namespace.
    pub fn key(&self) -> NamespacedName {
        self.metadata().key()
    }

    pub fn into_tool_provider(self) -> Option<ToolProvider> {
        match self {
            Self::RemoteMcpServer(r) => Some(ToolProvider::Remote(r)),
            Self::McpServer(r) => Some(ToolProvider::ClusterLocal(r)),
            Self::Service(r) => Some(ToolProvider::Service(r)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("{kind} {key} not found")]
    NotFound { kind: ResourceKind, key: NamespacedName },

    #[error("{key} is a {actual}, expected {expected}")]
    KindMismatch {
        key: NamespacedName,
        expected: ResourceKind,
        actual: ResourceKind,
    },

    #[error("cluster store unavailable: {0}")]
    Unavailable(String),
}

/// Cluster object store.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get(&self, kind: ResourceKind, key: &NamespacedName) -> Result<Resource, StoreError>;

    /// List every object of `kind`, optionally within one namespace.
    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
    ) -> Result<Vec<Resource>, StoreError>;

    /// Replace the status subtree; spec and metadata are untouched.
    async fn update_agent_status(
        &self,
        key: &NamespacedName,
        status: AgentStatus,
    ) -> Result<(), StoreError>;

    /// Replace the finalizer list. Dropping the last finalizer of a deleting
    /// agent removes it from the store.
    async fn update_agent_finalizers(
        &self,
        key: &NamespacedName,
        finalizers: Vec<String>,
    ) -> Result<(), StoreError>;

    async fn update_tool_server_status(
        &self,
        kind: ToolKind,
        key: &NamespacedName,
        status: ToolServerStatus,
    ) -> Result<(), StoreError>;
}

/// Typed accessors over [`ResourceStore`].
#[async_trait]
pub trait ResourceStoreExt: ResourceStore {
    async fn get_agent(&self, key: &NamespacedName) -> Result<Agent, StoreError> {
        match self.get(ResourceKind::Agent, key).await? {
            Resource::Agent(agent) => Ok(agent),
            other => Err(mismatch(key, ResourceKind::Agent, &other)),
        }
    }

    async fn list_agents(&self, namespace: Option<&str>) -> Result<Vec<Agent>, StoreError> {
        Ok(self
            .list(ResourceKind::Agent, namespace)
            .await?
            .into_iter()
            .filter_map(|resource| match resource {
                Resource::Agent(agent) => Some(agent),
                _ => None,
            })
            .collect())
    }

    async fn get_model_config(&self, key: &NamespacedName) -> Result<ModelConfig, StoreError> {
        match self.get(ResourceKind::ModelConfig, key).await? {
            Resource::ModelConfig(config) => Ok(config),
            other => Err(mismatch(key, ResourceKind::ModelConfig, &other)),
        }
    }

    async fn get_secret(&self, key: &NamespacedName) -> Result<Secret, StoreError> {
        match self.get(ResourceKind::Secret, key).await? {
            Resource::Secret(secret) => Ok(secret),
            other => Err(mismatch(key, ResourceKind::Secret, &other)),
        }
    }

    async fn get_namespace(&self, name: &str) -> Result<Namespace, StoreError> {
        let key = NamespacedName::new("", name);
        match self.get(ResourceKind::Namespace, &key).await? {
            Resource::Namespace(namespace) => Ok(namespace),
            other => Err(mismatch(&key, ResourceKind::Namespace, &other)),
        }
    }

    /// `kind` must be a provider kind; `Agent` targets go through `get_agent`.
    async fn get_tool_provider(
        &self,
        kind: ToolKind,
        key: &NamespacedName,
    ) -> Result<ToolProvider, StoreError> {
        let expected = kind.resource_kind();
        let resource = self.get(expected, key).await?;
        let actual = resource.kind();
        resource.into_tool_provider().ok_or(StoreError::KindMismatch {
            key: key.clone(),
            expected,
            actual,
        })
    }
}

impl<T: ResourceStore + ?Sized> ResourceStoreExt for T {}

fn mismatch(key: &NamespacedName, expected: ResourceKind, actual: &Resource) -> StoreError {
    StoreError::KindMismatch {
        key: key.clone(),
        expected,
        actual: actual.kind(),
    }
}
