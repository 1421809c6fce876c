// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Resource
//!
//! The declarative unit the orchestrator converges: an LLM-driven service and
//! the resources it depends on.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Agent spec and the status subtree owned by the reconciler
//!
//! Only the `status` subtree is ever written by the orchestrator. It carries
//! conditions, the generation last observed and the secret fingerprint of the
//! last deployment; never secret values.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::namespace_policy::AllowedNamespaces;
use crate::domain::resource::{Condition, NamespacedName, ObjectMeta};
use crate::domain::routing::AgentSkill;
use crate::domain::tool_provider::ToolReference;

/// Finalizer guarding routing-table deregistration on delete
pub const AGENT_FINALIZER: &str = "agentmesh.dev/routing-cleanup";

/// Listen port of the declarative agent runtime when none is configured
pub const DEFAULT_AGENT_PORT: u16 = 8080;

pub const CONDITION_ACCEPTED: &str = "Accepted";
pub const CONDITION_READY: &str = "Ready";

pub const REASON_REFERENCES_VALID: &str = "ReferencesValid";
pub const REASON_VALIDATION_FAILED: &str = "ValidationFailed";
pub const REASON_WORKLOAD_NOT_READY: &str = "WorkloadNotReady";
pub const REASON_ROUTE_PUBLISHED: &str = "RoutePublished";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentType {
    #[default]
    Declarative,
    /// Bring-your-own image; the orchestrator only deploys and routes it
    #[serde(alias = "BYO")]
    Unmanaged,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct A2AConfig {
    #[serde(default)]
    pub skills: Vec<AgentSkill>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeclarativeAgentSpec {
    #[serde(default)]
    pub system_message: String,

    /// ModelConfig name in the Agent's own namespace
    #[serde(default)]
    pub model_config: String,

    #[serde(default)]
    pub tools: Vec<ToolReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub a2a_config: Option<A2AConfig>,

    #[serde(default)]
    pub stream: bool,

    #[serde(default)]
    pub deployment: DeploymentSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnmanagedAgentSpec {
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub deployment: DeploymentSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSpec {
    #[serde(rename = "type", default)]
    pub agent_type: AgentType,

    #[serde(default)]
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declarative: Option<DeclarativeAgentSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unmanaged: Option<UnmanagedAgentSpec>,

    /// Who may use this agent as a tool from another namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_namespaces: Option<AllowedNamespaces>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// SHA-256 fingerprint of the credential secrets last deployed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_applied_secret_hash: Option<String>,

    #[serde(default)]
    pub observed_generation: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub metadata: ObjectMeta,
    pub spec: AgentSpec,
    #[serde(default)]
    pub status: AgentStatus,
}

impl Agent {
    pub fn key(&self) -> NamespacedName {
        self.metadata.key()
    }

    /// The declarative block, only for Declarative agents.
    pub fn declarative(&self) -> Option<&DeclarativeAgentSpec> {
        match self.spec.agent_type {
            AgentType::Declarative => self.spec.declarative.as_ref(),
            AgentType::Unmanaged => None,
        }
    }

    pub fn deployment(&self) -> Option<&DeploymentSpec> {
        match self.spec.agent_type {
            AgentType::Declarative => self.spec.declarative.as_ref().map(|d| &d.deployment),
            AgentType::Unmanaged => self.spec.unmanaged.as_ref().map(|u| &u.deployment),
        }
    }

    /// Port the workload listens on. A zero port counts as missing;
    /// Unmanaged agents get no default.
    pub fn listen_port(&self) -> Option<u16> {
        let configured = self.deployment().and_then(|d| d.port);
        match (self.spec.agent_type, configured) {
            (_, Some(0)) => None,
            (_, Some(port)) => Some(port),
            (AgentType::Declarative, None) => Some(DEFAULT_AGENT_PORT),
            (AgentType::Unmanaged, None) => None,
        }
    }
}
