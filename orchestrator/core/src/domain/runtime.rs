// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Runtime Configuration
//!
//! The translator's deployable output and the downstream applier contract
//! that consumes it.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Runtime config value objects, `DownstreamApplier` port
//!
//! Nothing in a [`RuntimeConfig`] carries secret plaintext. Credentials are
//! expressed as [`SecretKeyRef`] placeholders that the workload resolves at
//! deploy time.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::domain::resource::NamespacedName;
use crate::domain::routing::AgentCard;

/// Pointer to one key of a Secret; resolved by the workload, not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretKeyRef {
    pub namespace: String,
    pub name: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "camelCase")]
pub enum EnvValue {
    Literal { value: String },
    SecretKey(SecretKeyRef),
}

/// Header sent to a tool server; secret-backed values stay placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "camelCase")]
pub enum HeaderValue {
    Literal { value: String },
    FromSecret(SecretKeyRef),
}

/// API key placeholder: the env var the runtime reads and where it comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialPlaceholder {
    pub env_var: String,
    pub secret: SecretKeyRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelBlock {
    #[serde(rename = "type")]
    pub provider_type: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<CredentialPlaceholder>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

/// Provider-specific tool connection parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum RuntimeTool {
    Stdio {
        name: String,
        command: String,
        args: Vec<String>,
        env: BTreeMap<String, String>,
        tools: Vec<String>,
    },
    Sse {
        name: String,
        url: String,
        headers: BTreeMap<String, HeaderValue>,
        timeout_seconds: Option<u64>,
        sse_read_timeout_seconds: Option<u64>,
        tools: Vec<String>,
    },
    StreamableHttp {
        name: String,
        url: String,
        headers: BTreeMap<String, HeaderValue>,
        timeout_seconds: Option<u64>,
        terminate_on_close: bool,
        tools: Vec<String>,
    },
}

impl RuntimeTool {
    pub fn name(&self) -> &str {
        match self {
            Self::Stdio { name, .. }
            | Self::Sse { name, .. }
            | Self::StreamableHttp { name, .. } => name,
        }
    }
}

/// Another agent exposed as a tool, always through the proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAgentEntry {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub description: String,
}

/// Configuration consumed by the declarative agent runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRuntimeConfig {
    pub name: String,
    pub description: String,
    pub instruction: String,
    pub model: ModelBlock,
    pub tools: Vec<RuntimeTool>,
    pub remote_agents: Vec<RemoteAgentEntry>,
    pub stream: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    pub agent: NamespacedName,
    pub port: u16,
    pub replicas: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, EnvValue>,
    /// `None` for Unmanaged agents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_config: Option<AgentRuntimeConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentRequest {
    pub config: RuntimeConfig,
    /// Fingerprint of the credential secrets the workload will read
    pub secret_hash: String,
    /// Set when the fingerprint moved since the last applied deployment
    pub redeploy: bool,
}

/// Readiness reported by the applier after create/update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Readiness {
    pub ready: bool,
    /// In-cluster URL of the serving workload
    pub endpoint: String,
    /// Card the workload advertises about itself, if it serves one
    pub advertised_card: Option<AgentCard>,
}

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("downstream applier unavailable: {0}")]
    Unavailable(String),

    #[error("downstream rejected deployment for {agent}: {message}")]
    Rejected { agent: NamespacedName, message: String },
}

/// Creates or updates the workload serving an agent.
#[async_trait]
pub trait DownstreamApplier: Send + Sync {
    async fn apply(&self, request: &DeploymentRequest) -> Result<Readiness, ApplyError>;

    /// Tear down the workload; unknown agents are a no-op.
    async fn delete(&self, agent: &NamespacedName) -> Result<(), ApplyError>;
}
