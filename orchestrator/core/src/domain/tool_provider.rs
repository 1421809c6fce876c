// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Tool Providers
//!
//! Resource kinds an Agent can invoke as a capability, plus the
//! [`ToolReference`] an Agent uses to point at them.
//!
//! | Kind | Resource | Cross-namespace |
//! |------|----------|-----------------|
//! | `RemoteMCPServer` | [`RemoteMcpServer`] | via `allowedNamespaces` |
//! | `MCPServer` | [`ClusterLocalMcpServer`] | never |
//! | `Service` | [`ClusterService`] | never |
//! | `Agent` | [`crate::domain::agent::Agent`] | via `allowedNamespaces` |
//!
//! Every `match` over [`ToolProvider`] is exhaustive. A new provider kind
//! needs a namespace policy rule and a translator arm.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::domain::namespace_policy::AllowedNamespaces;
use crate::domain::resource::{Condition, NamespacedName, ObjectMeta, ResourceKind};

/// Annotation overriding the MCP port of a plain `Service`
pub const SERVICE_PORT_ANNOTATION: &str = "agentmesh.dev/mcp-service-port";
/// Annotation overriding the MCP path of a plain `Service`
pub const SERVICE_PATH_ANNOTATION: &str = "agentmesh.dev/mcp-service-path";
/// Annotation selecting `SSE` or `STREAMABLE_HTTP` for a plain `Service`
pub const SERVICE_PROTOCOL_ANNOTATION: &str = "agentmesh.dev/mcp-service-protocol";

pub const DEFAULT_MCP_PATH: &str = "/mcp";

/// Condition types written to tool-server status
pub const CONDITION_ACCEPTED: &str = "Accepted";
pub const CONDITION_TOOLS_DISCOVERED: &str = "ToolsDiscovered";

/// Kind of a tool reference target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ToolKind {
    #[serde(rename = "RemoteMCPServer")]
    RemoteMcpServer,
    #[serde(rename = "MCPServer", alias = "ClusterLocalMCPServer")]
    ClusterLocalMcpServer,
    #[serde(rename = "Service", alias = "ClusterService")]
    ClusterService,
    Agent,
}

impl ToolKind {
    pub fn resource_kind(&self) -> ResourceKind {
        match self {
            Self::RemoteMcpServer => ResourceKind::RemoteMcpServer,
            Self::ClusterLocalMcpServer => ResourceKind::McpServer,
            Self::ClusterService => ResourceKind::Service,
            Self::Agent => ResourceKind::Agent,
        }
    }

    pub fn from_resource_kind(kind: ResourceKind) -> Option<Self> {
        match kind {
            ResourceKind::RemoteMcpServer => Some(Self::RemoteMcpServer),
            ResourceKind::McpServer => Some(Self::ClusterLocalMcpServer),
            ResourceKind::Service => Some(Self::ClusterService),
            ResourceKind::Agent => Some(Self::Agent),
            ResourceKind::ModelConfig | ResourceKind::Secret | ResourceKind::Namespace => None,
        }
    }

    /// Cluster-local kinds carry no `allowedNamespaces` field at all.
    pub fn supports_cross_namespace(&self) -> bool {
        matches!(self, Self::RemoteMcpServer | Self::Agent)
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.resource_kind().as_str())
    }
}

/// Entry in an Agent's tool list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolReference {
    pub kind: ToolKind,

    /// Empty means the referencing Agent's namespace
    #[serde(default)]
    pub namespace: String,

    pub name: String,

    /// Restrict the exposed tools; empty exposes everything the provider offers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_names: Vec<String>,
}

impl ToolReference {
    pub fn new(kind: ToolKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
            tool_names: Vec::new(),
        }
    }

    /// Resolve the target identity relative to the referencing Agent.
    pub fn resolve(&self, agent_namespace: &str) -> NamespacedName {
        if self.namespace.is_empty() {
            NamespacedName::new(agent_namespace, self.name.clone())
        } else {
            NamespacedName::new(self.namespace.clone(), self.name.clone())
        }
    }

    pub fn targets(&self, agent_namespace: &str, kind: ToolKind, key: &NamespacedName) -> bool {
        self.kind == kind && self.resolve(agent_namespace) == *key
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteMcpProtocol {
    #[serde(rename = "SSE")]
    Sse,
    #[default]
    #[serde(rename = "STREAMABLE_HTTP")]
    StreamableHttp,
}

impl RemoteMcpProtocol {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "SSE" => Some(Self::Sse),
            "STREAMABLE_HTTP" | "STREAMABLE-HTTP" | "HTTP" => Some(Self::StreamableHttp),
            _ => None,
        }
    }
}

/// Key within a same-namespace Secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretKeySelector {
    pub name: String,
    pub key: String,
}

/// Header value given inline or pulled from a Secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<SecretKeySelector>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteMcpServerSpec {
    #[serde(default)]
    pub description: String,
    pub url: String,
    #[serde(default)]
    pub protocol: RemoteMcpProtocol,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers_from: Vec<ValueRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sse_read_timeout_seconds: Option<u64>,
    #[serde(default = "default_true")]
    pub terminate_on_close: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_namespaces: Option<AllowedNamespaces>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolServerStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub discovered_tools: Vec<DiscoveredTool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// MCP server reachable over the network, possibly shared across tenants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteMcpServer {
    pub metadata: ObjectMeta,
    pub spec: RemoteMcpServerSpec,
    #[serde(default)]
    pub status: ToolServerStatus,
}

impl RemoteMcpServer {
    /// Secrets named by `headersFrom`, resolved in the server's namespace.
    pub fn header_secrets(&self) -> Vec<NamespacedName> {
        let mut keys: Vec<NamespacedName> = self
            .spec
            .headers_from
            .iter()
            .filter_map(|header| header.value_from.as_ref())
            .map(|selector| {
                NamespacedName::new(self.metadata.namespace.clone(), selector.name.clone())
            })
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocalTransport {
    #[default]
    Stdio,
    Http,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterLocalMcpServerSpec {
    #[serde(default)]
    pub transport: LocalTransport,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default = "default_mcp_path")]
    pub path: String,
    #[serde(default)]
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

/// MCP server deployed next to the agents that use it. Same-namespace only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterLocalMcpServer {
    pub metadata: ObjectMeta,
    pub spec: ClusterLocalMcpServerSpec,
    #[serde(default)]
    pub status: ToolServerStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePort {
    #[serde(default)]
    pub name: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_protocol: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterServiceSpec {
    #[serde(default)]
    pub ports: Vec<ServicePort>,
}

/// Plain network Service exposing MCP. Same-namespace only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterService {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ClusterServiceSpec,
}

/// A resolved tool-reference target.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolProvider {
    Remote(RemoteMcpServer),
    ClusterLocal(ClusterLocalMcpServer),
    Service(ClusterService),
}

impl ToolProvider {
    pub fn kind(&self) -> ToolKind {
        match self {
            Self::Remote(_) => ToolKind::RemoteMcpServer,
            Self::ClusterLocal(_) => ToolKind::ClusterLocalMcpServer,
            Self::Service(_) => ToolKind::ClusterService,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Self::Remote(server) => &server.metadata,
            Self::ClusterLocal(server) => &server.metadata,
            Self::Service(service) => &service.metadata,
        }
    }

    /// Only remote servers can carry a policy.
    pub fn allowed_namespaces(&self) -> Option<&AllowedNamespaces> {
        match self {
            Self::Remote(server) => server.spec.allowed_namespaces.as_ref(),
            Self::ClusterLocal(_) | Self::Service(_) => None,
        }
    }
}

/// Where to ask an MCP server for its tool list.
#[derive(Debug, Clone)]
pub struct ToolEndpoint {
    pub url: String,
    pub protocol: RemoteMcpProtocol,
    pub headers: BTreeMap<String, String>,
    pub timeout: Duration,
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("MCP endpoint {url} unreachable: {message}")]
    Unreachable { url: String, message: String },

    #[error("MCP endpoint {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("MCP protocol error from {url}: {message}")]
    Protocol { url: String, message: String },

    #[error("tool discovery over {0:?} is not supported")]
    UnsupportedProtocol(RemoteMcpProtocol),
}

/// Lists the tools an MCP server offers.
#[async_trait]
pub trait ToolDiscovery: Send + Sync {
    async fn list_tools(
        &self,
        endpoint: &ToolEndpoint,
    ) -> Result<Vec<DiscoveredTool>, DiscoveryError>;
}

fn default_true() -> bool {
    true
}

fn default_mcp_path() -> String {
    DEFAULT_MCP_PATH.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_namespace_resolves_to_agent_namespace() {
        let reference = ToolReference::new(ToolKind::RemoteMcpServer, "", "tools");
        assert_eq!(reference.resolve("ns1"), NamespacedName::new("ns1", "tools"));

        let explicit = ToolReference::new(ToolKind::RemoteMcpServer, "ns2", "tools");
        assert_eq!(explicit.resolve("ns1"), NamespacedName::new("ns2", "tools"));
    }

    #[test]
    fn test_kind_serde_names() {
        let reference: ToolReference =
            serde_yaml::from_str("kind: MCPServer\nname: fs\ntoolNames: [read_file]").unwrap();
        assert_eq!(reference.kind, ToolKind::ClusterLocalMcpServer);
        assert_eq!(reference.namespace, "");
        assert_eq!(reference.tool_names, vec!["read_file".to_string()]);

        let reference: ToolReference =
            serde_yaml::from_str("kind: RemoteMCPServer\nnamespace: ns2\nname: tools").unwrap();
        assert_eq!(reference.kind, ToolKind::RemoteMcpServer);
        assert_eq!(ToolKind::ClusterService.to_string(), "Service");
    }

    #[test]
    fn test_only_remote_provider_exposes_policy() {
        let service = ToolProvider::Service(ClusterService {
            metadata: ObjectMeta::new("ns1", "svc"),
            spec: ClusterServiceSpec::default(),
        });
        assert!(service.allowed_namespaces().is_none());
        assert!(!service.kind().supports_cross_namespace());
        assert!(ToolKind::Agent.supports_cross_namespace());
    }

    #[test]
    fn test_header_secrets_deduplicated() {
        let server = RemoteMcpServer {
            metadata: ObjectMeta::new("ns2", "tools"),
            spec: RemoteMcpServerSpec {
                description: String::new(),
                url: "https://tools.example.com/mcp".into(),
                protocol: RemoteMcpProtocol::StreamableHttp,
                headers_from: vec![
                    ValueRef {
                        name: "Authorization".into(),
                        value: None,
                        value_from: Some(SecretKeySelector {
                            name: "tools-auth".into(),
                            key: "token".into(),
                        }),
                    },
                    ValueRef {
                        name: "X-Tenant".into(),
                        value: None,
                        value_from: Some(SecretKeySelector {
                            name: "tools-auth".into(),
                            key: "tenant".into(),
                        }),
                    },
                    ValueRef {
                        name: "X-Static".into(),
                        value: Some("1".into()),
                        value_from: None,
                    },
                ],
                timeout_seconds: None,
                sse_read_timeout_seconds: None,
                terminate_on_close: true,
                allowed_namespaces: None,
            },
            status: ToolServerStatus::default(),
        };
        assert_eq!(server.header_secrets(), vec![NamespacedName::new("ns2", "tools-auth")]);
    }
}
