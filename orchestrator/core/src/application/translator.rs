// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Spec Translator
//!
//! Deterministic mapping from an Agent spec plus its resolved dependencies to
//! the [`RuntimeConfig`] the downstream applier deploys and the [`AgentCard`]
//! published into the routing table.
//!
//! # Rendering Rules
//!
//! - The ModelConfig becomes a [`ModelBlock`] whose API key is a
//!   [`CredentialPlaceholder`]: the workload reads the Secret at deploy time,
//!   the translator never sees a secret value.
//! - Each tool reference is rendered per provider kind (`stdio`, `sse` or
//!   `streamable_http`). Agent-as-tool references become remote agent entries
//!   pointing at the A2A proxy, never at the target workload directly.
//! - The card URL is always `{proxyBaseUrl}/{namespace}/{name}/`.
//!
//! A missing or zero-valued required field yields a [`ValidationError`].
//! Lookups of referenced objects happen before translation, so the
//! translator itself has no retryable failure mode.

use std::collections::{BTreeMap, BTreeSet};
use url::Url;

use crate::domain::agent::{Agent, AgentType, DeclarativeAgentSpec, DeploymentSpec};
use crate::domain::error::ValidationError;
use crate::domain::model_config::{ModelConfig, ModelProvider};
use crate::domain::resource::NamespacedName;
use crate::domain::routing::{proxy_url, AgentCapabilities, AgentCard};
use crate::domain::runtime::{
    AgentRuntimeConfig, CredentialPlaceholder, EnvValue, HeaderValue, ModelBlock, RemoteAgentEntry,
    RuntimeConfig, RuntimeTool, SecretKeyRef,
};
use crate::domain::tool_provider::{
    ClusterLocalMcpServer, ClusterService, LocalTransport, RemoteMcpProtocol, RemoteMcpServer,
    ToolProvider, ToolReference, DEFAULT_MCP_PATH, SERVICE_PATH_ANNOTATION, SERVICE_PORT_ANNOTATION,
    SERVICE_PROTOCOL_ANNOTATION,
};

const DEFAULT_REPLICAS: u32 = 1;
const TEXT_MODE: &str = "text";

/// A tool reference paired with the object it resolved to.
#[derive(Debug, Clone)]
pub enum ResolvedTool {
    Provider {
        reference: ToolReference,
        provider: ToolProvider,
    },
    Agent {
        reference: ToolReference,
        agent: Agent,
    },
}

impl ResolvedTool {
    pub fn reference(&self) -> &ToolReference {
        match self {
            Self::Provider { reference, .. } | Self::Agent { reference, .. } => reference,
        }
    }

    pub fn target_key(&self) -> NamespacedName {
        match self {
            Self::Provider { provider, .. } => provider.metadata().key(),
            Self::Agent { agent, .. } => agent.key(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Translation {
    pub runtime: RuntimeConfig,
    pub card: AgentCard,
}

pub struct SpecTranslator {
    proxy_base_url: String,
}

impl SpecTranslator {
    pub fn new(proxy_base_url: impl Into<String>) -> Self {
        Self {
            proxy_base_url: proxy_base_url.into(),
        }
    }

    pub fn proxy_base_url(&self) -> &str {
        &self.proxy_base_url
    }

    pub fn translate(
        &self,
        agent: &Agent,
        model_config: Option<&ModelConfig>,
        tools: &[ResolvedTool],
    ) -> Result<Translation, ValidationError> {
        let key = agent.key();
        let port = agent.listen_port().ok_or_else(|| ValidationError::MissingField {
            object: key.clone(),
            field: "deployment.port".to_string(),
        })?;

        match agent.spec.agent_type {
            AgentType::Declarative => {
                let spec = agent.declarative().ok_or_else(|| ValidationError::MissingField {
                    object: key.clone(),
                    field: "declarative".to_string(),
                })?;
                self.translate_declarative(agent, spec, port, model_config, tools)
            }
            AgentType::Unmanaged => self.translate_unmanaged(agent, port),
        }
    }

    /// Point a self-advertised card at the proxy instead of the workload.
    pub fn rewrite_card(&self, key: &NamespacedName, mut card: AgentCard) -> AgentCard {
        card.url = proxy_url(&self.proxy_base_url, key);
        card
    }

    fn translate_declarative(
        &self,
        agent: &Agent,
        spec: &DeclarativeAgentSpec,
        port: u16,
        model_config: Option<&ModelConfig>,
        tools: &[ResolvedTool],
    ) -> Result<Translation, ValidationError> {
        let key = agent.key();
        let model_config = model_config.ok_or_else(|| ValidationError::MissingField {
            object: key.clone(),
            field: "declarative.modelConfig".to_string(),
        })?;
        let model = render_model(model_config)?;

        let mut runtime_tools = Vec::new();
        let mut remote_agents = Vec::new();
        let mut seen = BTreeSet::new();
        for tool in tools {
            let name = tool.reference().name.clone();
            if !seen.insert(name.clone()) {
                return Err(ValidationError::InvalidSpec {
                    object: key.clone(),
                    message: format!("tool name '{}' is referenced more than once", name),
                });
            }
            match tool {
                ResolvedTool::Provider { reference, provider } => {
                    runtime_tools.push(render_tool(reference, provider)?);
                }
                ResolvedTool::Agent { agent: target, .. } => {
                    let target_key = target.key();
                    if target_key == key {
                        return Err(ValidationError::SelfReference(key));
                    }
                    remote_agents.push(RemoteAgentEntry {
                        name: target_key.name.clone(),
                        url: proxy_url(&self.proxy_base_url, &target_key),
                        description: target.spec.description.clone(),
                    });
                }
            }
        }

        let mut env = literal_env(&spec.deployment);
        if let Some(placeholder) = &model.api_key {
            env.insert(
                placeholder.env_var.clone(),
                EnvValue::SecretKey(placeholder.secret.clone()),
            );
        }

        let runtime = RuntimeConfig {
            agent: key.clone(),
            port,
            replicas: spec.deployment.replicas.unwrap_or(DEFAULT_REPLICAS),
            image: spec.deployment.image.clone().filter(|i| !i.is_empty()),
            env,
            agent_config: Some(AgentRuntimeConfig {
                name: key.name.clone(),
                description: agent.spec.description.clone(),
                instruction: spec.system_message.clone(),
                model,
                tools: runtime_tools,
                remote_agents,
                stream: spec.stream,
            }),
        };

        let mut card = self.base_card(agent);
        card.capabilities.streaming = spec.stream;
        if let Some(a2a) = &spec.a2a_config {
            card.skills = a2a.skills.clone();
        }

        Ok(Translation { runtime, card })
    }

    fn translate_unmanaged(
        &self,
        agent: &Agent,
        port: u16,
    ) -> Result<Translation, ValidationError> {
        let key = agent.key();
        let unmanaged = agent.spec.unmanaged.as_ref();
        let image = unmanaged
            .map(|u| u.image.clone())
            .filter(|i| !i.is_empty())
            .or_else(|| {
                unmanaged
                    .and_then(|u| u.deployment.image.clone())
                    .filter(|i| !i.is_empty())
            })
            .ok_or_else(|| ValidationError::MissingField {
                object: key.clone(),
                field: "unmanaged.image".to_string(),
            })?;
        let deployment = agent.deployment().cloned().unwrap_or_default();

        let runtime = RuntimeConfig {
            agent: key,
            port,
            replicas: deployment.replicas.unwrap_or(DEFAULT_REPLICAS),
            image: Some(image),
            env: literal_env(&deployment),
            agent_config: None,
        };

        Ok(Translation {
            runtime,
            card: self.base_card(agent),
        })
    }

    fn base_card(&self, agent: &Agent) -> AgentCard {
        let key = agent.key();
        AgentCard {
            name: key.name.clone(),
            description: agent.spec.description.clone(),
            url: proxy_url(&self.proxy_base_url, &key),
            version: agent.metadata.generation.to_string(),
            capabilities: AgentCapabilities::default(),
            default_input_modes: vec![TEXT_MODE.to_string()],
            default_output_modes: vec![TEXT_MODE.to_string()],
            skills: Vec::new(),
        }
    }
}

/// Secrets whose contents the deployed workload reads, sorted and deduplicated.
pub fn secret_dependencies(
    model_config: Option<&ModelConfig>,
    tools: &[ResolvedTool],
) -> Vec<NamespacedName> {
    let mut secrets = BTreeSet::new();
    if let Some(model_config) = model_config {
        if model_config.spec.provider.api_key_env_var().is_some() {
            secrets.extend(model_config.api_key_secret_ref());
        }
    }
    for tool in tools {
        if let ResolvedTool::Provider {
            provider: ToolProvider::Remote(server),
            ..
        } = tool
        {
            secrets.extend(server.header_secrets());
        }
    }
    secrets.into_iter().collect()
}

fn literal_env(deployment: &DeploymentSpec) -> BTreeMap<String, EnvValue> {
    deployment
        .env
        .iter()
        .map(|(name, value)| (name.clone(), EnvValue::Literal { value: value.clone() }))
        .collect()
}

fn render_model(model_config: &ModelConfig) -> Result<ModelBlock, ValidationError> {
    let key = model_config.metadata.key();
    let spec = &model_config.spec;
    let missing = |field: &str| ValidationError::MissingField {
        object: key.clone(),
        field: field.to_string(),
    };

    if spec.model.trim().is_empty() {
        return Err(missing("model"));
    }

    let api_key = match spec.provider.api_key_env_var() {
        Some(env_var) => {
            let secret = spec
                .api_key_secret
                .as_deref()
                .filter(|s| !s.is_empty())
                .ok_or_else(|| missing("apiKeySecret"))?;
            let secret_key = spec
                .api_key_secret_key
                .as_deref()
                .filter(|k| !k.is_empty())
                .ok_or_else(|| missing("apiKeySecretKey"))?;
            Some(CredentialPlaceholder {
                env_var: env_var.to_string(),
                secret: SecretKeyRef {
                    namespace: key.namespace.clone(),
                    name: secret.to_string(),
                    key: secret_key.to_string(),
                },
            })
        }
        None => None,
    };

    let base_url = spec.base_url.clone().filter(|u| !u.is_empty());
    if spec.provider == ModelProvider::AzureOpenAI && base_url.is_none() {
        return Err(missing("baseUrl"));
    }
    if let Some(url) = &base_url {
        Url::parse(url).map_err(|e| ValidationError::InvalidSpec {
            object: key.clone(),
            message: format!("baseUrl '{}' is not a valid URL: {}", url, e),
        })?;
    }

    Ok(ModelBlock {
        provider_type: spec.provider.runtime_type().to_string(),
        model: spec.model.clone(),
        base_url,
        api_key,
        headers: spec.default_headers.clone(),
    })
}

fn render_tool(
    reference: &ToolReference,
    provider: &ToolProvider,
) -> Result<RuntimeTool, ValidationError> {
    match provider {
        ToolProvider::Remote(server) => render_remote(reference, server),
        ToolProvider::ClusterLocal(server) => render_cluster_local(reference, server),
        ToolProvider::Service(service) => render_service(reference, service),
    }
}

fn render_remote(
    reference: &ToolReference,
    server: &RemoteMcpServer,
) -> Result<RuntimeTool, ValidationError> {
    let key = server.metadata.key();
    Url::parse(&server.spec.url).map_err(|e| ValidationError::InvalidSpec {
        object: key.clone(),
        message: format!("url '{}' is not a valid URL: {}", server.spec.url, e),
    })?;

    let mut headers = BTreeMap::new();
    for header in &server.spec.headers_from {
        let value = match (&header.value, &header.value_from) {
            (_, Some(selector)) => HeaderValue::FromSecret(SecretKeyRef {
                namespace: key.namespace.clone(),
                name: selector.name.clone(),
                key: selector.key.clone(),
            }),
            (Some(value), None) => HeaderValue::Literal { value: value.clone() },
            (None, None) => {
                return Err(ValidationError::InvalidSpec {
                    object: key,
                    message: format!("header '{}' has neither value nor valueFrom", header.name),
                })
            }
        };
        headers.insert(header.name.clone(), value);
    }

    let name = reference.name.clone();
    let url = server.spec.url.clone();
    let tools = reference.tool_names.clone();
    Ok(match server.spec.protocol {
        RemoteMcpProtocol::Sse => RuntimeTool::Sse {
            name,
            url,
            headers,
            timeout_seconds: server.spec.timeout_seconds,
            sse_read_timeout_seconds: server.spec.sse_read_timeout_seconds,
            tools,
        },
        RemoteMcpProtocol::StreamableHttp => RuntimeTool::StreamableHttp {
            name,
            url,
            headers,
            timeout_seconds: server.spec.timeout_seconds,
            terminate_on_close: server.spec.terminate_on_close,
            tools,
        },
    })
}

fn render_cluster_local(
    reference: &ToolReference,
    server: &ClusterLocalMcpServer,
) -> Result<RuntimeTool, ValidationError> {
    let key = server.metadata.key();
    match server.spec.transport {
        LocalTransport::Stdio => {
            if server.spec.command.trim().is_empty() {
                return Err(ValidationError::MissingField {
                    object: key,
                    field: "command".to_string(),
                });
            }
            Ok(RuntimeTool::Stdio {
                name: reference.name.clone(),
                command: server.spec.command.clone(),
                args: server.spec.args.clone(),
                env: server.spec.env.clone(),
                tools: reference.tool_names.clone(),
            })
        }
        LocalTransport::Http => {
            let port = server
                .spec
                .port
                .filter(|p| *p != 0)
                .ok_or_else(|| ValidationError::MissingField {
                    object: key.clone(),
                    field: "port".to_string(),
                })?;
            Ok(RuntimeTool::StreamableHttp {
                name: reference.name.clone(),
                url: cluster_url(&key, port, &server.spec.path),
                headers: BTreeMap::new(),
                timeout_seconds: None,
                terminate_on_close: true,
                tools: reference.tool_names.clone(),
            })
        }
    }
}

fn render_service(
    reference: &ToolReference,
    service: &ClusterService,
) -> Result<RuntimeTool, ValidationError> {
    let key = service.metadata.key();
    let annotations = &service.metadata.annotations;

    let port = match annotations.get(SERVICE_PORT_ANNOTATION) {
        Some(raw) => raw.trim().parse::<u16>().map_err(|_| ValidationError::InvalidSpec {
            object: key.clone(),
            message: format!(
                "annotation {} is not a port number: '{}'",
                SERVICE_PORT_ANNOTATION, raw
            ),
        })?,
        None => service_port(service).unwrap_or(0),
    };
    if port == 0 {
        return Err(ValidationError::MissingField {
            object: key,
            field: "ports".to_string(),
        });
    }

    let protocol = match annotations.get(SERVICE_PROTOCOL_ANNOTATION) {
        Some(raw) => RemoteMcpProtocol::parse(raw).ok_or_else(|| ValidationError::InvalidSpec {
            object: key.clone(),
            message: format!(
                "annotation {} has unknown protocol '{}'",
                SERVICE_PROTOCOL_ANNOTATION, raw
            ),
        })?,
        None => RemoteMcpProtocol::StreamableHttp,
    };
    let path = annotations
        .get(SERVICE_PATH_ANNOTATION)
        .map(String::as_str)
        .unwrap_or(DEFAULT_MCP_PATH);
    let url = cluster_url(&key, port, path);

    let name = reference.name.clone();
    let tools = reference.tool_names.clone();
    Ok(match protocol {
        RemoteMcpProtocol::Sse => RuntimeTool::Sse {
            name,
            url,
            headers: BTreeMap::new(),
            timeout_seconds: None,
            sse_read_timeout_seconds: None,
            tools,
        },
        RemoteMcpProtocol::StreamableHttp => RuntimeTool::StreamableHttp {
            name,
            url,
            headers: BTreeMap::new(),
            timeout_seconds: None,
            terminate_on_close: true,
            tools,
        },
    })
}

/// A single port, or the one named or tagged `mcp`.
fn service_port(service: &ClusterService) -> Option<u16> {
    match service.spec.ports.as_slice() {
        [only] => Some(only.port),
        ports => ports
            .iter()
            .find(|p| p.name == "mcp" || p.app_protocol.as_deref() == Some("mcp"))
            .map(|p| p.port),
    }
}

pub(crate) fn cluster_url(key: &NamespacedName, port: u16, path: &str) -> String {
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };
    format!("http://{}.{}:{}{}", key.name, key.namespace, port, path)
}
