// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Tool Server Reconciler
//!
//! Keeps `RemoteMCPServer` and `MCPServer` status current: validates the
//! spec, lists the server's tools over MCP and records them with
//! `Accepted`/`ToolsDiscovered` conditions. Every successful pass asks to be
//! revisited after the refresh interval, so readiness drift that no watch
//! reports is still picked up.
//!
//! Servers the controller cannot talk to directly (stdio transports, legacy
//! SSE endpoints) are accepted with `ToolsDiscovered=Unknown`.

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use crate::application::agent_reconciler::{ReconcileOutcome, ReconcilePhase};
use crate::application::translator::cluster_url;
use crate::domain::error::{ReconcileError, TransientError, ValidationError};
use crate::domain::events::ReconcileEvent;
use crate::domain::namespace_policy::FromNamespaces;
use crate::domain::repository::{ResourceStore, ResourceStoreExt, StoreError};
use crate::domain::resource::{
    set_condition, Condition, ConditionStatus, NamespacedName, ObjectMeta,
};
use crate::domain::tool_provider::{
    LocalTransport, RemoteMcpProtocol, RemoteMcpServer, ToolDiscovery, ToolEndpoint, ToolKind,
    ToolProvider, ToolServerStatus, CONDITION_ACCEPTED, CONDITION_TOOLS_DISCOVERED,
};
use crate::infrastructure::event_bus::EventBus;

const REASON_ACCEPTED: &str = "Accepted";
const REASON_INVALID_SPEC: &str = "InvalidSpec";
const REASON_DISCOVERED: &str = "Discovered";
const REASON_DISCOVERY_FAILED: &str = "DiscoveryFailed";
const REASON_DISCOVERY_UNSUPPORTED: &str = "DiscoveryUnsupported";

pub struct ToolServerReconciler {
    store: Arc<dyn ResourceStore>,
    discovery: Arc<dyn ToolDiscovery>,
    event_bus: EventBus,
    refresh_interval: Duration,
    discovery_timeout: Duration,
}

impl ToolServerReconciler {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        discovery: Arc<dyn ToolDiscovery>,
        event_bus: EventBus,
        refresh_interval: Duration,
        discovery_timeout: Duration,
    ) -> Self {
        Self {
            store,
            discovery,
            event_bus,
            refresh_interval,
            discovery_timeout,
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    pub async fn reconcile(
        &self,
        kind: ToolKind,
        key: &NamespacedName,
        deadline: Instant,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        if !matches!(kind, ToolKind::RemoteMcpServer | ToolKind::ClusterLocalMcpServer) {
            // Services and Agents carry no tool-server status
            return Ok(ReconcileOutcome::finished(ReconcilePhase::Done));
        }

        let provider = match self.store.get_tool_provider(kind, key).await {
            Ok(provider) => provider,
            Err(StoreError::NotFound { .. }) => {
                debug!(kind = %kind, server = %key, "Tool server gone, nothing to reconcile");
                return Ok(ReconcileOutcome::finished(ReconcilePhase::Done));
            }
            Err(err) => {
                return Err(ReconcileError::from(err).context(format!("fetching {} {}", kind, key)))
            }
        };
        let metadata = provider.metadata().clone();

        let endpoint = match self.endpoint_for(&provider).await {
            Ok(endpoint) => endpoint,
            Err(err) if err.is_validation() => {
                let message = err.to_string();
                warn!(kind = %kind, server = %key, error = %message, "Tool server rejected");
                let mut status = current_status(&provider);
                set(
                    &mut status,
                    &metadata,
                    CONDITION_ACCEPTED,
                    ConditionStatus::False,
                    REASON_INVALID_SPEC,
                    &message,
                );
                set(
                    &mut status,
                    &metadata,
                    CONDITION_TOOLS_DISCOVERED,
                    ConditionStatus::False,
                    REASON_INVALID_SPEC,
                    &message,
                );
                self.persist(kind, key, status).await?;
                return Ok(ReconcileOutcome::rejected(ReconcilePhase::ValidateReferences));
            }
            Err(err) => return Err(err.context(format!("{} {}", kind, key))),
        };

        let mut status = current_status(&provider);
        set(
            &mut status,
            &metadata,
            CONDITION_ACCEPTED,
            ConditionStatus::True,
            REASON_ACCEPTED,
            "spec is valid",
        );

        let Some(endpoint) = endpoint else {
            set(
                &mut status,
                &metadata,
                CONDITION_TOOLS_DISCOVERED,
                ConditionStatus::Unknown,
                REASON_DISCOVERY_UNSUPPORTED,
                "tools are discovered by the agent runtime for this transport",
            );
            status.discovered_tools.clear();
            self.persist(kind, key, status).await?;
            return Ok(ReconcileOutcome::requeue(ReconcilePhase::Done, self.refresh_interval));
        };

        if Instant::now() >= deadline {
            return Err(ReconcileError::from(TransientError::DeadlineExceeded)
                .context(format!("{} {}", kind, key)));
        }

        match self.discovery.list_tools(&endpoint).await {
            Ok(tools) => {
                let message = format!("{} tools available", tools.len());
                set(
                    &mut status,
                    &metadata,
                    CONDITION_TOOLS_DISCOVERED,
                    ConditionStatus::True,
                    REASON_DISCOVERED,
                    &message,
                );
                let tool_count = tools.len();
                status.discovered_tools = tools;
                self.persist(kind, key, status).await?;

                self.event_bus.publish(ReconcileEvent::ToolServerRefreshed {
                    kind,
                    server: key.clone(),
                    tool_count,
                    refreshed_at: Utc::now(),
                });
                info!(kind = %kind, server = %key, tools = tool_count, "Tool server refreshed");
                Ok(ReconcileOutcome::requeue(ReconcilePhase::Done, self.refresh_interval))
            }
            Err(err) => {
                let message = err.to_string();
                set(
                    &mut status,
                    &metadata,
                    CONDITION_TOOLS_DISCOVERED,
                    ConditionStatus::False,
                    REASON_DISCOVERY_FAILED,
                    &message,
                );
                self.persist(kind, key, status).await?;
                Err(ReconcileError::from(err)
                    .context(format!("discovering tools of {} {}", kind, key)))
            }
        }
    }

    /// `Ok(None)` when the controller cannot list tools for this server.
    async fn endpoint_for(
        &self,
        provider: &ToolProvider,
    ) -> Result<Option<ToolEndpoint>, ReconcileError> {
        match provider {
            ToolProvider::Remote(server) => {
                validate_remote(server)?;
                if server.spec.protocol == RemoteMcpProtocol::Sse {
                    return Ok(None);
                }
                let headers = self.resolve_headers(server).await?;
                let timeout = server
                    .spec
                    .timeout_seconds
                    .map(Duration::from_secs)
                    .map_or(self.discovery_timeout, |t| t.min(self.discovery_timeout));
                Ok(Some(ToolEndpoint {
                    url: server.spec.url.clone(),
                    protocol: server.spec.protocol,
                    headers,
                    timeout,
                }))
            }
            ToolProvider::ClusterLocal(server) => {
                let key = server.metadata.key();
                match server.spec.transport {
                    LocalTransport::Stdio => {
                        if server.spec.command.trim().is_empty() {
                            return Err(ValidationError::MissingField {
                                object: key,
                                field: "command".to_string(),
                            }
                            .into());
                        }
                        Ok(None)
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
                        Ok(Some(ToolEndpoint {
                            url: cluster_url(&key, port, &server.spec.path),
                            protocol: RemoteMcpProtocol::StreamableHttp,
                            headers: BTreeMap::new(),
                            timeout: self.discovery_timeout,
                        }))
                    }
                }
            }
            ToolProvider::Service(_) => Ok(None),
        }
    }

    /// Header values for discovery calls. Unlike the runtime config, these
    /// carry the secret values themselves and are never persisted.
    async fn resolve_headers(
        &self,
        server: &RemoteMcpServer,
    ) -> Result<BTreeMap<String, String>, ReconcileError> {
        let mut headers = BTreeMap::new();
        for header in &server.spec.headers_from {
            let value = match (&header.value, &header.value_from) {
                (_, Some(selector)) => {
                    let secret_key = NamespacedName::new(
                        server.metadata.namespace.clone(),
                        selector.name.clone(),
                    );
                    let secret = self
                        .store
                        .get_secret(&secret_key)
                        .await
                        .map_err(|e| {
                            ReconcileError::from(e)
                                .context(format!("resolving header {}", header.name))
                        })?;
                    let invalid = |message: String| ValidationError::InvalidSecret {
                        secret: secret_key.clone(),
                        message,
                    };
                    let data = secret.decoded_data().map_err(|e| invalid(e.to_string()))?;
                    let bytes = data
                        .get(&selector.key)
                        .ok_or_else(|| invalid(format!("key '{}' not found", selector.key)))?;
                    String::from_utf8(bytes.clone())
                        .map_err(|_| invalid(format!("key '{}' is not valid UTF-8", selector.key)))?
                }
                (Some(value), None) => value.clone(),
                (None, None) => {
                    return Err(ValidationError::InvalidSpec {
                        object: server.metadata.key(),
                        message: format!(
                            "header '{}' has neither value nor valueFrom",
                            header.name
                        ),
                    }
                    .into())
                }
            };
            headers.insert(header.name.clone(), value);
        }
        Ok(headers)
    }

    async fn persist(
        &self,
        kind: ToolKind,
        key: &NamespacedName,
        status: ToolServerStatus,
    ) -> Result<(), ReconcileError> {
        self.store
            .update_tool_server_status(kind, key, status)
            .await
            .map_err(|e| {
                ReconcileError::from(e).context(format!("writing status of {} {}", kind, key))
            })
    }
}

fn validate_remote(server: &RemoteMcpServer) -> Result<(), ValidationError> {
    let key = server.metadata.key();
    let url = Url::parse(&server.spec.url).map_err(|e| ValidationError::InvalidSpec {
        object: key.clone(),
        message: format!("url '{}' is not a valid URL: {}", server.spec.url, e),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ValidationError::InvalidSpec {
            object: key,
            message: format!("url scheme '{}' is not http or https", url.scheme()),
        });
    }

    if let Some(policy) = &server.spec.allowed_namespaces {
        if policy.from == FromNamespaces::Selector {
            let selector = policy.selector.as_ref().ok_or_else(|| ValidationError::InvalidSpec {
                object: key.clone(),
                message: "allowedNamespaces.from is Selector but no selector is set".to_string(),
            })?;
            selector.validate().map_err(|message| ValidationError::InvalidSpec {
                object: key.clone(),
                message: format!("allowedNamespaces.selector: {}", message),
            })?;
        }
    }
    Ok(())
}

fn current_status(provider: &ToolProvider) -> ToolServerStatus {
    match provider {
        ToolProvider::Remote(server) => server.status.clone(),
        ToolProvider::ClusterLocal(server) => server.status.clone(),
        ToolProvider::Service(_) => ToolServerStatus::default(),
    }
}

fn set(
    status: &mut ToolServerStatus,
    metadata: &ObjectMeta,
    condition_type: &str,
    condition_status: ConditionStatus,
    reason: &str,
    message: &str,
) {
    set_condition(
        &mut status.conditions,
        Condition::new(condition_type, condition_status, reason, message, metadata.generation),
    );
    status.observed_generation = metadata.generation;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::resource::find_condition;
    use crate::domain::tool_provider::{DiscoveredTool, DiscoveryError};
    use crate::infrastructure::repositories::manifest_loader::ManifestLoader;
    use crate::infrastructure::repositories::InMemoryResourceStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Records the endpoints it was asked about.
    #[derive(Default)]
    struct FakeDiscovery {
        calls: Mutex<Vec<ToolEndpoint>>,
        fail: bool,
    }

    #[async_trait]
    impl ToolDiscovery for FakeDiscovery {
        async fn list_tools(
            &self,
            endpoint: &ToolEndpoint,
        ) -> Result<Vec<DiscoveredTool>, DiscoveryError> {
            self.calls.lock().push(endpoint.clone());
            if self.fail {
                return Err(DiscoveryError::Status {
                    url: endpoint.url.clone(),
                    status: 502,
                });
            }
            Ok(vec![DiscoveredTool {
                name: "search".into(),
                description: "Web search".into(),
            }])
        }
    }

    const MANIFESTS: &str = r#"
kind: Secret
metadata: { name: tools-token, namespace: ns2 }
stringData: { token: s3cret }
---
kind: RemoteMCPServer
metadata: { name: tools, namespace: ns2 }
spec:
  url: https://tools.example.com/mcp
  timeoutSeconds: 5
  headersFrom:
    - name: Authorization
      valueFrom: { name: tools-token, key: token }
---
kind: RemoteMCPServer
metadata: { name: legacy, namespace: ns2 }
spec:
  url: https://legacy.example.com/sse
  protocol: SSE
---
kind: RemoteMCPServer
metadata: { name: broken, namespace: ns2 }
spec:
  url: "not a url"
---
kind: MCPServer
metadata: { name: fs, namespace: ns1 }
spec:
  transport: http
  port: 3000
"#;

    fn setup(discovery: Arc<FakeDiscovery>) -> (Arc<InMemoryResourceStore>, ToolServerReconciler) {
        let store = Arc::new(InMemoryResourceStore::new());
        for resource in ManifestLoader::parse_str(MANIFESTS).unwrap() {
            store.apply(resource).unwrap();
        }
        let reconciler = ToolServerReconciler::new(
            store.clone(),
            discovery,
            EventBus::new(16),
            Duration::from_secs(60),
            Duration::from_secs(10),
        );
        (store, reconciler)
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(30)
    }

    async fn remote_status(store: &InMemoryResourceStore, name: &str) -> ToolServerStatus {
        match store
            .get_tool_provider(ToolKind::RemoteMcpServer, &NamespacedName::new("ns2", name))
            .await
            .unwrap()
        {
            ToolProvider::Remote(server) => server.status,
            other => panic!("unexpected provider {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_discovery_success_requeues_at_refresh_interval() {
        let discovery = Arc::new(FakeDiscovery::default());
        let (store, reconciler) = setup(discovery.clone());
        let key = NamespacedName::new("ns2", "tools");

        let outcome = reconciler
            .reconcile(ToolKind::RemoteMcpServer, &key, deadline())
            .await
            .unwrap();
        assert_eq!(outcome.requeue_after, Some(Duration::from_secs(60)));

        let calls = discovery.calls.lock().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].headers["Authorization"], "s3cret");
        assert_eq!(calls[0].timeout, Duration::from_secs(5));

        let status = remote_status(&store, "tools").await;
        assert_eq!(status.discovered_tools.len(), 1);
        assert_eq!(
            find_condition(&status.conditions, CONDITION_TOOLS_DISCOVERED).unwrap().status,
            ConditionStatus::True
        );
    }

    #[tokio::test]
    async fn test_discovery_failure_is_transient() {
        let discovery = Arc::new(FakeDiscovery {
            fail: true,
            ..Default::default()
        });
        let (store, reconciler) = setup(discovery);
        let err = reconciler
            .reconcile(ToolKind::RemoteMcpServer, &NamespacedName::new("ns2", "tools"), deadline())
            .await
            .unwrap_err();
        assert!(err.is_transient());

        let status = remote_status(&store, "tools").await;
        let condition = find_condition(&status.conditions, CONDITION_TOOLS_DISCOVERED).unwrap();
        assert_eq!(condition.status, ConditionStatus::False);
        assert_eq!(condition.reason, REASON_DISCOVERY_FAILED);
    }

    #[tokio::test]
    async fn test_sse_server_is_accepted_without_discovery() {
        let discovery = Arc::new(FakeDiscovery::default());
        let (store, reconciler) = setup(discovery.clone());
        let outcome = reconciler
            .reconcile(ToolKind::RemoteMcpServer, &NamespacedName::new("ns2", "legacy"), deadline())
            .await
            .unwrap();
        assert!(outcome.requeue_after.is_some());
        assert!(discovery.calls.lock().is_empty());

        let status = remote_status(&store, "legacy").await;
        assert_eq!(
            find_condition(&status.conditions, CONDITION_TOOLS_DISCOVERED).unwrap().status,
            ConditionStatus::Unknown
        );
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected_without_retry() {
        let discovery = Arc::new(FakeDiscovery::default());
        let (store, reconciler) = setup(discovery);
        let outcome = reconciler
            .reconcile(ToolKind::RemoteMcpServer, &NamespacedName::new("ns2", "broken"), deadline())
            .await
            .unwrap();
        assert!(outcome.is_rejected());
        assert_eq!(outcome.requeue_after, None);

        let status = remote_status(&store, "broken").await;
        assert_eq!(
            find_condition(&status.conditions, CONDITION_ACCEPTED).unwrap().status,
            ConditionStatus::False
        );
    }

    #[tokio::test]
    async fn test_cluster_local_http_server_endpoint() {
        let discovery = Arc::new(FakeDiscovery::default());
        let (_store, reconciler) = setup(discovery.clone());
        reconciler
            .reconcile(
                ToolKind::ClusterLocalMcpServer,
                &NamespacedName::new("ns1", "fs"),
                deadline(),
            )
            .await
            .unwrap();
        assert_eq!(discovery.calls.lock()[0].url, "http://fs.ns1:3000/mcp");
    }
}
