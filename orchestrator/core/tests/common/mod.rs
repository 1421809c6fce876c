// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Shared wiring for the control-plane integration tests: an in-memory
//! store and applier, an upstream factory that records endpoints, and a
//! tool discovery stub.

#![allow(dead_code)]

use agentmesh_core::application::agent_reconciler::ReconcileOutcome;
use agentmesh_core::application::control_plane::{ControlPlane, ControlPlaneAdapters};
use agentmesh_core::domain::agent::Agent;
use agentmesh_core::domain::controller_config::ControllerConfigManifest;
use agentmesh_core::domain::error::ReconcileError;
use agentmesh_core::domain::repository::ResourceStoreExt;
use agentmesh_core::domain::resource::{find_condition, Condition, NamespacedName};
use agentmesh_core::domain::tool_provider::{
    DiscoveredTool, DiscoveryError, ToolDiscovery, ToolEndpoint,
};
use agentmesh_core::domain::upstream::{
    AuthHook, Principal, UpstreamClient, UpstreamClientFactory, UpstreamError, UpstreamRequest,
    UpstreamResponse,
};
use agentmesh_core::infrastructure::downstream::InMemoryDeploymentApplier;
use agentmesh_core::infrastructure::repositories::manifest_loader::ManifestLoader;
use agentmesh_core::infrastructure::repositories::InMemoryResourceStore;
use agentmesh_core::infrastructure::upstream_client::ForwardingAuthHook;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub const PROXY: &str = "http://proxy.test/api/a2a";

pub struct RecordingClient {
    endpoint: String,
}

#[async_trait]
impl UpstreamClient for RecordingClient {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send(
        &self,
        request: UpstreamRequest,
        _principal: &Principal,
    ) -> Result<UpstreamResponse, UpstreamError> {
        Ok(UpstreamResponse {
            status: 200,
            body: serde_json::json!({ "echo": request.body, "endpoint": self.endpoint }),
        })
    }
}

#[derive(Default)]
pub struct RecordingClientFactory {
    pub endpoints: Mutex<Vec<String>>,
}

impl UpstreamClientFactory for RecordingClientFactory {
    fn new_client(
        &self,
        endpoint: &str,
        _auth_hook: Arc<dyn AuthHook>,
    ) -> Result<Arc<dyn UpstreamClient>, UpstreamError> {
        self.endpoints.lock().push(endpoint.to_string());
        Ok(Arc::new(RecordingClient {
            endpoint: endpoint.to_string(),
        }))
    }
}

/// Discovery stub; fails while `failing` is set.
#[derive(Default)]
pub struct StubDiscovery {
    pub failing: Mutex<bool>,
    pub calls: Mutex<Vec<String>>,
}

#[async_trait]
impl ToolDiscovery for StubDiscovery {
    async fn list_tools(
        &self,
        endpoint: &ToolEndpoint,
    ) -> Result<Vec<DiscoveredTool>, DiscoveryError> {
        self.calls.lock().push(endpoint.url.clone());
        if *self.failing.lock() {
            return Err(DiscoveryError::Unreachable {
                url: endpoint.url.clone(),
                message: "connection refused".to_string(),
            });
        }
        Ok(vec![DiscoveredTool {
            name: "search".to_string(),
            description: "Search the index".to_string(),
        }])
    }
}

pub struct Mesh {
    pub store: Arc<InMemoryResourceStore>,
    pub applier: Arc<InMemoryDeploymentApplier>,
    pub clients: Arc<RecordingClientFactory>,
    pub discovery: Arc<StubDiscovery>,
    pub plane: ControlPlane,
}

impl Mesh {
    pub fn new(manifests: &str) -> Self {
        Self::with_config(manifests, |_| {})
    }

    pub fn with_config(
        manifests: &str,
        configure: impl FnOnce(&mut ControllerConfigManifest),
    ) -> Self {
        let mut config = ControllerConfigManifest::default();
        config.spec.a2a_proxy_base_url = PROXY.to_string();
        configure(&mut config);

        let store = Arc::new(InMemoryResourceStore::new());
        apply_yaml(&store, manifests);
        let applier = Arc::new(InMemoryDeploymentApplier::new());
        let clients = Arc::new(RecordingClientFactory::default());
        let discovery = Arc::new(StubDiscovery::default());

        let plane = ControlPlane::new(
            &config,
            ControlPlaneAdapters {
                store: store.clone(),
                applier: applier.clone(),
                clients: clients.clone(),
                discovery: discovery.clone(),
                auth_hook: Arc::new(ForwardingAuthHook::default()),
            },
        );

        Self {
            store,
            applier,
            clients,
            discovery,
            plane,
        }
    }

    pub async fn reconcile(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        self.plane
            .agents
            .reconcile(&NamespacedName::new(namespace, name), deadline())
            .await
    }

    pub async fn agent(&self, namespace: &str, name: &str) -> Agent {
        self.store
            .get_agent(&NamespacedName::new(namespace, name))
            .await
            .expect("agent exists")
    }

    pub async fn condition(&self, namespace: &str, name: &str, condition_type: &str) -> Condition {
        let agent = self.agent(namespace, name).await;
        find_condition(&agent.status.conditions, condition_type)
            .cloned()
            .unwrap_or_else(|| {
                panic!("condition {} missing on {}/{}", condition_type, namespace, name)
            })
    }

    pub fn routed(&self, namespace: &str, name: &str) -> bool {
        self.plane.routing.get(&NamespacedName::new(namespace, name)).is_some()
    }

    /// Process queued requests until the queue is idle.
    pub async fn drain(&self) -> usize {
        let queue = self.plane.controller.queue().clone();
        let mut processed = 0;
        while !queue.is_empty() {
            if self.plane.controller.process_next().await.is_none() {
                break;
            }
            processed += 1;
        }
        processed
    }
}

pub fn apply_yaml(store: &InMemoryResourceStore, manifests: &str) {
    for resource in ManifestLoader::parse_str(manifests).expect("fixture manifests parse") {
        store.apply(resource).expect("fixture applies");
    }
}

pub fn deadline() -> Instant {
    Instant::now() + Duration::from_secs(30)
}

pub fn key(namespace: &str, name: &str) -> NamespacedName {
    NamespacedName::new(namespace, name)
}
