// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Watch Event Mapping
//!
//! Turns `(kind, key, change)` notifications from the watch layer into
//! reconcile requests. Mapping happens in two steps:
//!
//! 1. [`EventMapper::direct_requests`] is pure and runs inline on the watch
//!    loop: the changed object itself (Agents, tool servers) plus a deferred
//!    [`ReconcileRequest::Propagate`] item.
//! 2. [`EventMapper::dependents`] runs on a worker when the propagate item is
//!    dequeued, since finding dependents lists Agents from the store.
//!
//! Duplicate requests are harmless: the work queue collapses pending
//! duplicates and reconciliation is idempotent.

use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::application::dependency_resolver::DependencyResolver;
use crate::domain::events::{ReconcileEvent, WatchEvent};
use crate::domain::repository::StoreError;
use crate::domain::resource::{NamespacedName, ResourceKind};
use crate::domain::tool_provider::ToolKind;
use crate::infrastructure::event_bus::EventBus;

/// Unit of work for the controller's queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReconcileRequest {
    Agent(NamespacedName),
    ToolServer(ToolKind, NamespacedName),
    /// Re-enqueue every Agent depending on the changed object
    Propagate(WatchEvent),
}

impl ReconcileRequest {
    /// Metrics label for the reconciler handling this request.
    pub fn controller(&self) -> &'static str {
        match self {
            Self::Agent(_) => "agent",
            Self::ToolServer(..) => "tool_server",
            Self::Propagate(_) => "propagation",
        }
    }
}

impl fmt::Display for ReconcileRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Agent(key) => write!(f, "Agent {}", key),
            Self::ToolServer(kind, key) => write!(f, "{} {}", kind, key),
            Self::Propagate(event) => write!(f, "dependents of {} {}", event.kind, event.key),
        }
    }
}

pub struct EventMapper {
    resolver: Arc<DependencyResolver>,
    event_bus: EventBus,
}

impl EventMapper {
    pub fn new(resolver: Arc<DependencyResolver>, event_bus: EventBus) -> Self {
        Self { resolver, event_bus }
    }

    pub fn direct_requests(event: &WatchEvent) -> Vec<ReconcileRequest> {
        let propagate = ReconcileRequest::Propagate(event.clone());
        match event.kind {
            ResourceKind::Agent => vec![ReconcileRequest::Agent(event.key.clone()), propagate],
            ResourceKind::RemoteMcpServer | ResourceKind::McpServer => {
                let mut requests = Vec::with_capacity(2);
                if let Some(kind) = ToolKind::from_resource_kind(event.kind) {
                    requests.push(ReconcileRequest::ToolServer(kind, event.key.clone()));
                }
                requests.push(propagate);
                requests
            }
            ResourceKind::Service
            | ResourceKind::ModelConfig
            | ResourceKind::Secret
            | ResourceKind::Namespace => vec![propagate],
        }
    }

    /// Agent requests for everything depending on the changed object.
    pub async fn dependents(
        &self,
        event: &WatchEvent,
    ) -> Result<Vec<ReconcileRequest>, StoreError> {
        let mut agents = self.resolver.find_dependents(event.kind, &event.key).await?;
        if event.kind == ResourceKind::Agent {
            agents.remove(&event.key);
        }
        if agents.is_empty() {
            return Ok(Vec::new());
        }

        let agents: Vec<NamespacedName> = agents.into_iter().collect();
        debug!(
            kind = %event.kind,
            source = %event.key,
            count = agents.len(),
            "Enqueueing dependents"
        );
        self.event_bus.publish(ReconcileEvent::DependentsEnqueued {
            kind: event.kind,
            source: event.key.clone(),
            agents: agents.clone(),
            enqueued_at: Utc::now(),
        });
        Ok(agents.into_iter().map(ReconcileRequest::Agent).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::ChangeType;
    use crate::infrastructure::repositories::manifest_loader::ManifestLoader;
    use crate::infrastructure::repositories::InMemoryResourceStore;

    const MANIFESTS: &str = r#"
kind: Agent
metadata: { name: a, namespace: ns1 }
spec:
  declarative:
    modelConfig: gpt
    tools:
      - { kind: Agent, name: helper }
      - { kind: MCPServer, name: fs }
---
kind: Agent
metadata: { name: helper, namespace: ns1 }
spec:
  declarative:
    modelConfig: gpt
"#;

    fn event(kind: ResourceKind, namespace: &str, name: &str, change: ChangeType) -> WatchEvent {
        WatchEvent::new(kind, NamespacedName::new(namespace, name), change)
    }

    fn mapper() -> (EventMapper, EventBus) {
        let store = InMemoryResourceStore::new();
        for resource in ManifestLoader::parse_str(MANIFESTS).unwrap() {
            store.apply(resource).unwrap();
        }
        let bus = EventBus::new(16);
        let resolver = Arc::new(DependencyResolver::new(Arc::new(store)));
        (EventMapper::new(resolver, bus.clone()), bus)
    }

    #[test]
    fn test_direct_requests_per_kind() {
        let agent = event(ResourceKind::Agent, "ns1", "a", ChangeType::Modified);
        let requests = EventMapper::direct_requests(&agent);
        assert_eq!(requests[0], ReconcileRequest::Agent(NamespacedName::new("ns1", "a")));
        assert!(matches!(requests[1], ReconcileRequest::Propagate(_)));

        let server = event(ResourceKind::McpServer, "ns1", "fs", ChangeType::Added);
        assert_eq!(
            EventMapper::direct_requests(&server)[0],
            ReconcileRequest::ToolServer(
                ToolKind::ClusterLocalMcpServer,
                NamespacedName::new("ns1", "fs")
            )
        );

        let secret = event(ResourceKind::Secret, "ns1", "key", ChangeType::Modified);
        assert_eq!(EventMapper::direct_requests(&secret).len(), 1);
    }

    #[tokio::test]
    async fn test_agent_change_enqueues_referencing_agents() {
        let (mapper, bus) = mapper();
        let mut events = bus.subscribe();
        let event = event(ResourceKind::Agent, "ns1", "helper", ChangeType::Modified);

        let direct = EventMapper::direct_requests(&event);
        assert_eq!(direct[0], ReconcileRequest::Agent(NamespacedName::new("ns1", "helper")));

        // The changed agent itself is never among its dependents
        let requests = mapper.dependents(&event).await.unwrap();
        assert_eq!(requests, vec![ReconcileRequest::Agent(NamespacedName::new("ns1", "a"))]);
        assert!(matches!(
            events.recv().await.unwrap(),
            ReconcileEvent::DependentsEnqueued { ref agents, .. } if agents.len() == 1
        ));
    }

    #[tokio::test]
    async fn test_self_referencing_agent_is_not_its_own_dependent() {
        let store = InMemoryResourceStore::new();
        let manifest = r#"
kind: Agent
metadata: { name: loop, namespace: ns1 }
spec:
  declarative:
    modelConfig: gpt
    tools:
      - { kind: Agent, name: loop }
"#;
        for resource in ManifestLoader::parse_str(manifest).unwrap() {
            store.apply(resource).unwrap();
        }
        let bus = EventBus::new(16);
        let mut events = bus.subscribe();
        let mapper = EventMapper::new(Arc::new(DependencyResolver::new(Arc::new(store))), bus);

        let event = event(ResourceKind::Agent, "ns1", "loop", ChangeType::Modified);
        assert!(mapper.dependents(&event).await.unwrap().is_empty());
        assert!(events.drain().is_empty());
    }

    #[tokio::test]
    async fn test_tool_server_change_enqueues_users() {
        let (mapper, _bus) = mapper();
        let event = event(ResourceKind::McpServer, "ns1", "fs", ChangeType::Deleted);
        let requests = mapper.dependents(&event).await.unwrap();
        assert_eq!(requests, vec![ReconcileRequest::Agent(NamespacedName::new("ns1", "a"))]);
    }
}
