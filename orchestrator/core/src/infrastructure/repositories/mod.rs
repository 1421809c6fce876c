// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! In-memory implementation of the cluster object store defined in the
//! domain layer, plus the YAML manifest loader that feeds it.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Hold declarative resources and emit watch events
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Store Semantics
//!
//! The store mimics the cluster API closely enough for the reconcilers:
//!
//! 1. **Generation**: starts at 1 and is bumped only when the spec changes;
//!    metadata-only edits (labels, annotations) keep it.
//! 2. **Status**: owned by the orchestrator. `apply` never overwrites it, and
//!    status writes do not emit watch events.
//! 3. **Deletion**: an Agent with finalizers gets a deletion timestamp and
//!    stays until its last finalizer is removed.
//! 4. **Outages**: `set_unavailable` makes every call fail with
//!    `StoreError::Unavailable` until cleared.

pub mod manifest_loader;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tokio::sync::broadcast;
use tracing::debug;

use crate::domain::agent::AgentStatus;
use crate::domain::events::{ChangeType, WatchEvent};
use crate::domain::repository::{Resource, ResourceStore, StoreError};
use crate::domain::resource::{NamespacedName, ObjectMeta, ResourceKind, DEFAULT_NAMESPACE};
use crate::domain::tool_provider::{ToolKind, ToolServerStatus};

type ObjectKey = (ResourceKind, NamespacedName);

pub struct InMemoryResourceStore {
    objects: RwLock<BTreeMap<ObjectKey, Resource>>,
    unavailable: RwLock<Option<String>>,
    events: broadcast::Sender<WatchEvent>,
}

impl InMemoryResourceStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            objects: RwLock::new(BTreeMap::new()),
            unavailable: RwLock::new(None),
            events,
        }
    }

    /// Watch events for every subsequent add, spec/metadata change and delete.
    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }

    /// Simulate a cluster API outage; `None` restores service.
    pub fn set_unavailable(&self, reason: Option<&str>) {
        *self.unavailable.write() = reason.map(str::to_string);
    }

    /// Create or update an object, returning the change it caused.
    pub fn apply(&self, mut resource: Resource) -> Result<Option<ChangeType>, StoreError> {
        self.check_available()?;
        normalize_namespace(&mut resource);
        let key = (resource.kind(), resource.key());

        let change = {
            let mut objects = self.objects.write();
            match objects.get(&key) {
                None => {
                    let metadata = resource.metadata_mut();
                    metadata.generation = 1;
                    metadata.deletion_timestamp = None;
                    objects.insert(key.clone(), resource);
                    Some(ChangeType::Added)
                }
                Some(existing) => {
                    carry_server_state(existing, &mut resource);
                    if *existing == resource {
                        None
                    } else {
                        let spec_changed = spec_of(existing) != spec_of(&resource);
                        let generation = existing.metadata().generation;
                        resource.metadata_mut().generation = if spec_changed {
                            generation + 1
                        } else {
                            generation
                        };
                        objects.insert(key.clone(), resource);
                        Some(ChangeType::Modified)
                    }
                }
            }
        };

        if let Some(change) = change {
            debug!(kind = %key.0, key = %key.1, ?change, "Store object changed");
            self.emit(key.0, key.1, change);
        }
        Ok(change)
    }

    /// Delete an object. Agents holding finalizers are only marked deleting.
    pub fn delete(
        &self,
        kind: ResourceKind,
        key: &NamespacedName,
    ) -> Result<ChangeType, StoreError> {
        self.check_available()?;
        let object_key = (kind, key.clone());
        let change = {
            let mut objects = self.objects.write();
            let resource = objects.get_mut(&object_key).ok_or_else(|| StoreError::NotFound {
                kind,
                key: key.clone(),
            })?;
            let metadata = resource.metadata_mut();
            if metadata.finalizers.is_empty() {
                objects.remove(&object_key);
                ChangeType::Deleted
            } else {
                if metadata.deletion_timestamp.is_none() {
                    metadata.deletion_timestamp = Some(Utc::now());
                }
                ChangeType::Modified
            }
        };
        self.emit(kind, key.clone(), change);
        Ok(change)
    }

    pub fn contains(&self, kind: ResourceKind, key: &NamespacedName) -> bool {
        self.objects.read().contains_key(&(kind, key.clone()))
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        match self.unavailable.read().as_ref() {
            Some(reason) => Err(StoreError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }

    fn emit(&self, kind: ResourceKind, key: NamespacedName, change: ChangeType) {
        // No subscribers is fine; the controller may not be running.
        let _ = self.events.send(WatchEvent::new(kind, key, change));
    }

    fn update<F>(
        &self,
        kind: ResourceKind,
        key: &NamespacedName,
        mutate: F,
    ) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Resource) -> Result<(), StoreError>,
    {
        self.check_available()?;
        let mut objects = self.objects.write();
        let resource = objects
            .get_mut(&(kind, key.clone()))
            .ok_or_else(|| StoreError::NotFound { kind, key: key.clone() })?;
        mutate(resource)
    }
}

impl Default for InMemoryResourceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceStore for InMemoryResourceStore {
    async fn get(&self, kind: ResourceKind, key: &NamespacedName) -> Result<Resource, StoreError> {
        self.check_available()?;
        self.objects
            .read()
            .get(&(kind, key.clone()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound { kind, key: key.clone() })
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
    ) -> Result<Vec<Resource>, StoreError> {
        self.check_available()?;
        Ok(self
            .objects
            .read()
            .iter()
            .filter(|((k, key), _)| *k == kind && namespace.is_none_or(|ns| key.namespace == ns))
            .map(|(_, resource)| resource.clone())
            .collect())
    }

    async fn update_agent_status(
        &self,
        key: &NamespacedName,
        status: AgentStatus,
    ) -> Result<(), StoreError> {
        self.update(ResourceKind::Agent, key, |resource| match resource {
            Resource::Agent(agent) => {
                agent.status = status;
                Ok(())
            }
            other => Err(kind_mismatch(key, ResourceKind::Agent, other)),
        })
    }

    async fn update_agent_finalizers(
        &self,
        key: &NamespacedName,
        finalizers: Vec<String>,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        let object_key = (ResourceKind::Agent, key.clone());
        let removed = {
            let mut objects = self.objects.write();
            let resource = objects.get_mut(&object_key).ok_or_else(|| StoreError::NotFound {
                kind: ResourceKind::Agent,
                key: key.clone(),
            })?;
            let metadata = resource.metadata_mut();
            metadata.finalizers = finalizers;
            if metadata.is_deleting() && metadata.finalizers.is_empty() {
                objects.remove(&object_key);
                true
            } else {
                false
            }
        };
        if removed {
            self.emit(ResourceKind::Agent, key.clone(), ChangeType::Deleted);
        }
        Ok(())
    }

    async fn update_tool_server_status(
        &self,
        kind: ToolKind,
        key: &NamespacedName,
        status: ToolServerStatus,
    ) -> Result<(), StoreError> {
        let resource_kind = kind.resource_kind();
        self.update(resource_kind, key, |resource| match resource {
            Resource::RemoteMcpServer(server) => {
                server.status = status;
                Ok(())
            }
            Resource::McpServer(server) => {
                server.status = status;
                Ok(())
            }
            other => Err(kind_mismatch(key, resource_kind, other)),
        })
    }
}

fn kind_mismatch(key: &NamespacedName, expected: ResourceKind, actual: &Resource) -> StoreError {
    StoreError::KindMismatch {
        key: key.clone(),
        expected,
        actual: actual.kind(),
    }
}

fn normalize_namespace(resource: &mut Resource) {
    let namespaced = resource.kind().is_namespaced();
    let metadata = resource.metadata_mut();
    if !namespaced {
        metadata.namespace.clear();
    } else if metadata.namespace.is_empty() {
        metadata.namespace = DEFAULT_NAMESPACE.to_string();
    }
}

/// Copy the fields the store owns from the stored object onto an update.
fn carry_server_state(existing: &Resource, incoming: &mut Resource) {
    let stored = existing.metadata();
    let metadata = incoming.metadata_mut();
    metadata.generation = stored.generation;
    metadata.deletion_timestamp = stored.deletion_timestamp;
    metadata.finalizers = stored.finalizers.clone();

    match (existing, incoming) {
        (Resource::Agent(old), Resource::Agent(new)) => new.status = old.status.clone(),
        (Resource::RemoteMcpServer(old), Resource::RemoteMcpServer(new)) => {
            new.status = old.status.clone()
        }
        (Resource::McpServer(old), Resource::McpServer(new)) => new.status = old.status.clone(),
        _ => {}
    }
}

/// The object with metadata and status blanked, for spec comparisons.
fn spec_of(resource: &Resource) -> Resource {
    let mut spec = resource.clone();
    *spec.metadata_mut() = ObjectMeta::default();
    match &mut spec {
        Resource::Agent(agent) => agent.status = AgentStatus::default(),
        Resource::RemoteMcpServer(server) => server.status = ToolServerStatus::default(),
        Resource::McpServer(server) => server.status = ToolServerStatus::default(),
        _ => {}
    }
    spec
}
