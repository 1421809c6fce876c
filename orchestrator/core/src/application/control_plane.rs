// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Control Plane Factory - Application Layer
//!
//! Wires the reconcilers, the dependency resolver, the routing table and the
//! controller from a [`ControllerConfigManifest`] and the adapters supplied by
//! the caller (store, downstream applier, upstream clients, tool discovery).
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Single place where configuration becomes running components

use std::sync::Arc;

use crate::application::agent_reconciler::AgentReconciler;
use crate::application::controller::{Controller, ControllerSettings};
use crate::application::dependency_resolver::DependencyResolver;
use crate::application::event_mapper::EventMapper;
use crate::application::tool_server_reconciler::ToolServerReconciler;
use crate::application::translator::SpecTranslator;
use crate::domain::controller_config::ControllerConfigManifest;
use crate::domain::namespace_policy::NamespacePolicyEngine;
use crate::domain::repository::ResourceStore;
use crate::domain::runtime::DownstreamApplier;
use crate::domain::tool_provider::ToolDiscovery;
use crate::domain::upstream::{AuthHook, UpstreamClientFactory};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::routing_table::RoutingTable;

/// Adapters the control plane runs against.
pub struct ControlPlaneAdapters {
    pub store: Arc<dyn ResourceStore>,
    pub applier: Arc<dyn DownstreamApplier>,
    pub clients: Arc<dyn UpstreamClientFactory>,
    pub discovery: Arc<dyn ToolDiscovery>,
    pub auth_hook: Arc<dyn AuthHook>,
}

pub struct ControlPlane {
    pub controller: Arc<Controller>,
    pub agents: Arc<AgentReconciler>,
    pub tool_servers: Arc<ToolServerReconciler>,
    pub resolver: Arc<DependencyResolver>,
    pub routing: Arc<RoutingTable>,
    pub event_bus: EventBus,
}

impl ControlPlane {
    pub fn new(config: &ControllerConfigManifest, adapters: ControlPlaneAdapters) -> Self {
        let event_bus = EventBus::with_default_capacity();
        let routing = Arc::new(RoutingTable::new());
        let watched = config.watched_namespaces();

        let agents = Arc::new(
            AgentReconciler::new(
                adapters.store.clone(),
                Arc::new(NamespacePolicyEngine::new(watched.clone())),
                Arc::new(SpecTranslator::new(config.spec.a2a_proxy_base_url.clone())),
                adapters.applier,
                routing.clone(),
                adapters.clients,
                adapters.auth_hook,
                event_bus.clone(),
            )
            .with_not_ready_requeue(config.not_ready_requeue()),
        );
        let tool_servers = Arc::new(ToolServerReconciler::new(
            adapters.store.clone(),
            adapters.discovery,
            event_bus.clone(),
            config.tool_refresh_interval(),
            config.discovery_timeout(),
        ));
        let resolver = Arc::new(DependencyResolver::new(adapters.store.clone()));
        let mapper = Arc::new(EventMapper::new(resolver.clone(), event_bus.clone()));

        let controller = Arc::new(Controller::new(
            adapters.store,
            agents.clone(),
            tool_servers.clone(),
            mapper,
            watched,
            ControllerSettings::from_config(&config.spec),
        ));

        Self {
            controller,
            agents,
            tool_servers,
            resolver,
            routing,
            event_bus,
        }
    }
}
