// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Routing Table
//!
//! Live mapping from agent identity to the upstream client and agent card
//! the A2A proxy uses to forward requests. It is the only structure shared
//! between reconciliation and the request-dispatch path.
//!
//! Each entry is an immutable `Arc<AgentRoute>`; registration swaps the
//! whole `Arc` in one map insert, so a reader holds either the old pair or
//! the new pair and never a mix. Readers clone the `Arc` out and release the
//! shard before doing any I/O with it.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::domain::resource::NamespacedName;
use crate::domain::routing::AgentCard;
use crate::domain::upstream::{
    Principal, UpstreamClient, UpstreamError, UpstreamRequest, UpstreamResponse,
};

pub struct AgentRoute {
    pub client: Arc<dyn UpstreamClient>,
    pub card: AgentCard,
}

impl std::fmt::Debug for AgentRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRoute")
            .field("endpoint", &self.client.endpoint())
            .field("card", &self.card)
            .finish()
    }
}

#[derive(Default)]
pub struct RoutingTable {
    entries: DashMap<NamespacedName, Arc<AgentRoute>>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the route for `identity` as one atomic swap.
    pub fn set_agent_handler(
        &self,
        identity: NamespacedName,
        client: Arc<dyn UpstreamClient>,
        card: AgentCard,
    ) {
        let route = Arc::new(AgentRoute { client, card });
        info!(agent = %identity, endpoint = route.client.endpoint(), "Registered agent route");
        self.entries.insert(identity, route);
        self.record_size();
    }

    /// Remove the route; unknown identities are a no-op. Returns whether an
    /// entry existed.
    pub fn remove_agent_handler(&self, identity: &NamespacedName) -> bool {
        let removed = self.entries.remove(identity).is_some();
        if removed {
            info!(agent = %identity, "Removed agent route");
            self.record_size();
        } else {
            debug!(agent = %identity, "No agent route to remove");
        }
        removed
    }

    pub fn get(&self, identity: &NamespacedName) -> Option<Arc<AgentRoute>> {
        self.entries.get(identity).map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered identities, sorted.
    pub fn identities(&self) -> Vec<NamespacedName> {
        let mut identities: Vec<NamespacedName> =
            self.entries.iter().map(|e| e.key().clone()).collect();
        identities.sort();
        identities
    }

    /// Forward a request to the agent's upstream on behalf of `principal`.
    pub async fn forward(
        &self,
        identity: &NamespacedName,
        request: UpstreamRequest,
        principal: &Principal,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let route = self
            .get(identity)
            .ok_or_else(|| {
                UpstreamError::InvalidEndpoint(format!("no route for agent {}", identity))
            })?;
        route.client.send(request, principal).await
    }

    fn record_size(&self) {
        metrics::gauge!("agentmesh_routing_table_entries").set(self.entries.len() as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct StaticClient {
        endpoint: String,
    }

    #[async_trait]
    impl UpstreamClient for StaticClient {
        fn endpoint(&self) -> &str {
            &self.endpoint
        }

        async fn send(
            &self,
            _request: UpstreamRequest,
            _principal: &Principal,
        ) -> Result<UpstreamResponse, UpstreamError> {
            Ok(UpstreamResponse {
                status: 200,
                body: serde_json::json!({ "endpoint": self.endpoint }),
            })
        }
    }

    fn card(url: &str) -> AgentCard {
        AgentCard {
            name: "a".into(),
            description: String::new(),
            url: url.into(),
            version: "1".into(),
            capabilities: Default::default(),
            default_input_modes: vec!["text".into()],
            default_output_modes: vec!["text".into()],
            skills: vec![],
        }
    }

    fn client(endpoint: &str) -> Arc<dyn UpstreamClient> {
        Arc::new(StaticClient { endpoint: endpoint.into() })
    }

    #[test]
    fn test_replace_and_remove() {
        let table = RoutingTable::new();
        let key = NamespacedName::new("ns1", "a");
        table.set_agent_handler(key.clone(), client("http://v1"), card("http://proxy/ns1/a/"));
        table.set_agent_handler(key.clone(), client("http://v2"), card("http://proxy/ns1/a/v2"));

        let route = table.get(&key).unwrap();
        assert_eq!(route.client.endpoint(), "http://v2");
        assert_eq!(route.card.url, "http://proxy/ns1/a/v2");
        assert_eq!(table.len(), 1);

        assert!(table.remove_agent_handler(&key));
        assert!(!table.remove_agent_handler(&key));
        assert!(table.is_empty());
    }

    #[test]
    fn test_held_route_survives_replacement() {
        let table = RoutingTable::new();
        let key = NamespacedName::new("ns1", "a");
        table.set_agent_handler(key.clone(), client("http://old"), card("old"));
        let held = table.get(&key).unwrap();
        table.set_agent_handler(key.clone(), client("http://new"), card("new"));

        assert_eq!(held.client.endpoint(), "http://old");
        assert_eq!(held.card.url, "old");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_readers_never_see_torn_entries() {
        let table = Arc::new(RoutingTable::new());
        let key = NamespacedName::new("ns1", "hot");
        table.set_agent_handler(key.clone(), client("http://gen-0"), card("gen-0"));

        let writer = {
            let table = table.clone();
            let key = key.clone();
            tokio::spawn(async move {
                for generation in 1..500 {
                    let tag = format!("gen-{generation}");
                    table.set_agent_handler(
                        key.clone(),
                        client(&format!("http://{tag}")),
                        card(&tag),
                    );
                    table.set_agent_handler(
                        NamespacedName::new("ns2", format!("other-{generation}")),
                        client("http://other"),
                        card("other"),
                    );
                    tokio::task::yield_now().await;
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let table = table.clone();
                let key = key.clone();
                tokio::spawn(async move {
                    for _ in 0..2000 {
                        let route = table.get(&key).unwrap();
                        let endpoint_tag = route
                            .client
                            .endpoint()
                            .trim_start_matches("http://")
                            .to_string();
                        assert_eq!(endpoint_tag, route.card.url);
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        writer.await.unwrap();
        for reader in readers {
            reader.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_forward_uses_registered_client() {
        let table = RoutingTable::new();
        let key = NamespacedName::new("ns1", "a");
        let missing = table
            .forward(&key, UpstreamRequest::default(), &Principal::default())
            .await;
        assert!(missing.is_err());

        table.set_agent_handler(key.clone(), client("http://a"), card("a"));
        let response = table
            .forward(&key, UpstreamRequest::default(), &Principal::default())
            .await
            .unwrap();
        assert_eq!(response.body["endpoint"], "http://a");
    }
}
