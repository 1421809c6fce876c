// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-memory downstream applier.
//!
//! Stands in for the workload deployer: records each deployment request,
//! counts rollouts, and reports readiness. Tests and the CLI use its knobs to
//! simulate outages, unready workloads and self-advertised agent cards.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

use crate::domain::resource::NamespacedName;
use crate::domain::routing::AgentCard;
use crate::domain::runtime::{
    ApplyError, DeploymentRequest, DownstreamApplier, Readiness, RuntimeConfig,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentRecord {
    pub config: RuntimeConfig,
    pub secret_hash: String,
    /// Number of times the workload was (re)rolled out
    pub rollouts: u32,
}

pub struct InMemoryDeploymentApplier {
    deployments: RwLock<BTreeMap<NamespacedName, DeploymentRecord>>,
    not_ready: RwLock<BTreeSet<NamespacedName>>,
    advertised: RwLock<BTreeMap<NamespacedName, AgentCard>>,
    unavailable: AtomicBool,
}

impl InMemoryDeploymentApplier {
    pub fn new() -> Self {
        Self {
            deployments: RwLock::new(BTreeMap::new()),
            not_ready: RwLock::new(BTreeSet::new()),
            advertised: RwLock::new(BTreeMap::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn deployment(&self, agent: &NamespacedName) -> Option<DeploymentRecord> {
        self.deployments.read().get(agent).cloned()
    }

    pub fn rollouts(&self, agent: &NamespacedName) -> u32 {
        self.deployments.read().get(agent).map_or(0, |record| record.rollouts)
    }

    pub fn deployed_agents(&self) -> Vec<NamespacedName> {
        self.deployments.read().keys().cloned().collect()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn set_ready(&self, agent: &NamespacedName, ready: bool) {
        let mut not_ready = self.not_ready.write();
        if ready {
            not_ready.remove(agent);
        } else {
            not_ready.insert(agent.clone());
        }
    }

    /// Card the workload will report about itself on the next apply.
    pub fn set_advertised_card(&self, agent: &NamespacedName, card: AgentCard) {
        self.advertised.write().insert(agent.clone(), card);
    }

    fn endpoint(config: &RuntimeConfig) -> String {
        format!("http://{}.{}:{}", config.agent.name, config.agent.namespace, config.port)
    }
}

impl Default for InMemoryDeploymentApplier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DownstreamApplier for InMemoryDeploymentApplier {
    async fn apply(&self, request: &DeploymentRequest) -> Result<Readiness, ApplyError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ApplyError::Unavailable("deployment backend offline".to_string()));
        }

        let agent = request.config.agent.clone();
        {
            let mut deployments = self.deployments.write();
            match deployments.get_mut(&agent) {
                Some(record) => {
                    let changed = record.config != request.config
                        || record.secret_hash != request.secret_hash;
                    if changed || request.redeploy {
                        record.rollouts += 1;
                        info!(
                            agent = %agent,
                            rollouts = record.rollouts,
                            redeploy = request.redeploy,
                            "Rolled out workload"
                        );
                    } else {
                        debug!(agent = %agent, "Workload unchanged");
                    }
                    record.config = request.config.clone();
                    record.secret_hash = request.secret_hash.clone();
                }
                None => {
                    info!(agent = %agent, "Created workload");
                    deployments.insert(
                        agent.clone(),
                        DeploymentRecord {
                            config: request.config.clone(),
                            secret_hash: request.secret_hash.clone(),
                            rollouts: 1,
                        },
                    );
                }
            }
        }

        Ok(Readiness {
            ready: !self.not_ready.read().contains(&agent),
            endpoint: Self::endpoint(&request.config),
            advertised_card: self.advertised.read().get(&agent).cloned(),
        })
    }

    async fn delete(&self, agent: &NamespacedName) -> Result<(), ApplyError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ApplyError::Unavailable("deployment backend offline".to_string()));
        }
        if self.deployments.write().remove(agent).is_some() {
            info!(agent = %agent, "Deleted workload");
        }
        Ok(())
    }
}
