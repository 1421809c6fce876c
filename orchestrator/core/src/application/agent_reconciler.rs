// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Agent Reconciler
//!
//! Per-agent state machine converging the declared Agent onto a deployed
//! workload and a published routing-table entry.
//!
//! ```text
//! Start ─┬─> ValidateReferences ─> ResolveDependencies ─> ComputeFingerprint
//!        │        │ deny                                        │
//!        │        v                                             v
//!        │   (rejected)   <────────── invalid ────────────  Translate
//!        │                                                      │
//!        │                                                      v
//!        │                          Done <─ PublishRouting <─ ApplyDownstream
//!        │
//!        └─> Deleting ─> DeregisterRouting ─> Finalized   (deletion marker)
//! ```
//!
//! # Failure Semantics
//!
//! - Policy denials and malformed specs are recorded in status and the call
//!   returns `Ok` with no requeue: only a spec edit can change the outcome.
//! - Missing objects, store outages and applier failures are returned as
//!   transient [`ReconcileError`]s for backoff retry; no state is advanced.
//! - `PublishRouting` is the last step and the only one touching the serving
//!   path. The routing mutation is synchronous, so a caller that drops the
//!   future at its deadline never leaves a half-committed route.

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::application::translator::{secret_dependencies, ResolvedTool, SpecTranslator};
use crate::domain::agent::{
    Agent, AgentStatus, AGENT_FINALIZER, CONDITION_ACCEPTED, CONDITION_READY,
    REASON_REFERENCES_VALID, REASON_ROUTE_PUBLISHED, REASON_VALIDATION_FAILED,
    REASON_WORKLOAD_NOT_READY,
};
use crate::domain::error::{ReconcileError, TransientError, ValidationError};
use crate::domain::events::ReconcileEvent;
use crate::domain::model_config::ModelConfig;
use crate::domain::namespace_policy::{
    DenyReason, NamespacePolicyEngine, PolicyDecision, PolicyTarget, SourceNamespace,
};
use crate::domain::repository::{ResourceStore, ResourceStoreExt, StoreError};
use crate::domain::resource::{set_condition, Condition, ConditionStatus, NamespacedName};
use crate::domain::runtime::{DeploymentRequest, DownstreamApplier};
use crate::domain::secret::{fingerprint, SecretRef};
use crate::domain::tool_provider::{ToolKind, ToolProvider, ToolReference};
use crate::domain::upstream::{AuthHook, UpstreamClientFactory};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::routing_table::RoutingTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum ReconcilePhase {
    Start,
    ValidateReferences,
    ResolveDependencies,
    ComputeFingerprint,
    Translate,
    ApplyDownstream,
    PublishRouting,
    Done,
    Deleting,
    DeregisterRouting,
    Finalized,
}

/// Result of one successful (or terminally rejected) invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Phase the invocation stopped in
    pub phase: ReconcilePhase,
    /// Revisit interval requested by the reconciler, independent of watches
    pub requeue_after: Option<Duration>,
    /// Stopped on a validation failure recorded in status
    pub rejected: bool,
}

impl ReconcileOutcome {
    pub fn finished(phase: ReconcilePhase) -> Self {
        Self {
            phase,
            requeue_after: None,
            rejected: false,
        }
    }

    pub fn requeue(phase: ReconcilePhase, after: Duration) -> Self {
        Self {
            phase,
            requeue_after: Some(after),
            rejected: false,
        }
    }

    pub fn rejected(phase: ReconcilePhase) -> Self {
        Self {
            phase,
            requeue_after: None,
            rejected: true,
        }
    }

    pub fn is_rejected(&self) -> bool {
        self.rejected
    }
}

pub struct AgentReconciler {
    store: Arc<dyn ResourceStore>,
    policy: Arc<NamespacePolicyEngine>,
    translator: Arc<SpecTranslator>,
    applier: Arc<dyn DownstreamApplier>,
    routing: Arc<RoutingTable>,
    clients: Arc<dyn UpstreamClientFactory>,
    auth_hook: Arc<dyn AuthHook>,
    event_bus: EventBus,
    not_ready_requeue: Duration,
}

impl AgentReconciler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn ResourceStore>,
        policy: Arc<NamespacePolicyEngine>,
        translator: Arc<SpecTranslator>,
        applier: Arc<dyn DownstreamApplier>,
        routing: Arc<RoutingTable>,
        clients: Arc<dyn UpstreamClientFactory>,
        auth_hook: Arc<dyn AuthHook>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            store,
            policy,
            translator,
            applier,
            routing,
            clients,
            auth_hook,
            event_bus,
            not_ready_requeue: Duration::from_secs(5),
        }
    }

    pub fn with_not_ready_requeue(mut self, interval: Duration) -> Self {
        self.not_ready_requeue = interval;
        self
    }

    pub fn routing_table(&self) -> &Arc<RoutingTable> {
        &self.routing
    }

    /// Run one reconciliation of `key`. Work past `deadline` is abandoned
    /// before any routing mutation.
    pub async fn reconcile(
        &self,
        key: &NamespacedName,
        deadline: Instant,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        debug!(agent = %key, phase = ?ReconcilePhase::Start, "Reconciling agent");

        let agent = match self.store.get_agent(key).await {
            Ok(agent) => agent,
            Err(StoreError::NotFound { .. }) => {
                // Finalized elsewhere; make sure nothing still routes to it
                self.deregister(key);
                return Ok(ReconcileOutcome::finished(ReconcilePhase::Finalized));
            }
            Err(err) => {
                return Err(ReconcileError::from(err).context(format!("fetching agent {}", key)))
            }
        };

        if agent.metadata.is_deleting() {
            return self.finalize(&agent).await;
        }

        if !agent.metadata.has_finalizer(AGENT_FINALIZER) {
            let mut finalizers = agent.metadata.finalizers.clone();
            finalizers.push(AGENT_FINALIZER.to_string());
            self.store
                .update_agent_finalizers(key, finalizers)
                .await
                .map_err(|e| {
                    ReconcileError::from(e).context(format!("adding finalizer to {}", key))
                })?;
        }

        let tools = match self.validate_references(&agent).await {
            Ok(tools) => tools,
            Err(err) => {
                return self
                    .handle_failure(&agent, ReconcilePhase::ValidateReferences, err)
                    .await
            }
        };

        let (model_config, secrets) = match self.resolve_dependencies(&agent, &tools).await {
            Ok(resolved) => resolved,
            Err(err) => {
                return self
                    .handle_failure(&agent, ReconcilePhase::ResolveDependencies, err)
                    .await
            }
        };

        let secret_hash = fingerprint(&secrets);
        debug!(
            agent = %key,
            phase = ?ReconcilePhase::ComputeFingerprint,
            secrets = secrets.len(),
            "Computed secret fingerprint"
        );

        let translation = match self.translator.translate(&agent, model_config.as_ref(), &tools) {
            Ok(translation) => translation,
            Err(err) => {
                return self
                    .handle_failure(&agent, ReconcilePhase::Translate, err.into())
                    .await
            }
        };

        check_deadline(deadline, ReconcilePhase::ApplyDownstream)?;
        let stored_hash = agent.status.last_applied_secret_hash.as_deref();
        let redeploy = stored_hash.is_some() && !secret_hash.matches(stored_hash);
        if redeploy {
            info!(agent = %key, "Credential secrets changed, redeploying workload");
        }
        let request = DeploymentRequest {
            config: translation.runtime,
            secret_hash: secret_hash.as_str().to_string(),
            redeploy,
        };
        let readiness = self
            .applier
            .apply(&request)
            .await
            .map_err(|e| {
                ReconcileError::from(e).context(format!("applying workload for {}", key))
            })?;

        if !readiness.ready {
            let mut status = agent.status.clone();
            accept(&mut status, &agent);
            set_condition(
                &mut status.conditions,
                Condition::new(
                    CONDITION_READY,
                    ConditionStatus::False,
                    REASON_WORKLOAD_NOT_READY,
                    format!("workload at {} is not ready", readiness.endpoint),
                    agent.metadata.generation,
                ),
            );
            status.last_applied_secret_hash = Some(request.secret_hash.clone());
            self.persist_status(key, status).await?;
            debug!(agent = %key, requeue = ?self.not_ready_requeue, "Workload not ready");
            return Ok(ReconcileOutcome::requeue(
                ReconcilePhase::ApplyDownstream,
                self.not_ready_requeue,
            ));
        }

        let client = self
            .clients
            .new_client(&readiness.endpoint, self.auth_hook.clone())
            .map_err(|e| {
                ReconcileError::from(e).context(format!("building upstream client for {}", key))
            })?;
        let card = match readiness.advertised_card {
            Some(advertised) => self.translator.rewrite_card(key, advertised),
            None => translation.card,
        };

        let mut status = agent.status.clone();
        accept(&mut status, &agent);
        set_condition(
            &mut status.conditions,
            Condition::new(
                CONDITION_READY,
                ConditionStatus::True,
                REASON_ROUTE_PUBLISHED,
                format!("routing via {}", card.url),
                agent.metadata.generation,
            ),
        );
        status.last_applied_secret_hash = Some(request.secret_hash.clone());
        check_deadline(deadline, ReconcilePhase::PublishRouting)?;
        self.persist_status(key, status).await?;

        // Nothing below awaits: the route is committed whole or not at all.
        check_deadline(deadline, ReconcilePhase::PublishRouting)?;
        self.routing.set_agent_handler(key.clone(), client, card);

        let now = Utc::now();
        self.event_bus.publish(ReconcileEvent::AgentAccepted {
            agent: key.clone(),
            generation: agent.metadata.generation,
            accepted_at: now,
        });
        self.event_bus.publish(ReconcileEvent::RoutePublished {
            agent: key.clone(),
            endpoint: readiness.endpoint,
            secret_hash: request.secret_hash,
            redeployed: redeploy,
            published_at: now,
        });
        info!(agent = %key, generation = agent.metadata.generation, "Agent reconciled");

        Ok(ReconcileOutcome::finished(ReconcilePhase::Done))
    }

    /// Resolve every tool reference and authorize it against the
    /// namespace policy. Rules that need nothing from the target run before
    /// the target is fetched, so a reference into an unwatched namespace is
    /// a validation failure rather than a retried lookup.
    async fn validate_references(
        &self,
        agent: &Agent,
    ) -> Result<Vec<ResolvedTool>, ReconcileError> {
        let Some(spec) = agent.declarative() else {
            return Ok(Vec::new());
        };
        let key = agent.key();
        let namespace = key.namespace.as_str();
        let mut source_labels: Option<BTreeMap<String, String>> = None;
        let mut resolved = Vec::with_capacity(spec.tools.len());

        for reference in &spec.tools {
            let target = reference.resolve(namespace);
            if reference.kind == ToolKind::Agent && target == key {
                return Err(ValidationError::SelfReference(key.clone()).into());
            }

            let precheck = self.policy.precheck(namespace, reference.kind, &target);
            if let Some(PolicyDecision::Deny(reason)) = precheck {
                return Err(denied(reference, &target, reason));
            }

            let tool = self.fetch_tool(reference, &target).await?;

            if precheck.is_none() {
                if source_labels.is_none() {
                    source_labels = Some(self.namespace_labels(namespace).await?);
                }
                let labels = source_labels.get_or_insert_with(BTreeMap::new);
                let policy = match &tool {
                    ResolvedTool::Provider { provider, .. } => provider.allowed_namespaces(),
                    ResolvedTool::Agent {
                        agent: target_agent,
                        ..
                    } => target_agent.spec.allowed_namespaces.as_ref(),
                };
                let decision = self.policy.check(
                    &SourceNamespace { name: namespace, labels },
                    &PolicyTarget {
                        kind: reference.kind,
                        key: &target,
                        policy,
                    },
                );
                if let PolicyDecision::Deny(reason) = decision {
                    return Err(denied(reference, &target, reason));
                }
            }

            resolved.push(tool);
        }

        Ok(resolved)
    }

    async fn fetch_tool(
        &self,
        reference: &ToolReference,
        target: &NamespacedName,
    ) -> Result<ResolvedTool, ReconcileError> {
        let context = || format!("resolving {} {}", reference.kind, target);
        match reference.kind {
            ToolKind::Agent => {
                let agent = self
                    .store
                    .get_agent(target)
                    .await
                    .map_err(|e| ReconcileError::from(e).context(context()))?;
                Ok(ResolvedTool::Agent {
                    reference: reference.clone(),
                    agent,
                })
            }
            kind => {
                let provider: ToolProvider = self
                    .store
                    .get_tool_provider(kind, target)
                    .await
                    .map_err(|e| ReconcileError::from(e).context(context()))?;
                Ok(ResolvedTool::Provider {
                    reference: reference.clone(),
                    provider,
                })
            }
        }
    }

    /// A namespace with no Namespace object has no labels.
    async fn namespace_labels(
        &self,
        namespace: &str,
    ) -> Result<BTreeMap<String, String>, ReconcileError> {
        match self.store.get_namespace(namespace).await {
            Ok(ns) => Ok(ns.metadata.labels),
            Err(StoreError::NotFound { .. }) => Ok(BTreeMap::new()),
            Err(err) => Err(ReconcileError::from(err)
                .context(format!("reading labels of namespace {}", namespace))),
        }
    }

    async fn resolve_dependencies(
        &self,
        agent: &Agent,
        tools: &[ResolvedTool],
    ) -> Result<(Option<ModelConfig>, Vec<SecretRef>), ReconcileError> {
        let model_config = match agent.declarative() {
            Some(spec) if !spec.model_config.is_empty() => {
                let key = NamespacedName::new(
                    agent.metadata.namespace.clone(),
                    spec.model_config.clone(),
                );
                let model_config = self
                    .store
                    .get_model_config(&key)
                    .await
                    .map_err(|e| {
                        ReconcileError::from(e).context(format!("resolving ModelConfig {}", key))
                    })?;
                Some(model_config)
            }
            _ => None,
        };

        let required = required_secret_keys(model_config.as_ref(), tools);
        let mut secrets = Vec::new();
        for secret_key in secret_dependencies(model_config.as_ref(), tools) {
            let secret = self
                .store
                .get_secret(&secret_key)
                .await
                .map_err(|e| {
                    ReconcileError::from(e).context(format!("resolving Secret {}", secret_key))
                })?;
            let secret_ref = secret.to_secret_ref().map_err(|e| ValidationError::InvalidSecret {
                secret: secret_key.clone(),
                message: e.to_string(),
            })?;
            if let Some(keys) = required.get(&secret_key) {
                let missing = keys.iter().find(|k| !secret_ref.data.contains_key(k.as_str()));
                if let Some(missing) = missing {
                    return Err(ValidationError::InvalidSecret {
                        secret: secret_key.clone(),
                        message: format!("key '{}' not found", missing),
                    }
                    .into());
                }
            }
            secrets.push(secret_ref);
        }

        Ok((model_config, secrets))
    }

    async fn handle_failure(
        &self,
        agent: &Agent,
        phase: ReconcilePhase,
        err: ReconcileError,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let key = agent.key();
        if !err.is_validation() {
            return Err(err.context(format!("agent {} in {:?}", key, phase)));
        }

        let message = err
            .validation()
            .map(ToString::to_string)
            .unwrap_or_else(|| err.to_string());
        warn!(agent = %key, phase = ?phase, error = %message, "Agent rejected");
        let mut status = agent.status.clone();
        for condition_type in [CONDITION_ACCEPTED, CONDITION_READY] {
            set_condition(
                &mut status.conditions,
                Condition::new(
                    condition_type,
                    ConditionStatus::False,
                    REASON_VALIDATION_FAILED,
                    message.clone(),
                    agent.metadata.generation,
                ),
            );
        }
        status.observed_generation = agent.metadata.generation;
        self.persist_status(&key, status).await?;

        self.event_bus.publish(ReconcileEvent::AgentRejected {
            agent: key,
            generation: agent.metadata.generation,
            reason: message,
            rejected_at: Utc::now(),
        });
        Ok(ReconcileOutcome::rejected(phase))
    }

    async fn finalize(&self, agent: &Agent) -> Result<ReconcileOutcome, ReconcileError> {
        let key = agent.key();
        debug!(agent = %key, phase = ?ReconcilePhase::Deleting, "Finalizing agent");

        self.deregister(&key);
        self.applier
            .delete(&key)
            .await
            .map_err(|e| {
                ReconcileError::from(e).context(format!("deleting workload for {}", key))
            })?;

        if agent.metadata.has_finalizer(AGENT_FINALIZER) {
            let finalizers = agent
                .metadata
                .finalizers
                .iter()
                .filter(|f| f.as_str() != AGENT_FINALIZER)
                .cloned()
                .collect();
            match self.store.update_agent_finalizers(&key, finalizers).await {
                Ok(()) | Err(StoreError::NotFound { .. }) => {}
                Err(err) => {
                    return Err(ReconcileError::from(err)
                        .context(format!("removing finalizer from {}", key)))
                }
            }
        }

        info!(agent = %key, "Agent finalized");
        Ok(ReconcileOutcome::finished(ReconcilePhase::Finalized))
    }

    fn deregister(&self, key: &NamespacedName) {
        debug!(agent = %key, phase = ?ReconcilePhase::DeregisterRouting, "Deregistering route");
        if self.routing.remove_agent_handler(key) {
            self.event_bus.publish(ReconcileEvent::RouteRemoved {
                agent: key.clone(),
                removed_at: Utc::now(),
            });
        }
    }

    async fn persist_status(
        &self,
        key: &NamespacedName,
        status: AgentStatus,
    ) -> Result<(), ReconcileError> {
        self.store
            .update_agent_status(key, status)
            .await
            .map_err(|e| ReconcileError::from(e).context(format!("writing status of {}", key)))
    }
}

fn denied(
    reference: &ToolReference,
    target: &NamespacedName,
    reason: DenyReason,
) -> ReconcileError {
    ValidationError::ReferenceDenied {
        reference: format!("{} {}", reference.kind, target),
        reason,
    }
    .into()
}

fn check_deadline(deadline: Instant, phase: ReconcilePhase) -> Result<(), ReconcileError> {
    if Instant::now() >= deadline {
        return Err(ReconcileError::from(TransientError::DeadlineExceeded)
            .context(format!("before {:?}", phase)));
    }
    Ok(())
}

fn accept(status: &mut AgentStatus, agent: &Agent) {
    set_condition(
        &mut status.conditions,
        Condition::new(
            CONDITION_ACCEPTED,
            ConditionStatus::True,
            REASON_REFERENCES_VALID,
            "all references resolved and permitted",
            agent.metadata.generation,
        ),
    );
    status.observed_generation = agent.metadata.generation;
}

/// Secret keys the workload will read, per secret.
fn required_secret_keys(
    model_config: Option<&ModelConfig>,
    tools: &[ResolvedTool],
) -> BTreeMap<NamespacedName, Vec<String>> {
    let mut required: BTreeMap<NamespacedName, Vec<String>> = BTreeMap::new();
    if let Some(model_config) = model_config {
        if model_config.spec.provider.api_key_env_var().is_some() {
            if let (Some(secret), Some(key)) = (
                model_config.api_key_secret_ref(),
                &model_config.spec.api_key_secret_key,
            ) {
                required.entry(secret).or_default().push(key.clone());
            }
        }
    }
    for tool in tools {
        if let ResolvedTool::Provider {
            provider: ToolProvider::Remote(server),
            ..
        } = tool
        {
            for selector in server.spec.headers_from.iter().filter_map(|h| h.value_from.as_ref()) {
                required
                    .entry(NamespacedName::new(
                        server.metadata.namespace.clone(),
                        selector.name.clone(),
                    ))
                    .or_default()
                    .push(selector.key.clone());
            }
        }
    }
    required
}
