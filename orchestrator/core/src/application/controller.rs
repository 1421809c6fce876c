// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Reconcile Controller
//!
//! Drives the reconcilers from a deduplicating work queue:
//!
//! - watch events are mapped to requests and queued;
//! - a bounded pool of workers drains the queue, one identity at a time;
//! - every invocation runs under `tokio::time::timeout`, so an overrunning
//!   reconcile is dropped before it can publish a route;
//! - transient failures are retried with per-item exponential backoff,
//!   validation failures are never retried;
//! - a successful outcome may ask to be revisited (`requeue_after`).
//!
//! A lagging watch receiver triggers a full resync instead of guessing which
//! events were lost. A resync that fails is retried with backoff until it
//! succeeds or the controller shuts down.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::agent_reconciler::{AgentReconciler, ReconcileOutcome, ReconcilePhase};
use crate::application::event_mapper::{EventMapper, ReconcileRequest};
use crate::application::tool_server_reconciler::ToolServerReconciler;
use crate::domain::controller_config::ControllerConfigSpec;
use crate::domain::error::{ReconcileError, TransientError};
use crate::domain::events::WatchEvent;
use crate::domain::namespace_policy::WatchedNamespaces;
use crate::domain::repository::{Resource, ResourceStore, StoreError};
use crate::domain::resource::ResourceKind;
use crate::domain::tool_provider::ToolKind;
use crate::infrastructure::work_queue::{ExponentialBackoff, WorkQueue};

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub reconcile_timeout: Duration,
    pub workers: usize,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub backoff_multiplier: f64,
}

impl ControllerSettings {
    pub fn from_config(spec: &ControllerConfigSpec) -> Self {
        let reconcile = &spec.reconcile;
        Self {
            reconcile_timeout: Duration::from_secs(reconcile.timeout_seconds),
            workers: reconcile.workers.max(1),
            backoff_initial: Duration::from_millis(reconcile.backoff.initial_millis),
            backoff_max: Duration::from_millis(reconcile.backoff.max_millis),
            backoff_multiplier: reconcile.backoff.multiplier,
        }
    }
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            reconcile_timeout: Duration::from_secs(30),
            workers: 4,
            backoff_initial: Duration::from_millis(500),
            backoff_max: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

/// What happened to one dequeued request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessResult {
    Success,
    Rejected,
    Retrying(Duration),
}

impl ProcessResult {
    fn label(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Rejected => "rejected",
            Self::Retrying(_) => "error",
        }
    }
}

pub struct Controller {
    store: Arc<dyn ResourceStore>,
    agents: Arc<AgentReconciler>,
    tool_servers: Arc<ToolServerReconciler>,
    mapper: Arc<EventMapper>,
    watched: WatchedNamespaces,
    queue: Arc<WorkQueue<ReconcileRequest>>,
    backoff: ExponentialBackoff<ReconcileRequest>,
    resync_backoff: ExponentialBackoff<()>,
    settings: ControllerSettings,
    shutdown_token: CancellationToken,
}

impl Controller {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        agents: Arc<AgentReconciler>,
        tool_servers: Arc<ToolServerReconciler>,
        mapper: Arc<EventMapper>,
        watched: WatchedNamespaces,
        settings: ControllerSettings,
    ) -> Self {
        let backoff = ExponentialBackoff::new(
            settings.backoff_initial,
            settings.backoff_max,
            settings.backoff_multiplier,
        );
        let resync_backoff = ExponentialBackoff::new(
            settings.backoff_initial,
            settings.backoff_max,
            settings.backoff_multiplier,
        );
        Self {
            store,
            agents,
            tool_servers,
            mapper,
            watched,
            queue: Arc::new(WorkQueue::new()),
            backoff,
            resync_backoff,
            settings,
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn queue(&self) -> &Arc<WorkQueue<ReconcileRequest>> {
        &self.queue
    }

    /// Handle to trigger graceful shutdown
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn enqueue(&self, request: ReconcileRequest) -> bool {
        self.queue.add(request)
    }

    /// Queue every Agent and tool server in the watched namespaces.
    pub async fn resync_all(&self) -> Result<usize, StoreError> {
        let mut queued = 0;
        for kind in [ResourceKind::Agent, ResourceKind::RemoteMcpServer, ResourceKind::McpServer] {
            for resource in self.store.list(kind, None).await? {
                let key = resource.key();
                if !self.watched.contains(&key.namespace) {
                    continue;
                }
                let request = match resource {
                    Resource::Agent(_) => ReconcileRequest::Agent(key),
                    Resource::RemoteMcpServer(_) => {
                        ReconcileRequest::ToolServer(ToolKind::RemoteMcpServer, key)
                    }
                    Resource::McpServer(_) => {
                        ReconcileRequest::ToolServer(ToolKind::ClusterLocalMcpServer, key)
                    }
                    _ => continue,
                };
                if self.queue.add(request) {
                    queued += 1;
                }
            }
        }
        info!(queued, "Resynced all resources");
        Ok(queued)
    }

    /// Map one watch event onto the queue. Events outside the watched
    /// namespaces are ignored.
    pub fn handle_watch_event(&self, event: &WatchEvent) {
        let namespace = if event.kind.is_namespaced() {
            event.key.namespace.as_str()
        } else {
            event.key.name.as_str()
        };
        if !self.watched.contains(namespace) {
            debug!(kind = %event.kind, key = %event.key, "Ignoring event from unwatched namespace");
            return;
        }
        for request in EventMapper::direct_requests(event) {
            self.queue.add(request);
        }
    }

    /// Take one request off the queue and process it. Returns `None` once
    /// the queue has shut down.
    pub async fn process_next(&self) -> Option<ProcessResult> {
        let request = self.queue.get().await?;
        let result = self.process(&request).await;
        self.queue.done(&request);
        Some(result)
    }

    async fn process(&self, request: &ReconcileRequest) -> ProcessResult {
        let started = Instant::now();
        let deadline = started + self.settings.reconcile_timeout;

        let attempt = self.dispatch(request, deadline);
        let outcome = match tokio::time::timeout(self.settings.reconcile_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(ReconcileError::from(TransientError::DeadlineExceeded)
                .context(format!("reconcile of {} timed out", request))),
        };

        let result = match outcome {
            Ok(outcome) => {
                self.backoff.forget(request);
                if let Some(after) = outcome.requeue_after {
                    debug!(request = %request, after = ?after, "Requeueing");
                    self.queue.add_after(request.clone(), after);
                }
                if outcome.is_rejected() {
                    ProcessResult::Rejected
                } else {
                    ProcessResult::Success
                }
            }
            Err(err) if err.is_validation() => {
                self.backoff.forget(request);
                warn!(request = %request, error = %err, "Reconcile rejected");
                ProcessResult::Rejected
            }
            Err(err) => {
                let delay = self.backoff.next_delay(request);
                warn!(
                    request = %request,
                    error = %err,
                    retry_in = ?delay,
                    failures = self.backoff.failures(request),
                    "Reconcile failed, retrying"
                );
                self.queue.add_after(request.clone(), delay);
                ProcessResult::Retrying(delay)
            }
        };

        let controller = request.controller();
        metrics::counter!(
            "agentmesh_reconcile_total",
            "controller" => controller,
            "result" => result.label()
        )
        .increment(1);
        metrics::histogram!("agentmesh_reconcile_duration_seconds", "controller" => controller)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn dispatch(
        &self,
        request: &ReconcileRequest,
        deadline: Instant,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        match request {
            ReconcileRequest::Agent(key) => self.agents.reconcile(key, deadline).await,
            ReconcileRequest::ToolServer(kind, key) => {
                self.tool_servers.reconcile(*kind, key, deadline).await
            }
            ReconcileRequest::Propagate(event) => {
                let requests = self
                    .mapper
                    .dependents(event)
                    .await
                    .map_err(|e| {
                        ReconcileError::from(e)
                            .context(format!("resolving dependents of {}", event.key))
                    })?;
                for dependent in requests {
                    self.queue.add(dependent);
                }
                Ok(ReconcileOutcome::finished(ReconcilePhase::Done))
            }
        }
    }

    /// Retry [`Self::resync_all`] with backoff until it succeeds. Returns
    /// `false` when shutdown is requested first.
    async fn resync_until_ok(&self) -> bool {
        loop {
            match self.resync_all().await {
                Ok(_) => {
                    self.resync_backoff.forget(&());
                    return true;
                }
                Err(e) => {
                    let delay = self.resync_backoff.next_delay(&());
                    warn!(error = %e, retry_in = ?delay, "Resync failed, retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.shutdown_token.cancelled() => return false,
                    }
                }
            }
        }
    }

    /// Spawn the watch loop and worker pool.
    pub fn start(self: Arc<Self>, events: broadcast::Receiver<WatchEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run(events).await;
        })
    }

    /// Resync, then consume watch events until shutdown.
    pub async fn run(self: Arc<Self>, mut events: broadcast::Receiver<WatchEvent>) {
        info!(workers = self.settings.workers, "Starting reconcile controller");

        let workers: Vec<JoinHandle<()>> = (0..self.settings.workers)
            .map(|id| {
                let controller = Arc::clone(&self);
                tokio::spawn(async move {
                    while controller.process_next().await.is_some() {}
                    debug!(worker = id, "Worker stopped");
                })
            })
            .collect();

        let mut running = self.resync_until_ok().await;
        while running {
            tokio::select! {
                received = events.recv() => match received {
                    Ok(event) => self.handle_watch_event(&event),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "Watch stream lagged, resyncing");
                        running = self.resync_until_ok().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Watch stream closed");
                        running = false;
                    }
                },
                _ = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received, stopping controller");
                    running = false;
                }
            }
        }

        self.queue.shutdown();
        for result in futures::future::join_all(workers).await {
            if let Err(e) = result {
                error!("Controller worker panicked: {}", e);
            }
        }
        info!("Reconcile controller stopped");
    }
}
