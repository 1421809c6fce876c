// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Scheduler behavior of the reconcile controller: retry policy per error
//! kind, periodic tool refresh, and the watch loop lifecycle.

mod common;

use agentmesh_core::application::controller::ProcessResult;
use agentmesh_core::application::event_mapper::ReconcileRequest;
use agentmesh_core::domain::agent::{CONDITION_ACCEPTED, CONDITION_READY};
use agentmesh_core::domain::repository::ResourceStoreExt;
use agentmesh_core::domain::resource::ConditionStatus;
use agentmesh_core::domain::tool_provider::{ToolKind, CONDITION_TOOLS_DISCOVERED};
use common::{apply_yaml, key, Mesh};
use std::time::Duration;

const MODEL: &str = r#"
kind: ModelConfig
metadata: { name: gpt, namespace: ns1 }
spec: { provider: Ollama, model: llama3 }
"#;

const AGENT: &str = r#"
kind: Agent
metadata: { name: a, namespace: ns1 }
spec:
  declarative:
    systemMessage: Hi.
    modelConfig: gpt
"#;

const SELF_REFERENCING: &str = r#"
kind: ModelConfig
metadata: { name: gpt, namespace: ns1 }
spec: { provider: Ollama, model: llama3 }
---
kind: Agent
metadata: { name: loop, namespace: ns1 }
spec:
  declarative:
    modelConfig: gpt
    tools:
      - { kind: Agent, name: loop }
"#;

const REMOTE_SERVER: &str = r#"
kind: RemoteMCPServer
metadata: { name: tools, namespace: ns1 }
spec:
  url: http://tools.example.com/mcp
"#;

#[tokio::test(start_paused = true)]
async fn test_validation_failure_is_never_retried() {
    let mesh = Mesh::new(SELF_REFERENCING);
    let controller = &mesh.plane.controller;

    controller.enqueue(ReconcileRequest::Agent(key("ns1", "loop")));
    assert_eq!(controller.process_next().await, Some(ProcessResult::Rejected));

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert!(controller.queue().is_empty());
    assert_eq!(
        mesh.condition("ns1", "loop", CONDITION_ACCEPTED).await.status,
        ConditionStatus::False
    );
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_backs_off_exponentially() {
    let mesh = Mesh::new(AGENT);
    let controller = &mesh.plane.controller;
    let request = ReconcileRequest::Agent(key("ns1", "a"));

    controller.enqueue(request.clone());
    assert_eq!(
        controller.process_next().await,
        Some(ProcessResult::Retrying(Duration::from_millis(500)))
    );
    assert!(controller.queue().is_empty());

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(controller.queue().len(), 1);
    assert_eq!(
        controller.process_next().await,
        Some(ProcessResult::Retrying(Duration::from_secs(1)))
    );

    // The missing dependency shows up; the next retry succeeds and the
    // failure history is cleared.
    apply_yaml(&mesh.store, MODEL);
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(controller.process_next().await, Some(ProcessResult::Success));
    assert!(mesh.routed("ns1", "a"));

    controller.enqueue(request);
    assert_eq!(controller.process_next().await, Some(ProcessResult::Success));
}

#[tokio::test(start_paused = true)]
async fn test_store_outage_is_transient() {
    let mesh = Mesh::new(&format!("{}---{}", MODEL, AGENT));
    let controller = &mesh.plane.controller;

    mesh.store.set_unavailable(Some("apiserver down"));
    controller.enqueue(ReconcileRequest::Agent(key("ns1", "a")));
    assert!(matches!(
        controller.process_next().await,
        Some(ProcessResult::Retrying(_))
    ));

    mesh.store.set_unavailable(None);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(controller.process_next().await, Some(ProcessResult::Success));
}

#[tokio::test(start_paused = true)]
async fn test_tool_server_refresh_is_periodic() {
    let mesh = Mesh::with_config(REMOTE_SERVER, |config| {
        config.spec.reconcile.tool_refresh_interval_seconds = 30;
    });
    let controller = &mesh.plane.controller;

    controller.enqueue(ReconcileRequest::ToolServer(
        ToolKind::RemoteMcpServer,
        key("ns1", "tools"),
    ));
    assert_eq!(controller.process_next().await, Some(ProcessResult::Success));
    assert!(controller.queue().is_empty());

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(controller.queue().len(), 1);
    assert_eq!(controller.process_next().await, Some(ProcessResult::Success));
    assert_eq!(mesh.discovery.calls.lock().len(), 2);

    let server = mesh
        .store
        .get_tool_provider(ToolKind::RemoteMcpServer, &key("ns1", "tools"))
        .await
        .unwrap();
    let status = match server {
        agentmesh_core::domain::tool_provider::ToolProvider::Remote(server) => server.status,
        other => panic!("unexpected provider: {:?}", other),
    };
    assert_eq!(status.discovered_tools.len(), 1);
    let discovered = agentmesh_core::domain::resource::find_condition(
        &status.conditions,
        CONDITION_TOOLS_DISCOVERED,
    );
    assert_eq!(discovered.unwrap().status, ConditionStatus::True);
}

#[tokio::test(start_paused = true)]
async fn test_failed_discovery_retries_with_backoff() {
    let mesh = Mesh::new(REMOTE_SERVER);
    *mesh.discovery.failing.lock() = true;
    let controller = &mesh.plane.controller;

    controller.enqueue(ReconcileRequest::ToolServer(
        ToolKind::RemoteMcpServer,
        key("ns1", "tools"),
    ));
    assert_eq!(
        controller.process_next().await,
        Some(ProcessResult::Retrying(Duration::from_millis(500)))
    );
}

#[tokio::test]
async fn test_watch_loop_reconciles_and_shuts_down() {
    let mesh = Mesh::new(MODEL);
    let controller = mesh.plane.controller.clone();
    let shutdown = controller.shutdown_token();
    let handle = controller.start(mesh.store.subscribe());

    apply_yaml(&mesh.store, AGENT);

    let mut routed = false;
    for _ in 0..200 {
        if mesh.routed("ns1", "a") {
            routed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(routed, "agent was never routed");
    assert_eq!(
        mesh.condition("ns1", "a", CONDITION_READY).await.status,
        ConditionStatus::True
    );

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("controller stops")
        .unwrap();
    assert!(mesh.plane.controller.queue().is_shutting_down());
}

#[tokio::test]
async fn test_deleted_agent_is_deregistered_by_watch_loop() {
    let mesh = Mesh::new(&format!("{}---{}", MODEL, AGENT));
    mesh.reconcile("ns1", "a").await.unwrap();
    assert!(mesh.routed("ns1", "a"));

    let controller = mesh.plane.controller.clone();
    let shutdown = controller.shutdown_token();
    let handle = controller.start(mesh.store.subscribe());

    mesh.store
        .delete(agentmesh_core::domain::resource::ResourceKind::Agent, &key("ns1", "a"))
        .unwrap();

    let mut gone = false;
    for _ in 0..200 {
        if !mesh.routed("ns1", "a") && mesh.store.get_agent(&key("ns1", "a")).await.is_err() {
            gone = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(gone, "agent route or object survived deletion");
    assert!(mesh.applier.deployment(&key("ns1", "a")).is_none());

    shutdown.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_startup_resync_recovers_from_store_outage() {
    let mesh = Mesh::new(&format!("{}---{}", MODEL, AGENT));
    mesh.store.set_unavailable(Some("apiserver down"));

    let controller = mesh.plane.controller.clone();
    let shutdown = controller.shutdown_token();
    let handle = controller.start(mesh.store.subscribe());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!mesh.routed("ns1", "a"));
    mesh.store.set_unavailable(None);

    let mut routed = false;
    for _ in 0..300 {
        if mesh.routed("ns1", "a") {
            routed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(routed, "agent was never routed after the store came back");

    shutdown.cancel();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_interrupts_failing_resync() {
    let mesh = Mesh::new(AGENT);
    mesh.store.set_unavailable(Some("apiserver down"));

    let controller = mesh.plane.controller.clone();
    let shutdown = controller.shutdown_token();
    let handle = controller.start(mesh.store.subscribe());

    tokio::time::sleep(Duration::from_secs(5)).await;
    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("controller stops while resync is failing")
        .unwrap();
    assert!(mesh.plane.controller.queue().is_shutting_down());
}
