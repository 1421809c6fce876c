// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod dependency_resolver;
pub mod translator;
pub mod agent_reconciler;
pub mod tool_server_reconciler;
pub mod event_mapper;
pub mod controller;
pub mod control_plane;

// Re-export the reconcile surface for convenience
pub use agent_reconciler::{AgentReconciler, ReconcileOutcome, ReconcilePhase};
pub use control_plane::{ControlPlane, ControlPlaneAdapters};
pub use controller::{Controller, ControllerSettings, ProcessResult};
pub use dependency_resolver::DependencyResolver;
pub use event_mapper::{EventMapper, ReconcileRequest};
pub use tool_server_reconciler::ToolServerReconciler;
pub use translator::{ResolvedTool, SpecTranslator, Translation};
