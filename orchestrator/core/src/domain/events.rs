// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::resource::{NamespacedName, ResourceKind};
use crate::domain::tool_provider::ToolKind;

/// Reconciliation outcomes published on the event bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ReconcileEvent {
    AgentAccepted {
        agent: NamespacedName,
        generation: i64,
        accepted_at: DateTime<Utc>,
    },
    AgentRejected {
        agent: NamespacedName,
        generation: i64,
        reason: String,
        rejected_at: DateTime<Utc>,
    },
    RoutePublished {
        agent: NamespacedName,
        endpoint: String,
        secret_hash: String,
        redeployed: bool,
        published_at: DateTime<Utc>,
    },
    RouteRemoved {
        agent: NamespacedName,
        removed_at: DateTime<Utc>,
    },
    ToolServerRefreshed {
        kind: ToolKind,
        server: NamespacedName,
        tool_count: usize,
        refreshed_at: DateTime<Utc>,
    },
    DependentsEnqueued {
        kind: ResourceKind,
        source: NamespacedName,
        agents: Vec<NamespacedName>,
        enqueued_at: DateTime<Utc>,
    },
}

impl ReconcileEvent {
    pub fn agent(&self) -> Option<&NamespacedName> {
        match self {
            Self::AgentAccepted { agent, .. }
            | Self::AgentRejected { agent, .. }
            | Self::RoutePublished { agent, .. }
            | Self::RouteRemoved { agent, .. } => Some(agent),
            Self::ToolServerRefreshed { .. } | Self::DependentsEnqueued { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
}

/// Change notification delivered by the watch layer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WatchEvent {
    pub kind: ResourceKind,
    pub key: NamespacedName,
    pub change: ChangeType,
}

impl WatchEvent {
    pub fn new(kind: ResourceKind, key: NamespacedName, change: ChangeType) -> Self {
        Self { kind, key, change }
    }
}
