// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! AgentMesh orchestrator core
//!
//! Reconciliation and dependency propagation for declarative Agents: the
//! namespace policy engine, secret fingerprinting, dependency resolution,
//! spec translation, the reconcile state machine and the routing table.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** `domain` types and rules, `application` reconcilers,
//!   `infrastructure` adapters

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
