// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Resource model, policy and fingerprint rules, and the ports the
//! reconcilers depend on.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Pure types and decision functions; no I/O

pub mod resource;
pub mod agent;
pub mod model_config;
pub mod tool_provider;
pub mod namespace_policy;
pub mod secret;
pub mod routing;
pub mod runtime;
pub mod upstream;
pub mod error;
pub mod repository;
pub mod events;
pub mod controller_config;
