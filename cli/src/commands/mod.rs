// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the AgentMesh CLI

pub mod config;
pub mod dependents;
pub mod reconcile;
pub mod run;

pub use self::config::ConfigCommand;
pub use self::dependents::DependentsArgs;
pub use self::reconcile::{OutputFormat, ReconcileArgs};
pub use self::run::RunArgs;
