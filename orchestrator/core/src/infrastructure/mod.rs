// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod repositories;
pub mod event_bus;
pub mod routing_table;
pub mod work_queue;
pub mod downstream;
pub mod upstream_client;
pub mod tool_discovery;

pub use event_bus::{EventBus, EventBusError};
pub use repositories::InMemoryResourceStore;
pub use routing_table::RoutingTable;
