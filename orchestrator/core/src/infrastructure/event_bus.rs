// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus Implementation - Pub/Sub for Reconcile Events
//
// Provides in-memory event streaming using tokio broadcast channels.
// Lets the CLI, tests and observers follow reconciliation outcomes.
//
// In-memory only: events published with no subscriber are dropped.

use crate::domain::events::ReconcileEvent;
use crate::domain::resource::NamespacedName;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Event bus for publishing and subscribing to reconcile events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<ReconcileEvent>>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity
    /// Capacity determines how many events can be buffered before dropping old ones
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Create event bus with default capacity (1000)
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: ReconcileEvent) {
        debug!("Publishing event: {:?}", event);

        // send() errors only when nobody is listening
        let receiver_count = self.sender.send(event).unwrap_or(0);
        if receiver_count == 0 {
            debug!("No subscribers listening to event");
        }
    }

    /// Subscribe to all reconcile events
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to events about a single agent
    pub fn subscribe_agent(&self, agent: NamespacedName) -> AgentEventReceiver {
        AgentEventReceiver {
            receiver: self.sender.subscribe(),
            agent,
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Receiver for all reconcile events
pub struct EventReceiver {
    receiver: broadcast::Receiver<ReconcileEvent>,
}

impl EventReceiver {
    /// Receive the next event (waits until one is available)
    pub async fn recv(&mut self) -> Result<ReconcileEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<ReconcileEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }

    /// Drain everything currently buffered
    pub fn drain(&mut self) -> Vec<ReconcileEvent> {
        let mut events = Vec::new();
        loop {
            match self.try_recv() {
                Ok(event) => events.push(event),
                Err(EventBusError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        events
    }
}

/// Receiver filtered to one agent identity
pub struct AgentEventReceiver {
    receiver: broadcast::Receiver<ReconcileEvent>,
    agent: NamespacedName,
}

impl AgentEventReceiver {
    /// Receive the next event about this agent, skipping all others
    pub async fn recv(&mut self) -> Result<ReconcileEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if event.agent() == Some(&self.agent) {
                return Ok(event);
            }
        }
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();
        let agent = NamespacedName::new("ns1", "a");

        event_bus.publish(ReconcileEvent::AgentAccepted {
            agent: agent.clone(),
            generation: 3,
            accepted_at: Utc::now(),
        });

        match receiver.recv().await.unwrap() {
            ReconcileEvent::AgentAccepted { agent: received, generation, .. } => {
                assert_eq!(received, agent);
                assert_eq!(generation, 3);
            }
            other => panic!("Wrong event type received: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_agent_event_filtering() {
        let event_bus = EventBus::new(10);
        let agent = NamespacedName::new("ns1", "a");
        let mut receiver = event_bus.subscribe_agent(agent.clone());

        event_bus.publish(ReconcileEvent::RouteRemoved {
            agent: NamespacedName::new("ns1", "other"),
            removed_at: Utc::now(),
        });
        event_bus.publish(ReconcileEvent::RouteRemoved {
            agent: agent.clone(),
            removed_at: Utc::now(),
        });

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.agent(), Some(&agent));
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let event_bus = EventBus::new(10);
        let mut receiver1 = event_bus.subscribe();
        let mut receiver2 = event_bus.subscribe();
        assert_eq!(event_bus.subscriber_count(), 2);

        event_bus.publish(ReconcileEvent::RouteRemoved {
            agent: NamespacedName::new("ns1", "a"),
            removed_at: Utc::now(),
        });

        let _ = receiver1.recv().await.unwrap();
        assert_eq!(receiver2.drain().len(), 1);
    }
}
