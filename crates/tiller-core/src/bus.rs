// Event sink implementations
//
// These implementations cover examples, tests, and single-process fan-out:
// - EventBus: tokio broadcast fan-out to live subscribers
// - InMemoryEventSink: collects events for inspection in tests
// - NoOpEventSink: discards everything

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};

use crate::error::Result;
use crate::events::StatusEvent;
use crate::traits::EventSink;

// ============================================================================
// EventBus - broadcast fan-out
// ============================================================================

/// Single-process event bus over a tokio broadcast channel.
///
/// Subscribers join and leave at any time; a publish never blocks. Slow
/// subscribers lag and eventually drop messages, disconnected subscribers
/// are ignored - delivery is best-effort by design. Publish order from one
/// publisher is preserved per subscriber.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<StatusEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` undelivered events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to all events published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EventSink for EventBus {
    async fn publish(&self, event: StatusEvent) -> Result<()> {
        // Send errors just mean there are no receivers right now
        let _ = self.sender.send(event);
        Ok(())
    }
}

// ============================================================================
// InMemoryEventSink - collects events for tests
// ============================================================================

/// Event sink that records every published event, in publish order
#[derive(Debug, Default, Clone)]
pub struct InMemoryEventSink {
    events: Arc<RwLock<Vec<StatusEvent>>>,
}

impl InMemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All collected events so far
    pub async fn events(&self) -> Vec<StatusEvent> {
        self.events.read().await.clone()
    }

    pub async fn count(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn clear(&self) {
        self.events.write().await.clear();
    }
}

#[async_trait]
impl EventSink for InMemoryEventSink {
    async fn publish(&self, event: StatusEvent) -> Result<()> {
        self.events.write().await.push(event);
        Ok(())
    }
}

// ============================================================================
// NoOpEventSink
// ============================================================================

/// Event sink that discards all events
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpEventSink;

impl NoOpEventSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn publish(&self, _event: StatusEvent) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Workflow;

    #[tokio::test]
    async fn test_bus_delivers_in_publish_order() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        let mut workflow = Workflow::new("w", None);
        bus.publish(StatusEvent::workflow(&workflow)).await.unwrap();
        workflow.set_status(crate::model::WorkflowStatus::Running);
        bus.publish(StatusEvent::workflow(&workflow)).await.unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(matches!(
            first,
            StatusEvent::Workflow {
                status: crate::model::WorkflowStatus::Pending,
                ..
            }
        ));
        assert!(matches!(
            second,
            StatusEvent::Workflow {
                status: crate::model::WorkflowStatus::Running,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_fine() {
        let bus = EventBus::new(4);
        let workflow = Workflow::new("w", None);
        assert!(bus.publish(StatusEvent::workflow(&workflow)).await.is_ok());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_subscriber_does_not_block_publisher() {
        let bus = EventBus::new(2);
        let rx = bus.subscribe();
        drop(rx);
        let workflow = Workflow::new("w", None);
        for _ in 0..10 {
            bus.publish(StatusEvent::workflow(&workflow)).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_in_memory_sink_collects() {
        let sink = InMemoryEventSink::new();
        let workflow = Workflow::new("w", None);
        sink.publish(StatusEvent::workflow(&workflow)).await.unwrap();
        sink.publish(StatusEvent::workflow(&workflow)).await.unwrap();
        assert_eq!(sink.count().await, 2);
        sink.clear().await;
        assert_eq!(sink.count().await, 0);
    }
}
