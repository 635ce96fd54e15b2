//! Event bus for handoff coordination.
//!
//! Pub/sub messaging over a Tokio broadcast channel, with an optional
//! bounded in-memory history ring for diagnostics and replay in tests.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use super::history::EventHistory;
use super::types::CoordinationEvent;

/// Channel capacity for broadcast.
const CHANNEL_CAPACITY: usize = 256;

/// Error type for event bus operations.
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("failed to send event: {0}")]
    SendFailed(String),

    #[error("channel closed")]
    ChannelClosed,
}

/// Result type for event bus operations.
pub type EventBusResult<T> = Result<T, EventBusError>;

/// Shared reference to an EventBus.
pub type SharedEventBus = Arc<EventBus>;

/// Event bus with broadcast delivery and optional history capture.
pub struct EventBus {
    sender: broadcast::Sender<CoordinationEvent>,
    history: Option<Arc<EventHistory>>,
}

impl EventBus {
    /// Create a new event bus without history capture.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            history: None,
        }
    }

    /// Create an event bus that records into a bounded history ring.
    pub fn with_history(history: Arc<EventHistory>) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            history: Some(history),
        }
    }

    /// Create a shared reference to this event bus.
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: CoordinationEvent) -> EventBusResult<()> {
        let event_type = event.event_type();

        if let Some(history) = &self.history {
            history.record(event.clone());
        }

        // No receivers is fine; history (if any) already captured it.
        match self.sender.send(event) {
            Ok(count) => {
                debug!(event_type, receivers = count, "event published");
            }
            Err(_) => {
                debug!(event_type, "event published (no receivers)");
            }
        }
        Ok(())
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinationEvent> {
        self.sender.subscribe()
    }

    /// Number of current subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Whether the bus has any subscribers.
    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Event filter for selective subscription.
pub struct EventFilter {
    /// Filter by session id.
    pub session_id: Option<String>,
    /// Filter by task id.
    pub task_id: Option<String>,
    /// Filter by event types.
    pub event_types: Option<Vec<String>>,
}

impl EventFilter {
    /// Create a new empty filter (matches all events).
    pub fn new() -> Self {
        Self {
            session_id: None,
            task_id: None,
            event_types: None,
        }
    }

    /// Filter by session id.
    pub fn session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    /// Filter by task id.
    pub fn task(mut self, task_id: &str) -> Self {
        self.task_id = Some(task_id.to_string());
        self
    }

    /// Filter by event types.
    pub fn types(mut self, event_types: Vec<&str>) -> Self {
        self.event_types = Some(event_types.into_iter().map(String::from).collect());
        self
    }

    /// Check if an event matches this filter.
    pub fn matches(&self, event: &CoordinationEvent) -> bool {
        if let Some(ref sid) = self.session_id {
            if let Some(event_sid) = event.session_id() {
                if event_sid != sid {
                    return false;
                }
            }
        }

        if let Some(ref tid) = self.task_id {
            if let Some(event_tid) = event.task_id() {
                if event_tid != tid {
                    return false;
                }
            }
        }

        if let Some(ref types) = self.event_types {
            if !types.contains(&event.event_type().to_string()) {
                return false;
            }
        }

        true
    }
}

impl Default for EventFilter {
    fn default() -> Self {
        Self::new()
    }
}

/// Filtered event receiver that only yields matching events.
pub struct FilteredReceiver {
    receiver: broadcast::Receiver<CoordinationEvent>,
    filter: EventFilter,
}

impl FilteredReceiver {
    /// Create a new filtered receiver.
    pub fn new(receiver: broadcast::Receiver<CoordinationEvent>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    /// Receive the next matching event.
    pub async fn recv(&mut self) -> Result<CoordinationEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }
}

/// Extension trait for subscribing with filters.
pub trait EventBusExt {
    /// Subscribe with a filter.
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver;
}

impl EventBusExt for EventBus {
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        FilteredReceiver::new(self.subscribe(), filter)
    }
}

impl EventBusExt for SharedEventBus {
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        FilteredReceiver::new(self.subscribe(), filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::PlatformId;
    use chrono::Utc;

    fn handoff_started(task_id: &str) -> CoordinationEvent {
        CoordinationEvent::HandoffStarted {
            task_id: task_id.to_string(),
            from_platform: PlatformId::ClaudeCode,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        bus.publish(handoff_started("task-1")).unwrap();

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.event_type(), "handoff_started");
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new().shared();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(handoff_started("task-1")).unwrap();

        let e1 = rx1.recv().await.unwrap();
        let e2 = rx2.recv().await.unwrap();
        assert_eq!(e1.event_type(), e2.event_type());
    }

    #[test]
    fn test_publish_without_subscribers_is_ok() {
        let bus = EventBus::new();
        assert!(bus.publish(handoff_started("task-1")).is_ok());
        assert!(!bus.has_subscribers());
    }

    #[test]
    fn test_history_capture() {
        let history = Arc::new(EventHistory::new(16));
        let bus = EventBus::with_history(Arc::clone(&history));

        bus.publish(handoff_started("task-1")).unwrap();
        bus.publish(handoff_started("task-2")).unwrap();

        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_event_filter() {
        let filter = EventFilter::new()
            .task("task-1")
            .types(vec!["handoff_started", "handoff_completed"]);

        assert!(filter.matches(&handoff_started("task-1")));
        assert!(!filter.matches(&handoff_started("task-2")));

        let wrong_type = CoordinationEvent::HandoffFailed {
            task_id: "task-1".into(),
            from_platform: PlatformId::ClaudeCode,
            attempted: vec![],
            reason: "x".into(),
            timestamp: Utc::now(),
        };
        assert!(!filter.matches(&wrong_type));
    }

    #[tokio::test]
    async fn test_filtered_receiver() {
        let bus = EventBus::new();
        let filter = EventFilter::new().task("target-task");
        let mut filtered = bus.subscribe_filtered(filter);

        bus.publish(handoff_started("other-task")).unwrap();
        bus.publish(handoff_started("target-task")).unwrap();

        let event = filtered.recv().await.unwrap();
        assert_eq!(event.task_id(), Some("target-task"));
    }
}
