//! Bounded in-memory event history.
//!
//! A diagnostics ring the bus can feed: the most recent N events,
//! queryable by task, session, or type. Oldest entries are evicted once
//! the ring is full.

use std::collections::VecDeque;
use std::sync::Mutex;

use super::types::CoordinationEvent;

/// Default ring capacity.
const DEFAULT_CAPACITY: usize = 1024;

/// Bounded ring of recent coordination events.
pub struct EventHistory {
    entries: Mutex<VecDeque<CoordinationEvent>>,
    capacity: usize,
}

impl EventHistory {
    /// Create a history ring with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY))),
            capacity: capacity.max(1),
        }
    }

    /// Record an event, evicting the oldest entry when full.
    pub fn record(&self, event: CoordinationEvent) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(event);
    }

    /// Number of retained events.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Whether the ring is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The most recent `n` events, newest last.
    pub fn recent(&self, n: usize) -> Vec<CoordinationEvent> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.iter().rev().take(n).rev().cloned().collect()
    }

    /// All retained events for a task, in arrival order.
    pub fn for_task(&self, task_id: &str) -> Vec<CoordinationEvent> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .iter()
            .filter(|e| e.task_id() == Some(task_id))
            .cloned()
            .collect()
    }

    /// All retained events for a session, in arrival order.
    pub fn for_session(&self, session_id: &str) -> Vec<CoordinationEvent> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .iter()
            .filter(|e| e.session_id() == Some(session_id))
            .cloned()
            .collect()
    }

    /// All retained events of one type, in arrival order.
    pub fn of_type(&self, event_type: &str) -> Vec<CoordinationEvent> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .iter()
            .filter(|e| e.event_type() == event_type)
            .cloned()
            .collect()
    }

    /// Drop all retained events.
    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

impl Default for EventHistory {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::PlatformId;
    use chrono::Utc;

    fn started(task_id: &str) -> CoordinationEvent {
        CoordinationEvent::HandoffStarted {
            task_id: task_id.to_string(),
            from_platform: PlatformId::ClaudeCode,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_record_and_len() {
        let history = EventHistory::new(8);
        assert!(history.is_empty());
        history.record(started("t1"));
        history.record(started("t2"));
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_eviction_at_capacity() {
        let history = EventHistory::new(3);
        for i in 0..5 {
            history.record(started(&format!("t{}", i)));
        }
        assert_eq!(history.len(), 3);
        let recent = history.recent(3);
        assert_eq!(recent[0].task_id(), Some("t2"));
        assert_eq!(recent[2].task_id(), Some("t4"));
    }

    #[test]
    fn test_for_task() {
        let history = EventHistory::new(8);
        history.record(started("a"));
        history.record(started("b"));
        history.record(started("a"));
        assert_eq!(history.for_task("a").len(), 2);
        assert_eq!(history.for_task("b").len(), 1);
        assert!(history.for_task("c").is_empty());
    }

    #[test]
    fn test_of_type() {
        let history = EventHistory::new(8);
        history.record(started("a"));
        history.record(CoordinationEvent::HandoffFailed {
            task_id: "a".into(),
            from_platform: PlatformId::ClaudeCode,
            attempted: vec![PlatformId::GeminiCli],
            reason: "open".into(),
            timestamp: Utc::now(),
        });
        assert_eq!(history.of_type("handoff_started").len(), 1);
        assert_eq!(history.of_type("handoff_failed").len(), 1);
    }

    #[test]
    fn test_clear() {
        let history = EventHistory::new(4);
        history.record(started("a"));
        history.clear();
        assert!(history.is_empty());
    }
}
