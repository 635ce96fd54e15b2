//! Event types for handoff coordination.
//!
//! These events drive the pub/sub system; persistence, logging, and the
//! reactive handoff trigger are all independent subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::breaker::CircuitState;
use crate::detector::WarningLevel;
use crate::platform::PlatformId;
use crate::types::{SessionId, TaskId};

/// Unique identifier for events.
pub type EventId = String;

/// All coordination events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinationEvent {
    /// A session's warning level increased.
    LevelTransition {
        session_id: SessionId,
        task_id: TaskId,
        platform: PlatformId,
        old_level: WarningLevel,
        new_level: WarningLevel,
        utilization: f64,
        timestamp: DateTime<Utc>,
    },

    /// A platform's circuit changed state.
    BreakerStateChanged {
        platform: PlatformId,
        old_state: CircuitState,
        new_state: CircuitState,
        timestamp: DateTime<Utc>,
    },

    /// A handoff attempt began for a task.
    HandoffStarted {
        task_id: TaskId,
        from_platform: PlatformId,
        timestamp: DateTime<Utc>,
    },

    /// A handoff committed to a new platform.
    HandoffCompleted {
        task_id: TaskId,
        from_platform: PlatformId,
        to_platform: PlatformId,
        compression_ratio: f64,
        timestamp: DateTime<Utc>,
    },

    /// The fallback chain was exhausted.
    HandoffFailed {
        task_id: TaskId,
        from_platform: PlatformId,
        attempted: Vec<PlatformId>,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl CoordinationEvent {
    /// Generate a new event id.
    pub fn new_id() -> EventId {
        Uuid::new_v4().to_string()
    }

    /// Build a breaker state-change event stamped now.
    pub fn breaker_state_changed(
        platform: PlatformId,
        old_state: CircuitState,
        new_state: CircuitState,
    ) -> Self {
        Self::BreakerStateChanged {
            platform,
            old_state,
            new_state,
            timestamp: Utc::now(),
        }
    }

    /// Get the timestamp of this event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::LevelTransition { timestamp, .. } => *timestamp,
            Self::BreakerStateChanged { timestamp, .. } => *timestamp,
            Self::HandoffStarted { timestamp, .. } => *timestamp,
            Self::HandoffCompleted { timestamp, .. } => *timestamp,
            Self::HandoffFailed { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type as a string.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::LevelTransition { .. } => "level_transition",
            Self::BreakerStateChanged { .. } => "breaker_state_changed",
            Self::HandoffStarted { .. } => "handoff_started",
            Self::HandoffCompleted { .. } => "handoff_completed",
            Self::HandoffFailed { .. } => "handoff_failed",
        }
    }

    /// Get the session id if this event is session-scoped.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::LevelTransition { session_id, .. } => Some(session_id),
            _ => None,
        }
    }

    /// Get the task id if this event is task-scoped.
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::LevelTransition { task_id, .. } => Some(task_id),
            Self::HandoffStarted { task_id, .. } => Some(task_id),
            Self::HandoffCompleted { task_id, .. } => Some(task_id),
            Self::HandoffFailed { task_id, .. } => Some(task_id),
            Self::BreakerStateChanged { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_strings() {
        let event = CoordinationEvent::breaker_state_changed(
            PlatformId::ClaudeCode,
            CircuitState::Closed,
            CircuitState::Open,
        );
        assert_eq!(event.event_type(), "breaker_state_changed");
        assert!(event.task_id().is_none());
        assert!(event.session_id().is_none());
    }

    #[test]
    fn test_task_scoped_events() {
        let event = CoordinationEvent::HandoffCompleted {
            task_id: "task-1".into(),
            from_platform: PlatformId::ClaudeCode,
            to_platform: PlatformId::GeminiCli,
            compression_ratio: 0.42,
            timestamp: Utc::now(),
        };
        assert_eq!(event.task_id(), Some("task-1"));
        assert_eq!(event.event_type(), "handoff_completed");
    }

    #[test]
    fn test_serde_tagged() {
        let event = CoordinationEvent::HandoffFailed {
            task_id: "task-9".into(),
            from_platform: PlatformId::QwenCode,
            attempted: vec![PlatformId::Iflow],
            reason: "all circuits open".into(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"handoff_failed\""));
        let parsed: CoordinationEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.event_type(), "handoff_failed");
    }
}
