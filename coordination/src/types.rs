//! Shared identifiers and session state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::platform::PlatformId;

/// Unique identifier for a long-running task.
pub type TaskId = String;

/// Unique identifier for an agent session on a platform.
pub type SessionId = String;

/// Unique identifier for a memory block.
pub type BlockId = String;

/// Unique identifier for an agent (timeout learning key).
pub type AgentId = String;

/// A live coding-assistant session on one platform.
///
/// The detector updates `tokens_used` and `last_activity` on every
/// utilization sample; the fallback manager flips `active_platform`
/// when a handoff commits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Session identifier.
    pub id: SessionId,
    /// Task this session is working on.
    pub task_id: TaskId,
    /// Platform currently hosting the session.
    pub active_platform: PlatformId,
    /// When the session started.
    pub started_at: DateTime<Utc>,
    /// Cumulative tokens consumed on the active platform.
    pub tokens_used: u64,
    /// Last observed activity.
    pub last_activity: DateTime<Utc>,
}

impl Session {
    /// Create a new session starting now.
    pub fn new(id: impl Into<SessionId>, task_id: impl Into<TaskId>, platform: PlatformId) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            task_id: task_id.into(),
            active_platform: platform,
            started_at: now,
            tokens_used: 0,
            last_activity: now,
        }
    }

    /// Record an observed cumulative token count.
    pub fn record_usage(&mut self, tokens_used: u64) {
        self.tokens_used = tokens_used;
        self.last_activity = Utc::now();
    }

    /// Move the session to a new platform, resetting token accounting.
    pub fn migrate_to(&mut self, platform: PlatformId) {
        self.active_platform = platform;
        self.tokens_used = 0;
        self.last_activity = Utc::now();
    }
}
