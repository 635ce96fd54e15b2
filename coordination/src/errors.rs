//! Handoff failure taxonomy.
//!
//! Explicit typed errors for every failure class in the monitoring and
//! handoff paths. Failures local to a single candidate platform are
//! absorbed by its circuit breaker while the fallback chain proceeds;
//! failures that exhaust the chain always surface to the caller.

use crate::platform::PlatformId;
use crate::types::{SessionId, TaskId};

/// Result alias for coordination operations.
pub type CoordinationResult<T> = Result<T, CoordinationError>;

/// Errors produced by the coordination core.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CoordinationError {
    /// Utilization requested for a platform with no configured ceiling.
    #[error("no context ceiling configured for platform '{platform}'")]
    UnknownPlatform { platform: PlatformId },

    /// Memory-store read failed while building a context package.
    #[error("snapshot unavailable for task '{task_id}': {detail}")]
    SnapshotUnavailable { task_id: TaskId, detail: String },

    /// Every platform in the fallback chain was skipped or failed.
    #[error("fallback chain exhausted for task '{task_id}' ({attempted} candidates tried)")]
    NoEligiblePlatform { task_id: TaskId, attempted: usize },

    /// A second handoff was requested while one is already in flight.
    #[error("handoff already in progress for task '{task_id}'")]
    ConcurrentHandoffRejected { task_id: TaskId },

    /// A platform adapter call failed outright.
    #[error("platform '{platform}' unavailable: {detail}")]
    AdapterUnavailable { platform: PlatformId, detail: String },

    /// A candidate attempt exceeded its computed timeout budget.
    #[error("attempt against '{platform}' exceeded its {timeout_ms}ms budget")]
    AttemptTimedOut { platform: PlatformId, timeout_ms: u64 },

    /// The task changed state while a handoff was in flight; the result
    /// was discarded without committing a record.
    #[error("task '{task_id}' changed state mid-handoff; result discarded")]
    StaleHandoff { task_id: TaskId },

    /// Task is not registered with the fallback manager.
    #[error("unknown task '{task_id}'")]
    UnknownTask { task_id: TaskId },

    /// Session is not registered with the detector.
    #[error("unknown session '{session_id}'")]
    UnknownSession { session_id: SessionId },

    /// Configuration failed cross-field validation.
    #[error("invalid configuration: {detail}")]
    InvalidConfig { detail: String },
}

impl CoordinationError {
    /// Whether this failure is scoped to a single candidate platform.
    ///
    /// Candidate-local failures drive that platform's breaker and the
    /// chain continues; everything else propagates to the caller.
    pub fn is_candidate_local(&self) -> bool {
        matches!(
            self,
            Self::SnapshotUnavailable { .. }
                | Self::AdapterUnavailable { .. }
                | Self::AttemptTimedOut { .. }
        )
    }

    /// Short machine-readable kind for events and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownPlatform { .. } => "unknown_platform",
            Self::SnapshotUnavailable { .. } => "snapshot_unavailable",
            Self::NoEligiblePlatform { .. } => "no_eligible_platform",
            Self::ConcurrentHandoffRejected { .. } => "concurrent_handoff_rejected",
            Self::AdapterUnavailable { .. } => "adapter_unavailable",
            Self::AttemptTimedOut { .. } => "attempt_timed_out",
            Self::StaleHandoff { .. } => "stale_handoff",
            Self::UnknownTask { .. } => "unknown_task",
            Self::UnknownSession { .. } => "unknown_session",
            Self::InvalidConfig { .. } => "invalid_config",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_local_classification() {
        let local = CoordinationError::SnapshotUnavailable {
            task_id: "t1".into(),
            detail: "store offline".into(),
        };
        assert!(local.is_candidate_local());

        let timeout = CoordinationError::AttemptTimedOut {
            platform: PlatformId::GeminiCli,
            timeout_ms: 5000,
        };
        assert!(timeout.is_candidate_local());

        let terminal = CoordinationError::NoEligiblePlatform {
            task_id: "t1".into(),
            attempted: 3,
        };
        assert!(!terminal.is_candidate_local());

        let rejected = CoordinationError::ConcurrentHandoffRejected {
            task_id: "t1".into(),
        };
        assert!(!rejected.is_candidate_local());
    }

    #[test]
    fn test_kind_strings() {
        let err = CoordinationError::UnknownPlatform {
            platform: PlatformId::ClaudeCode,
        };
        assert_eq!(err.kind(), "unknown_platform");
        assert!(err.to_string().contains("claude_code"));
    }
}
