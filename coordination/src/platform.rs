//! Platform identity and the adapter seam.
//!
//! A "platform" is one interchangeable coding-agent backend (the CLI or
//! router endpoint actually executing the task). The coordination core
//! never speaks a platform protocol itself; it talks to each platform
//! through the [`PlatformAdapter`] trait and only knows the platform's
//! context ceiling and health.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::ContextPackage;

/// Known coding-agent platforms in the fallback pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformId {
    /// Claude Code CLI.
    ClaudeCode,
    /// Gemini CLI.
    GeminiCli,
    /// Qwen Code CLI.
    QwenCode,
    /// iFlow CLI.
    Iflow,
}

impl PlatformId {
    /// All defined platforms, in default fallback order.
    pub fn all() -> &'static [PlatformId] {
        &[
            Self::ClaudeCode,
            Self::GeminiCli,
            Self::QwenCode,
            Self::Iflow,
        ]
    }

    /// Shipped context-window ceiling in tokens.
    ///
    /// Applied when a config file does not override them; the detector
    /// only ever consults the configured map.
    pub fn default_context_ceiling(&self) -> u64 {
        match self {
            Self::ClaudeCode => 200_000,
            Self::GeminiCli => 1_000_000,
            Self::QwenCode => 262_144,
            Self::Iflow => 131_072,
        }
    }
}

impl std::fmt::Display for PlatformId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ClaudeCode => write!(f, "claude_code"),
            Self::GeminiCli => write!(f, "gemini_cli"),
            Self::QwenCode => write!(f, "qwen_code"),
            Self::Iflow => write!(f, "iflow"),
        }
    }
}

/// Receipt returned by a platform adapter after accepting a handoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeReceipt {
    /// Platform that accepted the package.
    pub platform: PlatformId,
    /// Wall-clock time the adapter call took.
    pub latency_ms: u64,
    /// When the platform accepted the package.
    pub accepted_at: DateTime<Utc>,
}

impl InvokeReceipt {
    /// Create a receipt stamped now.
    pub fn new(platform: PlatformId, latency_ms: u64) -> Self {
        Self {
            platform,
            latency_ms,
            accepted_at: Utc::now(),
        }
    }
}

/// Adapter-level failure. Converted into a candidate-local
/// [`crate::errors::CoordinationError`] by the fallback manager.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AdapterError {
    /// Platform endpoint could not be reached.
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// Platform refused the context package.
    #[error("rejected: {0}")]
    Rejected(String),
}

/// One interchangeable agent backend.
///
/// `invoke` serves double duty: ordinary task execution (whose outcomes
/// feed the timeout manager's performance learning) and the handoff call
/// that transfers a context package to this platform.
#[async_trait::async_trait]
pub trait PlatformAdapter: Send + Sync {
    /// Which platform this adapter fronts.
    fn platform(&self) -> PlatformId;

    /// Cheap liveness probe.
    async fn health_check(&self) -> bool;

    /// Ship a context package to this platform.
    async fn invoke(&self, package: &ContextPackage) -> Result<InvokeReceipt, AdapterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ceilings() {
        assert_eq!(PlatformId::ClaudeCode.default_context_ceiling(), 200_000);
        assert_eq!(PlatformId::GeminiCli.default_context_ceiling(), 1_000_000);
    }

    #[test]
    fn test_display_snake_case() {
        assert_eq!(PlatformId::ClaudeCode.to_string(), "claude_code");
        assert_eq!(PlatformId::Iflow.to_string(), "iflow");
    }

    #[test]
    fn test_serde_matches_display() {
        for &platform in PlatformId::all() {
            let json = serde_json::to_string(&platform).unwrap();
            assert_eq!(json, format!("\"{}\"", platform));
            let parsed: PlatformId = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, platform);
        }
    }

    #[test]
    fn test_all_is_default_fallback_order() {
        assert_eq!(PlatformId::all()[0], PlatformId::ClaudeCode);
        assert_eq!(PlatformId::all().len(), 4);
    }
}
