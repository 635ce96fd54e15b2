//! Context preservation for platform handoffs.
//!
//! Builds an importance-ranked, budget-constrained package of memory
//! blocks that fits the destination platform's context window. The top
//! of the ranking and architectural blocks are kept unconditionally so
//! a tight budget never drops irreversible decisions.
//!
//! Packaging is deterministic: a fixed snapshot and budget always
//! produce the same package, with ties broken by recency and then by
//! block id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::store::{BlockKind, MemoryBlock, MemoryStore, StoreError};
use crate::errors::{CoordinationError, CoordinationResult};
use crate::platform::PlatformId;
use crate::types::{SessionId, TaskId};

/// Bytes assumed per token when converting context ceilings to byte budgets.
const BYTES_PER_TOKEN: usize = 4;

/// How aggressively to compress relative to the destination budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionLevel {
    /// Full destination budget.
    Standard,
    /// Reduced budget, applied when a session reaches the warning level.
    Proactive,
    /// Heavily reduced budget, applied at the critical level.
    Aggressive,
}

impl std::fmt::Display for CompressionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::Proactive => write!(f, "proactive"),
            Self::Aggressive => write!(f, "aggressive"),
        }
    }
}

/// Tunables for snapshot compression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreservationConfig {
    /// Budget scale at [`CompressionLevel::Standard`].
    pub standard_scale: f64,
    /// Budget scale at [`CompressionLevel::Proactive`].
    pub proactive_scale: f64,
    /// Budget scale at [`CompressionLevel::Aggressive`].
    pub aggressive_scale: f64,
    /// Blocks at the top of the importance ranking kept unconditionally.
    pub protected_top_k: usize,
    /// Whether architectural blocks are kept regardless of budget.
    pub protect_architectural: bool,
}

impl Default for PreservationConfig {
    fn default() -> Self {
        Self {
            standard_scale: 1.0,
            proactive_scale: 0.75,
            aggressive_scale: 0.5,
            protected_top_k: 10,
            protect_architectural: true,
        }
    }
}

impl PreservationConfig {
    fn scale_for(&self, level: CompressionLevel) -> f64 {
        match level {
            CompressionLevel::Standard => self.standard_scale,
            CompressionLevel::Proactive => self.proactive_scale,
            CompressionLevel::Aggressive => self.aggressive_scale,
        }
    }
}

/// Uncompressed view of a task's context at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub task_id: TaskId,
    pub session_id: SessionId,
    pub platform: PlatformId,
    pub reason: String,
    pub blocks: Vec<MemoryBlock>,
    pub total_blocks: usize,
    /// Total serialized size of all blocks in bytes.
    pub total_size: usize,
    pub created_at: DateTime<Utc>,
}

/// Compressed, importance-ranked context shipped during a handoff.
///
/// Immutable once built; one package per handoff attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextPackage {
    pub task_id: TaskId,
    pub blocks: Vec<MemoryBlock>,
    pub original_block_count: usize,
    pub kept_block_count: usize,
    /// Kept serialized size over original serialized size; 1.0 when no
    /// compression was needed.
    pub compression_ratio: f64,
    pub source_platform: PlatformId,
    pub created_at: DateTime<Utc>,
}

impl ContextPackage {
    /// Total serialized size of the kept blocks in bytes.
    pub fn kept_size(&self) -> usize {
        self.blocks.iter().map(|b| b.serialized_size()).sum()
    }
}

/// Builds context packages against per-platform byte budgets.
pub struct ContextPreservation {
    store: Arc<dyn MemoryStore>,
    config: PreservationConfig,
    /// Context ceilings in tokens, overriding platform defaults.
    ceilings: HashMap<PlatformId, u64>,
}

impl ContextPreservation {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self {
            store,
            config: PreservationConfig::default(),
            ceilings: HashMap::new(),
        }
    }

    /// Override the default compression tunables.
    pub fn with_config(mut self, config: PreservationConfig) -> Self {
        self.config = config;
        self
    }

    /// Override one platform's context ceiling (in tokens).
    pub fn set_ceiling(&mut self, platform: PlatformId, tokens: u64) {
        self.ceilings.insert(platform, tokens);
    }

    fn ceiling(&self, platform: PlatformId) -> u64 {
        self.ceilings
            .get(&platform)
            .copied()
            .unwrap_or_else(|| platform.default_context_ceiling())
    }

    /// Byte budget for a destination platform at a compression level.
    pub fn budget_bytes(&self, platform: PlatformId, level: CompressionLevel) -> usize {
        let raw = self.ceiling(platform) as f64 * BYTES_PER_TOKEN as f64;
        (raw * self.config.scale_for(level)).floor() as usize
    }

    fn map_store_err(task_id: &str, err: StoreError) -> CoordinationError {
        CoordinationError::SnapshotUnavailable {
            task_id: task_id.to_string(),
            detail: err.to_string(),
        }
    }

    /// Read all of a task's blocks into an uncompressed snapshot.
    pub async fn create_snapshot(
        &self,
        task_id: &str,
        session_id: &str,
        platform: PlatformId,
        reason: &str,
    ) -> CoordinationResult<ContextSnapshot> {
        let blocks = self
            .store
            .blocks_for_task(task_id)
            .await
            .map_err(|e| Self::map_store_err(task_id, e))?;
        let total_size = blocks.iter().map(|b| b.serialized_size()).sum();
        debug!(
            task_id,
            session_id,
            %platform,
            reason,
            total_blocks = blocks.len(),
            total_size,
            "snapshot created"
        );
        Ok(ContextSnapshot {
            task_id: task_id.to_string(),
            session_id: session_id.to_string(),
            platform,
            reason: reason.to_string(),
            total_blocks: blocks.len(),
            total_size,
            blocks,
            created_at: Utc::now(),
        })
    }

    /// Build the package shipped to a destination platform.
    ///
    /// Blocks are ranked by importance, then recency, then id; the
    /// ranking is accumulated greedily against the destination's byte
    /// budget. Protected blocks (top-K of the ranking, plus
    /// architectural blocks when configured) are kept even past the
    /// budget.
    pub async fn preserve_for_handoff(
        &self,
        task_id: &str,
        session_id: &str,
        source: PlatformId,
        destination: PlatformId,
        level: CompressionLevel,
    ) -> CoordinationResult<ContextPackage> {
        let snapshot = self
            .create_snapshot(task_id, session_id, source, "handoff")
            .await?;
        let budget = self.budget_bytes(destination, level);
        let package = self.compress(snapshot, source, budget);
        info!(
            task_id,
            %source,
            %destination,
            %level,
            original = package.original_block_count,
            kept = package.kept_block_count,
            compression_ratio = package.compression_ratio,
            "context packaged for handoff"
        );
        Ok(package)
    }

    fn compress(
        &self,
        snapshot: ContextSnapshot,
        source: PlatformId,
        budget: usize,
    ) -> ContextPackage {
        let mut ranked = snapshot.blocks;
        ranked.sort_by(|a, b| {
            b.importance
                .partial_cmp(&a.importance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.last_accessed.cmp(&a.last_accessed))
                .then(a.id.cmp(&b.id))
        });

        let original_count = ranked.len();
        let original_size: usize = ranked.iter().map(|b| b.serialized_size()).sum();

        let mut kept = Vec::new();
        let mut kept_size = 0usize;
        for (rank, block) in ranked.into_iter().enumerate() {
            let size = block.serialized_size();
            let protected = rank < self.config.protected_top_k
                || (self.config.protect_architectural && block.kind == BlockKind::Architectural);
            if protected || kept_size + size <= budget {
                kept_size += size;
                kept.push(block);
            }
        }

        // A non-empty snapshot always yields at least the top-ranked block.
        debug_assert!(original_count == 0 || !kept.is_empty());

        let compression_ratio = if original_size == 0 {
            1.0
        } else {
            kept_size as f64 / original_size as f64
        };

        ContextPackage {
            task_id: snapshot.task_id,
            original_block_count: original_count,
            kept_block_count: kept.len(),
            blocks: kept,
            compression_ratio,
            source_platform: source,
            created_at: Utc::now(),
        }
    }
}
