//! Memory block storage.
//!
//! The preservation pipeline reads blocks through the [`MemoryStore`]
//! trait so production backends and tests plug in interchangeably.
//! [`InMemoryStore`] is the bundled backend: a task-indexed map that is
//! enough for coordination itself and for exercising failure paths.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use crate::types::{BlockId, Session, SessionId, TaskId};

/// Classification of a memory block's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    /// System design decisions and structural context.
    Architectural,
    /// Concrete in-progress implementation detail.
    Implementation,
    /// Everything else.
    General,
}

/// One unit of preservable working context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryBlock {
    pub id: BlockId,
    pub task_id: TaskId,
    pub session_id: SessionId,
    pub kind: BlockKind,
    pub content: String,
    /// Importance in `[0.0, 1.0]`; clamped on construction.
    pub importance: f64,
    /// Ids of blocks this one depends on.
    pub relates_to: BTreeSet<BlockId>,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

impl MemoryBlock {
    pub fn new(
        id: impl Into<BlockId>,
        task_id: impl Into<TaskId>,
        session_id: impl Into<SessionId>,
        kind: BlockKind,
        content: impl Into<String>,
        importance: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            task_id: task_id.into(),
            session_id: session_id.into(),
            kind,
            content: content.into(),
            importance: importance.clamp(0.0, 1.0),
            relates_to: BTreeSet::new(),
            created_at: now,
            last_accessed: now,
        }
    }

    /// Record a dependency on another block.
    pub fn relate(mut self, other: impl Into<BlockId>) -> Self {
        self.relates_to.insert(other.into());
        self
    }

    /// Approximate serialized size in bytes, used for budget accounting.
    pub fn serialized_size(&self) -> usize {
        self.content.len()
            + self.id.len()
            + self.relates_to.iter().map(|r| r.len()).sum::<usize>()
    }
}

/// Errors surfaced by memory store backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Read-side interface the preservation pipeline depends on.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// All blocks belonging to a task.
    async fn blocks_for_task(&self, task_id: &str) -> Result<Vec<MemoryBlock>, StoreError>;

    /// Metadata for a session.
    async fn session_metadata(&self, session_id: &str) -> Result<Session, StoreError>;
}

#[derive(Default)]
struct StoreInner {
    blocks: HashMap<BlockId, MemoryBlock>,
    by_task: HashMap<TaskId, Vec<BlockId>>,
    sessions: HashMap<SessionId, Session>,
}

/// In-process store backend.
pub struct InMemoryStore {
    inner: RwLock<StoreInner>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Insert or replace a block.
    pub fn insert_block(&self, block: MemoryBlock) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let ids = inner.by_task.entry(block.task_id.clone()).or_default();
        if !ids.contains(&block.id) {
            ids.push(block.id.clone());
        }
        inner.blocks.insert(block.id.clone(), block);
    }

    /// Insert or replace session metadata.
    pub fn insert_session(&self, session: Session) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.sessions.insert(session.id.clone(), session);
    }

    /// Toggle simulated unavailability. Subsequent reads fail with
    /// [`StoreError::Unavailable`] until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of stored blocks.
    pub fn block_count(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .blocks
            .len()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("store marked unavailable".into()))
        } else {
            Ok(())
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn blocks_for_task(&self, task_id: &str) -> Result<Vec<MemoryBlock>, StoreError> {
        self.check_available()?;
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let ids = match inner.by_task.get(task_id) {
            Some(ids) => ids,
            None => return Ok(Vec::new()),
        };
        Ok(ids
            .iter()
            .filter_map(|id| inner.blocks.get(id))
            .cloned()
            .collect())
    }

    async fn session_metadata(&self, session_id: &str) -> Result<Session, StoreError> {
        self.check_available()?;
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("session {}", session_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::PlatformId;

    fn block(id: &str, task: &str, importance: f64) -> MemoryBlock {
        MemoryBlock::new(id, task, "s1", BlockKind::General, "content", importance)
    }

    #[test]
    fn test_importance_clamped() {
        assert_eq!(block("b1", "t1", 1.7).importance, 1.0);
        assert_eq!(block("b2", "t1", -0.3).importance, 0.0);
        assert_eq!(block("b3", "t1", 0.5).importance, 0.5);
    }

    #[test]
    fn test_serialized_size_counts_refs() {
        let plain = block("b1", "t1", 0.5);
        let related = block("b1", "t1", 0.5).relate("other-block");
        assert!(related.serialized_size() > plain.serialized_size());
    }

    #[tokio::test]
    async fn test_blocks_for_task() {
        let store = InMemoryStore::new();
        store.insert_block(block("b1", "t1", 0.9));
        store.insert_block(block("b2", "t1", 0.4));
        store.insert_block(block("b3", "t2", 0.4));

        let blocks = store.blocks_for_task("t1").await.unwrap();
        assert_eq!(blocks.len(), 2);
        assert!(store.blocks_for_task("t9").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_insert_block_replaces() {
        let store = InMemoryStore::new();
        store.insert_block(block("b1", "t1", 0.3));
        store.insert_block(block("b1", "t1", 0.8));
        let blocks = store.blocks_for_task("t1").await.unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].importance, 0.8);
    }

    #[tokio::test]
    async fn test_session_metadata() {
        let store = InMemoryStore::new();
        let session = Session::new("s1", "t1", PlatformId::ClaudeCode);
        store.insert_session(session);

        let found = store.session_metadata("s1").await.unwrap();
        assert_eq!(found.task_id, "t1");

        let missing = store.session_metadata("s2").await;
        assert!(matches!(missing, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_reads() {
        let store = InMemoryStore::new();
        store.insert_block(block("b1", "t1", 0.5));
        store.set_unavailable(true);

        assert!(matches!(
            store.blocks_for_task("t1").await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(matches!(
            store.session_metadata("s1").await,
            Err(StoreError::Unavailable(_))
        ));

        store.set_unavailable(false);
        assert_eq!(store.blocks_for_task("t1").await.unwrap().len(), 1);
    }

    #[test]
    fn test_block_count() {
        let store = InMemoryStore::new();
        assert_eq!(store.block_count(), 0);
        store.insert_block(block("b1", "t1", 0.5));
        store.insert_block(block("b2", "t2", 0.5));
        assert_eq!(store.block_count(), 2);
    }
}
