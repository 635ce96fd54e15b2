//! Session Coordination Library
//!
//! This library coordinates long-running coding-agent sessions across
//! interchangeable platforms:
//! - Session limit detection with utilization warning levels
//! - Importance-ranked, budget-constrained context preservation
//! - Fallback handoffs across a configurable platform chain
//! - Per-platform circuit breakers
//! - Adaptive per-agent timeouts with performance learning
//!
//! # Control Flow
//!
//! ```text
//! SessionLimitDetector ──(emergency transition)──▶ FallbackManager
//!     FallbackManager ──▶ ContextPreservation   (produce package)
//!                     ──▶ CircuitBreaker        (filter candidates)
//!                     ──▶ PlatformAdapter       (ship the package)
//!                     ──▶ HandoffLog            (persist the record)
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use coordination::{
//!     CircuitBreaker, ContextPreservation, EventBus, FallbackManager,
//!     InMemoryStore, IntelligentTimeoutManager, PlatformId,
//! };
//! use std::sync::Arc;
//!
//! let bus = EventBus::new().shared();
//! let store = Arc::new(InMemoryStore::new());
//! let manager = Arc::new(FallbackManager::new(
//!     Arc::new(ContextPreservation::new(store)),
//!     Arc::new(CircuitBreaker::default()),
//!     Arc::new(IntelligentTimeoutManager::default()),
//!     PlatformId::all().to_vec(),
//!     bus,
//! ));
//! manager.register_task("task-1", "sess-1", PlatformId::ClaudeCode);
//! ```

pub mod breaker;
pub mod config;
pub mod detector;
pub mod errors;
pub mod events;
pub mod fallback;
pub mod memory;
pub mod otel;
pub mod platform;
pub mod timeout;
pub mod types;

// Re-export key breaker types
pub use breaker::{BreakerConfig, CircuitBreaker, CircuitState, PlatformCircuit};

// Re-export configuration
pub use config::CoordinationConfig;

// Re-export key detector types
pub use detector::{MetricsSource, SessionLimitDetector, UtilizationSample, WarningLevel};

// Re-export the error taxonomy
pub use errors::{CoordinationError, CoordinationResult};

// Re-export key event types
pub use events::{
    CoordinationEvent, EventBus, EventBusExt, EventFilter, EventHistory, SharedEventBus,
};

// Re-export key fallback types
pub use fallback::{FallbackManager, HandoffLog, HandoffRecord, TaskPhase};

// Re-export key memory types
pub use memory::{
    BlockKind, CompressionLevel, ContextPackage, ContextPreservation, ContextSnapshot,
    InMemoryStore, MemoryBlock, MemoryStore, PreservationConfig, StoreError,
};

// Re-export the platform seam
pub use platform::{AdapterError, InvokeReceipt, PlatformAdapter, PlatformId};

// Re-export key timeout types
pub use timeout::{
    AgentPerformance, IntelligentTimeoutManager, OperationalMode, ProgressiveTimeout, SystemLoad,
    TaskComplexity, TimeoutConfig, TimeoutResult,
};

// Re-export shared identifiers
pub use types::{AgentId, BlockId, Session, SessionId, TaskId};
