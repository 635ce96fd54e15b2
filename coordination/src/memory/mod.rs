//! Task memory: block storage and handoff-time context preservation.

pub mod preservation;
pub mod store;

pub use preservation::{
    CompressionLevel, ContextPackage, ContextPreservation, ContextSnapshot, PreservationConfig,
};
pub use store::{BlockKind, InMemoryStore, MemoryBlock, MemoryStore, StoreError};
