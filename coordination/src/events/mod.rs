//! Event system for handoff coordination.
//!
//! Level transitions, breaker state changes, and handoff outcomes are
//! modeled as messages on a broadcast bus rather than direct callbacks,
//! so logging, persistence, and the reactive handoff trigger stay
//! independent subscribers.

pub mod bus;
pub mod history;
pub mod types;

pub use bus::{EventBus, EventBusError, EventBusExt, EventFilter, FilteredReceiver, SharedEventBus};
pub use history::EventHistory;
pub use types::{CoordinationEvent, EventId};
