//! Domain events and post-commit distribution.
//!
//! Events describing committed facts (e.g. a stock threshold crossing) are
//! published here only after the owning transaction has committed.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
