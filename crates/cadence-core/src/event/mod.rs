//! Definiciones de eventos y trait EventStore.

mod store;
mod types;

pub use store::{EventStore, InMemoryEventStore, StoreError};
pub use types::{ExecutionEvent, ExecutionEventKind, StepOutcome};
