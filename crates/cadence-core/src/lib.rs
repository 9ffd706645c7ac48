//! cadence-core: núcleo del motor de ejecución de cadencias.
//!
//! Contiene la máquina de estados por inscripción (estado, eventos, replay),
//! el protocolo de mutación de secuencia y el contrato de durabilidad. El
//! runtime asíncrono (actores por inscripción) vive en `cadence-runtime`;
//! este crate es deliberadamente síncrono y determinista para que el replay
//! tras un reinicio reconstruya exactamente el mismo estado.
pub mod constants;
pub mod errors;
pub mod event;
pub mod hashing;
pub mod port;
pub mod repo;
pub mod state;

pub use errors::{classify_error, EngineError, ErrorClass};
pub use event::{EventStore, ExecutionEvent, ExecutionEventKind, InMemoryEventStore, StepOutcome, StoreError};
pub use port::{DeliveryError, DeliveryPort, DeliveryReceipt, IdempotencyKey, MessagePayload};
pub use repo::{ExecutionRepository, InMemoryExecutionRepository};
pub use state::{next_action, plan_mutation, ExecutionState, ExecutionStatus, MutationOutcome, NextAction, PendingWait, StateView};
