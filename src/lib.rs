//! CadenceFlow Rust Library
//!
//! Este crate actúa como la fachada del workspace:
//! - Re-exporta el motor (`CadenceEngine`) y los tipos de dominio que usa el
//!   contrato externo.
//! - Expone `config` con la configuración de entorno del binario de
//!   demostración.
//!
//! Puede usarse desde `main.rs` o por otros crates/clientes.

pub mod config;

pub use cadence_adapters::{InMemoryCadenceRegistry, InMemoryEnrollmentDirectory, MockDeliveryPort};
pub use cadence_core::{EngineError, ExecutionStatus, InMemoryEventStore, StateView};
pub use cadence_domain::{CadenceDefinition, Contact, Enrollment, Step, StepSequence};
pub use cadence_runtime::{CadenceEngine, RetryPolicy};
