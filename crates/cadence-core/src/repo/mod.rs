//! Repositorio de ejecuciones: reconstrucción de estado por replay.
//!
//! El repositorio aplica un replay lineal: consume los eventos en orden y
//! delega cada transición en `ExecutionState::apply`. No almacena nada por
//! su cuenta; la fuente de verdad es siempre el `EventStore`.

use uuid::Uuid;

use crate::event::ExecutionEvent;
use crate::state::ExecutionState;

/// Trait para reconstruir (`replay`) el estado de una ejecución a partir de
/// sus eventos. Las implementaciones durables (Postgres) delegan en la
/// versión in-memory para garantizar paridad exacta de reglas.
pub trait ExecutionRepository: Send + Sync {
    /// `None` si los eventos no describen una ejecución válida (lista vacía
    /// o sin `ExecutionStarted` inicial).
    fn load(&self, execution_id: Uuid, events: &[ExecutionEvent]) -> Option<ExecutionState>;
}

#[derive(Default)]
pub struct InMemoryExecutionRepository;

impl InMemoryExecutionRepository {
    pub fn new() -> Self {
        Self
    }
}

impl ExecutionRepository for InMemoryExecutionRepository {
    fn load(&self, execution_id: Uuid, events: &[ExecutionEvent]) -> Option<ExecutionState> {
        ExecutionState::from_events(execution_id, events)
    }
}
