use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use super::{ExecutionEvent, ExecutionEventKind};

/// Error de la capa de almacenamiento de eventos. La distinción
/// transitorio/permanente guía los reintentos del driver; para la instancia
/// de ejecución cualquier fallo de append es fatal para su progreso (no se
/// avanza en memoria más allá de lo persistido).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("transient store failure: {0}")]
    Transient(String),
    #[error("store failure: {0}")]
    Permanent(String),
}

/// Almacenamiento de eventos append-only.
///
/// Receptores `&self`: un único store es compartido por todas las instancias
/// de ejecución y por la superficie de consulta; las implementaciones
/// resuelven su propia exclusión (mutex interno, pool de conexiones).
pub trait EventStore: Send + Sync {
    /// Agrega un evento a partir de su kind y devuelve el evento completo
    /// (con seq y ts asignados por el store).
    fn append(&self, execution_id: Uuid, kind: ExecutionEventKind) -> Result<ExecutionEvent, StoreError>;
    /// Lista eventos de una ejecución (orden ascendente por seq).
    fn list(&self, execution_id: Uuid) -> Result<Vec<ExecutionEvent>, StoreError>;
    /// Ids de todas las ejecuciones con al menos un evento (scan de
    /// recuperación tras reinicio).
    fn executions(&self) -> Result<Vec<Uuid>, StoreError>;
}

#[derive(Default)]
pub struct InMemoryEventStore {
    inner: Mutex<HashMap<Uuid, Vec<ExecutionEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventStore for InMemoryEventStore {
    fn append(&self, execution_id: Uuid, kind: ExecutionEventKind) -> Result<ExecutionEvent, StoreError> {
        let mut inner = self.inner
                            .lock()
                            .map_err(|e| StoreError::Permanent(format!("store poisoned: {e}")))?;
        let vec = inner.entry(execution_id).or_default();
        let seq = vec.len() as u64;
        let ev = ExecutionEvent { seq,
                                  execution_id,
                                  kind,
                                  ts: Utc::now() };
        vec.push(ev.clone());
        Ok(ev)
    }

    fn list(&self, execution_id: Uuid) -> Result<Vec<ExecutionEvent>, StoreError> {
        let inner = self.inner
                        .lock()
                        .map_err(|e| StoreError::Permanent(format!("store poisoned: {e}")))?;
        Ok(inner.get(&execution_id).cloned().unwrap_or_default())
    }

    fn executions(&self) -> Result<Vec<Uuid>, StoreError> {
        let inner = self.inner
                        .lock()
                        .map_err(|e| StoreError::Permanent(format!("store poisoned: {e}")))?;
        Ok(inner.keys().copied().collect())
    }
}
