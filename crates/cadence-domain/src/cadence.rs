//! Definición de cadencia: nombre + secuencia ordenada de pasos.
//!
//! El motor nunca consulta definiciones; recibe siempre un `StepSequence` ya
//! resuelto. Este tipo existe para el registro de cadencias (colaborador
//! externo) y el binario de demostración.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{DomainError, StepSequence};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CadenceDefinition {
    pub id: Uuid,
    pub name: String,
    pub steps: StepSequence,
}

impl CadenceDefinition {
    pub fn new(name: &str, steps: StepSequence) -> Result<Self, DomainError> {
        if name.trim().is_empty() {
            return Err(DomainError::ValidationError("Cadence name must not be empty".into()));
        }
        Ok(Self { id: Uuid::new_v4(),
                  name: name.trim().to_string(),
                  steps })
    }
}
