//! Inscripción: una instanciación de una cadencia contra un contacto.
//!
//! Registro puramente contable (directorio de inscripciones). El estado de
//! ejecución vive en el motor, referenciado por `execution_id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Contact;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: Uuid,
    pub cadence_id: Uuid,
    pub contact: Contact,
    /// Handle opaco asignado por el motor al iniciar la ejecución.
    pub execution_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Enrollment {
    pub fn new(cadence_id: Uuid, contact: Contact, execution_id: Uuid) -> Self {
        Self { id: Uuid::new_v4(),
               cadence_id,
               contact,
               execution_id,
               created_at: Utc::now() }
    }
}
