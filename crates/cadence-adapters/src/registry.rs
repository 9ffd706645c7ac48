//! Registro de cadencias y directorio de inscripciones.
//!
//! Key-value puro, propiedad del llamador. El motor recibe siempre un
//! `StepSequence` ya resuelto y nunca consulta estas estructuras.

use std::collections::HashMap;
use std::sync::Mutex;

use cadence_domain::{CadenceDefinition, Enrollment};
use uuid::Uuid;

pub trait CadenceRegistry: Send + Sync {
    fn insert(&self, definition: CadenceDefinition);
    fn get(&self, id: Uuid) -> Option<CadenceDefinition>;
    fn list(&self) -> Vec<CadenceDefinition>;
}

pub trait EnrollmentDirectory: Send + Sync {
    fn insert(&self, enrollment: Enrollment);
    fn get(&self, id: Uuid) -> Option<Enrollment>;
}

#[derive(Default)]
pub struct InMemoryCadenceRegistry {
    inner: Mutex<HashMap<Uuid, CadenceDefinition>>,
}

impl InMemoryCadenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CadenceRegistry for InMemoryCadenceRegistry {
    fn insert(&self, definition: CadenceDefinition) {
        self.inner.lock().expect("registry lock").insert(definition.id, definition);
    }

    fn get(&self, id: Uuid) -> Option<CadenceDefinition> {
        self.inner.lock().expect("registry lock").get(&id).cloned()
    }

    fn list(&self) -> Vec<CadenceDefinition> {
        self.inner.lock().expect("registry lock").values().cloned().collect()
    }
}

#[derive(Default)]
pub struct InMemoryEnrollmentDirectory {
    inner: Mutex<HashMap<Uuid, Enrollment>>,
}

impl InMemoryEnrollmentDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EnrollmentDirectory for InMemoryEnrollmentDirectory {
    fn insert(&self, enrollment: Enrollment) {
        self.inner.lock().expect("directory lock").insert(enrollment.id, enrollment);
    }

    fn get(&self, id: Uuid) -> Option<Enrollment> {
        self.inner.lock().expect("directory lock").get(&id).cloned()
    }
}
