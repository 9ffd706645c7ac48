//! Errores específicos del core y su clasificación.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum EngineError {
    #[error("execution already started for this enrollment")] AlreadyStarted,
    #[error("execution not found")] NotFound,
    #[error("execution already completed")] ExecutionAlreadyCompleted,
    #[error("invalid step index")] InvalidStepIndex,
    #[error("delivery failed permanently: {0}")] DeliveryPermanent(String),
    #[error("delivery retries exhausted after {attempts} attempts: {last_error}")]
    DeliveryExhausted { attempts: u32, last_error: String },
    #[error("persistence failure: {0}")] Persistence(String),
    #[error("internal: {0}")] Internal(String),
}

/// Clasificación gruesa de errores, compartida por la capa de persistencia y
/// la política de reintentos de entrega.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Rechazo local de validación (AlreadyStarted, NotFound, ...).
    Validation,
    /// Fallo de ejecución no clasificado.
    Runtime,
    /// Fallo transitorio: reintentar con backoff es razonable.
    Transient,
    /// Fallo permanente: reintentar no cambia el resultado.
    Permanent,
}

pub fn classify_error(error: &EngineError) -> ErrorClass {
    match error {
        EngineError::AlreadyStarted
        | EngineError::NotFound
        | EngineError::ExecutionAlreadyCompleted
        | EngineError::InvalidStepIndex => ErrorClass::Validation,
        EngineError::DeliveryPermanent(_) | EngineError::DeliveryExhausted { .. } => ErrorClass::Permanent,
        EngineError::Persistence(_) => ErrorClass::Transient,
        EngineError::Internal(_) => ErrorClass::Runtime,
    }
}

impl From<crate::event::StoreError> for EngineError {
    fn from(e: crate::event::StoreError) -> Self {
        EngineError::Persistence(e.to_string())
    }
}
