//! Puerto de entrega: la interfaz abstracta que el motor invoca para los
//! pasos `SendMessage`.
//!
//! El motor trata el envío como una llamada remota falible con política de
//! reintentos propia del bucle; la implementación concreta (SMTP, API,
//! mock) la inyecta el llamador. El puerto puede ser invocado más de una
//! vez con la misma clave de idempotencia a través de reinicios; el motor
//! suprime duplicados por su cuenta una vez que el éxito quedó registrado,
//! así que las implementaciones no están obligadas a deduplicar.

use std::fmt;

use async_trait::async_trait;
use cadence_domain::Contact;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Carga útil de un paso de envío (el motor no interpreta su contenido).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub subject: String,
    pub body: String,
}

/// Recibo de entrega devuelto por el puerto en caso de éxito.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Fallo del puerto de entrega. La clasificación decide la política del
/// bucle: `Transient` se reintenta con backoff acotado, `Permanent` falla el
/// paso de inmediato.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("transient delivery failure: {0}")]
    Transient(String),
    #[error("permanent delivery failure: {0}")]
    Permanent(String),
}

/// Clave de idempotencia de un envío: `(inscripción, paso, versión)`. Un
/// éxito registrado durablemente bajo esta clave suprime todo reenvío.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey {
    pub enrollment_id: Uuid,
    pub step_id: String,
    pub sequence_version: u32,
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:v{}", self.enrollment_id, self.step_id, self.sequence_version)
    }
}

#[async_trait]
pub trait DeliveryPort: Send + Sync {
    async fn send(&self,
                  contact: &Contact,
                  message: &MessagePayload,
                  key: &IdempotencyKey)
                  -> Result<DeliveryReceipt, DeliveryError>;
}
