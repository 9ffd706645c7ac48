//! Tipos de evento de ejecución y estructura `ExecutionEvent`.
//!
//! Rol en el motor:
//! - Cada instancia de ejecución emite eventos a un `EventStore` append-only
//!   ANTES de que el cambio de estado sea visible (contrato de durabilidad).
//! - El replay lineal de estos eventos reconstruye el `ExecutionState` tras
//!   un reinicio de proceso, sin depender de continuaciones en memoria.
//! - El enum `ExecutionEventKind` es el contrato observable y estable del
//!   motor; los snapshots de secuencia viajan completos dentro de los
//!   eventos para que el replay no dependa de ningún registro externo.
use cadence_domain::{Contact, StepSequence};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::EngineError;

/// Resultado durable de un paso terminado.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepOutcome {
    /// La pausa transcurrió (o quedó obsoleta tras un reinicio).
    Waited,
    /// El puerto de entrega confirmó el envío. Registrar este outcome es lo
    /// que suprime reenvíos bajo la clave de idempotencia.
    Sent { message_id: String, delivered_at: DateTime<Utc> },
    /// El paso avanzó sin invocar el puerto: su clave de idempotencia ya
    /// tenía un éxito registrado (ids de paso repetidos en la secuencia, o
    /// replay tras reinicio).
    SkippedDuplicate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExecutionEventKind {
    /// Primer evento de toda ejecución: fija inscripción, contacto y el
    /// snapshot inicial de secuencia (versión 1).
    ExecutionStarted {
        enrollment_id: Uuid,
        contact: Contact,
        steps: StepSequence,
        sequence_hash: String,
        step_count: usize,
    },
    /// Un paso comenzó su ejecución bajo (índice, versión). No implica éxito.
    StepStarted { step_index: usize, step_id: String, sequence_version: u32 },
    /// Timer durable: la instancia va a suspenderse hasta `resume_at`. Tras
    /// un reinicio se duerme sólo el remanente.
    WaitScheduled {
        step_index: usize,
        step_id: String,
        sequence_version: u32,
        resume_at: DateTime<Utc>,
    },
    /// Intento de entrega fallido (transitorio). `attempt` es acumulativo
    /// para el paso actual, sobrevive reinicios vía replay.
    DeliveryAttemptFailed {
        step_index: usize,
        step_id: String,
        sequence_version: u32,
        attempt: u32,
        error: String,
    },
    /// Un paso terminó correctamente y el cursor avanza a `step_index + 1`.
    StepCompleted {
        step_index: usize,
        step_id: String,
        sequence_version: u32,
        outcome: StepOutcome,
    },
    /// Mutación aceptada: snapshot completo de la nueva secuencia y la
    /// versión que produjo. `completed_by_mutation` indica la regla 4 de
    /// mutación (secuencia acortada por debajo del cursor).
    SequenceMutated {
        steps: StepSequence,
        sequence_version: u32,
        sequence_hash: String,
        completed_by_mutation: bool,
    },
    /// Mutación rechazada (ejecución ya terminal). No altera estado en
    /// replay; queda para auditoría.
    MutationRejected { sequence_hash: String },
    /// Fallo terminal de un paso (agotamiento de reintentos de entrega o
    /// error permanente). La ejecución queda en FAILED (stop-on-failure).
    ExecutionFailed {
        step_index: usize,
        step_id: String,
        sequence_version: u32,
        error: EngineError,
    },
    /// Terminación forzada externa: transición a COMPLETED sin ejecutar más
    /// pasos. Nunca interrumpe un envío en vuelo.
    ExecutionCancelled { reason: Option<String> },
    /// Evento de cierre natural: el cursor alcanzó el final de la secuencia.
    ExecutionCompleted { steps_executed: usize },
}

impl ExecutionEventKind {
    /// Nombre legible de la variante para logging/diagnóstico.
    pub fn variant_name(&self) -> &'static str {
        match self {
            ExecutionEventKind::ExecutionStarted { .. } => "ExecutionStarted",
            ExecutionEventKind::StepStarted { .. } => "StepStarted",
            ExecutionEventKind::WaitScheduled { .. } => "WaitScheduled",
            ExecutionEventKind::DeliveryAttemptFailed { .. } => "DeliveryAttemptFailed",
            ExecutionEventKind::StepCompleted { .. } => "StepCompleted",
            ExecutionEventKind::SequenceMutated { .. } => "SequenceMutated",
            ExecutionEventKind::MutationRejected { .. } => "MutationRejected",
            ExecutionEventKind::ExecutionFailed { .. } => "ExecutionFailed",
            ExecutionEventKind::ExecutionCancelled { .. } => "ExecutionCancelled",
            ExecutionEventKind::ExecutionCompleted { .. } => "ExecutionCompleted",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub seq: u64, // asignado por el EventStore (orden append por ejecución)
    pub execution_id: Uuid,
    pub kind: ExecutionEventKind,
    pub ts: DateTime<Utc>, // metadato (no entra en ningún hash)
}
