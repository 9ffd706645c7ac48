//! Modelo de pasos de una cadencia.
//!
//! Un `Step` es la unidad de trabajo de una secuencia: una pausa temporizada
//! (`Wait`) o el envío de un mensaje (`SendMessage`). Los pasos son
//! inmutables una vez que forman parte de un `StepSequence`; una mutación
//! reemplaza la secuencia completa, nunca edita pasos in-place.
//!
//! El formato serde (tag `type`, variantes en SCREAMING_SNAKE_CASE) conserva
//! el formato de wire original (`SEND_MESSAGE` / `WAIT`).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Paso tipado de una cadencia. Dos variantes, sin más semántica que la
/// declarada: el motor no interpreta `subject`/`body`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Step {
    /// Envío de un mensaje al contacto de la inscripción.
    SendMessage { id: String, subject: String, body: String },
    /// Pausa de `duration_seconds` segundos (no negativa por construcción).
    #[serde(rename_all = "camelCase")]
    Wait { id: String, duration_seconds: u64 },
}

impl Step {
    /// Identificador declarado del paso. La unicidad NO se valida aquí
    /// (es responsabilidad del registro de cadencias).
    pub fn id(&self) -> &str {
        match self {
            Step::SendMessage { id, .. } => id,
            Step::Wait { id, .. } => id,
        }
    }

    /// Nombre estable de la variante, para logging y persistencia.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Step::SendMessage { .. } => "SEND_MESSAGE",
            Step::Wait { .. } => "WAIT",
        }
    }

    /// Duración de la pausa como `Duration` (cero para `SendMessage`).
    pub fn wait_duration(&self) -> Duration {
        match self {
            Step::Wait { duration_seconds, .. } => Duration::from_secs(*duration_seconds),
            Step::SendMessage { .. } => Duration::ZERO,
        }
    }

    pub fn is_wait(&self) -> bool {
        matches!(self, Step::Wait { .. })
    }
}

/// Secuencia ordenada e inmutable de pasos. Snapshot completo: una mutación
/// construye un `StepSequence` nuevo y lo sustituye al anterior.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepSequence {
    steps: Vec<Step>,
}

impl StepSequence {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Paso en `index`, o `None` si el índice quedó fuera de la secuencia
    /// (posible tras una mutación que acorta).
    pub fn get(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Ids de los pasos en orden (para hashing de snapshot y trazabilidad).
    pub fn step_ids(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.id()).collect()
    }
}

impl From<Vec<Step>> for StepSequence {
    fn from(steps: Vec<Step>) -> Self {
        Self::new(steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn send(id: &str) -> Step {
        Step::SendMessage { id: id.into(),
                            subject: format!("subject-{id}"),
                            body: format!("body-{id}") }
    }

    #[test]
    fn step_wire_format_roundtrip() {
        let wait = Step::Wait { id: "w1".into(), duration_seconds: 30 };
        let v = serde_json::to_value(&wait).expect("serialize wait");
        assert_eq!(v["type"], "WAIT");
        assert_eq!(v["durationSeconds"], 30);

        let msg = send("m1");
        let v = serde_json::to_value(&msg).expect("serialize send");
        assert_eq!(v["type"], "SEND_MESSAGE");
        assert_eq!(v["subject"], "subject-m1");

        let back: Step = serde_json::from_value(v).expect("deserialize send");
        assert_eq!(back, msg);
    }

    #[test]
    fn sequence_indexing_and_ids() {
        let seq = StepSequence::new(vec![Step::Wait { id: "w".into(), duration_seconds: 0 }, send("m")]);
        assert_eq!(seq.len(), 2);
        assert!(seq.get(0).unwrap().is_wait());
        assert!(seq.get(2).is_none());
        assert_eq!(seq.step_ids(), vec!["w", "m"]);
    }
}
