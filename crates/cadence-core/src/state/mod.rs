//! Máquina de estados de ejecución por inscripción.
//!
//! `ExecutionState` es el registro autoritativo de una inscripción. La única
//! función de transición es `apply`, usada tanto por el camino vivo (el actor
//! aplica el evento recién persistido) como por el replay de recuperación:
//! ambas rutas no pueden divergir porque comparten el código.
//!
//! Invariantes observables:
//! - `0 <= current_step_index <= active_sequence.len()`.
//! - `status` pasa a COMPLETED en cuanto `current_step_index >=
//!   active_sequence.len()`, sea por ejecución o por mutación acortadora.
//! - `sequence_version` estrictamente creciente: exactamente +1 por mutación
//!   aceptada; las rechazadas no lo tocan.

use std::collections::HashSet;

use cadence_domain::{Contact, Step, StepSequence};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::{ExecutionEvent, ExecutionEventKind, StepOutcome};
use crate::hashing::sequence_hash;

/// Estado observable de una ejecución.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Running,
    Completed,
    /// Adición deliberada sobre el par RUNNING/COMPLETED original: un envío
    /// que agota sus reintentos deja la inscripción aquí en vez de girar
    /// para siempre en RUNNING.
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }
}

/// Timer durable pendiente: persistido antes de suspender para que un
/// reinicio recalcule el remanente en vez de re-esperar desde cero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingWait {
    pub step_index: usize,
    pub sequence_version: u32,
    pub resume_at: DateTime<Utc>,
}

/// Registro autoritativo del motor para una inscripción.
#[derive(Debug, Clone)]
pub struct ExecutionState {
    pub execution_id: Uuid,
    pub enrollment_id: Uuid,
    pub contact: Contact,
    pub active_sequence: StepSequence,
    pub sequence_hash: String,
    pub current_step_index: usize,
    pub sequence_version: u32,
    pub status: ExecutionStatus,
    /// Claves `(step_id, sequence_version)` con envío ya registrado. Bajo la
    /// clave de idempotencia un envío registrado nunca se repite.
    pub sent_keys: HashSet<(String, u32)>,
    /// `(índice, versión)` del paso con `StepStarted` emitido y aún sin
    /// `StepCompleted`; evita re-emitir el arranque tras un reinicio.
    pub started_step: Option<(usize, u32)>,
    pub pending_wait: Option<PendingWait>,
    /// Intentos de entrega acumulados del paso en curso.
    pub delivery_attempts: u32,
    pub last_error: Option<String>,
}

/// Snapshot de lectura para la superficie de consulta (§ query): los tres
/// campos del contrato más el último error observable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateView {
    pub current_step_index: usize,
    pub sequence_version: u32,
    pub status: ExecutionStatus,
    pub last_error: Option<String>,
}

/// Resultado sincrónico de una solicitud de mutación.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationOutcome {
    pub accepted: bool,
    pub sequence_version: u32,
    pub status: ExecutionStatus,
    pub current_step_index: usize,
}

/// Decisión pura del siguiente paso del bucle de ejecución.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextAction {
    /// La ejecución ya es terminal; no hay nada que hacer.
    Terminal,
    /// Cursor al final de la secuencia: emitir `ExecutionCompleted`.
    Finish,
    /// Ejecutar una pausa. `resume_at` viene del timer durable pendiente si
    /// existe (reinicio a mitad de espera); si es `None` el actor agenda uno
    /// nuevo.
    RunWait {
        step_index: usize,
        step_id: String,
        sequence_version: u32,
        duration_seconds: u64,
        resume_at: Option<DateTime<Utc>>,
    },
    /// Ejecutar un envío. `already_sent` indica que la clave de idempotencia
    /// ya tiene un éxito registrado y el puerto NO debe invocarse.
    RunSend {
        step_index: usize,
        step_id: String,
        sequence_version: u32,
        subject: String,
        body: String,
        already_sent: bool,
    },
}

impl ExecutionState {
    /// Estado inicial a partir del evento `ExecutionStarted`.
    fn from_started(execution_id: Uuid,
                    enrollment_id: Uuid,
                    contact: Contact,
                    steps: StepSequence,
                    hash: String)
                    -> Self {
        // Una secuencia inicial vacía completa en el acto (cursor 0 == len).
        let status = if steps.is_empty() { ExecutionStatus::Completed } else { ExecutionStatus::Running };
        Self { execution_id,
               enrollment_id,
               contact,
               active_sequence: steps,
               sequence_hash: hash,
               current_step_index: 0,
               sequence_version: 1,
               status,
               sent_keys: HashSet::new(),
               started_step: None,
               pending_wait: None,
               delivery_attempts: 0,
               last_error: None }
    }

    /// Reconstruye el estado por replay lineal. Devuelve `None` si la lista
    /// no comienza con `ExecutionStarted` (ejecución desconocida).
    pub fn from_events(execution_id: Uuid, events: &[ExecutionEvent]) -> Option<Self> {
        let mut iter = events.iter();
        let first = iter.next()?;
        let mut state = match &first.kind {
            ExecutionEventKind::ExecutionStarted { enrollment_id,
                                                   contact,
                                                   steps,
                                                   sequence_hash,
                                                   .. } => Self::from_started(execution_id,
                                                                              *enrollment_id,
                                                                              contact.clone(),
                                                                              steps.clone(),
                                                                              sequence_hash.clone()),
            _ => return None,
        };
        for ev in iter {
            state.apply(&ev.kind);
        }
        Some(state)
    }

    /// Única función de transición. Aplica un evento ya durable al estado en
    /// memoria; el replay de recuperación la invoca con exactamente la misma
    /// secuencia de eventos, por lo que el estado reconstruido es idéntico.
    pub fn apply(&mut self, kind: &ExecutionEventKind) {
        match kind {
            // Sólo válido como primer evento; `from_events` ya lo consumió.
            ExecutionEventKind::ExecutionStarted { .. } => {}
            ExecutionEventKind::StepStarted { step_index, sequence_version, .. } => {
                self.started_step = Some((*step_index, *sequence_version));
                self.delivery_attempts = 0;
            }
            ExecutionEventKind::WaitScheduled { step_index,
                                                sequence_version,
                                                resume_at,
                                                .. } => {
                self.pending_wait = Some(PendingWait { step_index: *step_index,
                                                       sequence_version: *sequence_version,
                                                       resume_at: *resume_at });
            }
            ExecutionEventKind::DeliveryAttemptFailed { attempt, error, .. } => {
                self.delivery_attempts = *attempt;
                self.last_error = Some(error.clone());
            }
            ExecutionEventKind::StepCompleted { step_index, step_id, sequence_version, outcome } => {
                if let StepOutcome::Sent { .. } = outcome {
                    self.sent_keys.insert((step_id.clone(), *sequence_version));
                }
                self.current_step_index = step_index + 1;
                self.started_step = None;
                self.pending_wait = None;
                self.delivery_attempts = 0;
                // El estatus cambia en cuanto el cursor alcanza el final,
                // sin esperar al evento de cierre.
                if self.status == ExecutionStatus::Running && self.current_step_index >= self.active_sequence.len() {
                    self.status = ExecutionStatus::Completed;
                }
            }
            ExecutionEventKind::SequenceMutated { steps,
                                                  sequence_version,
                                                  sequence_hash,
                                                  completed_by_mutation } => {
                self.active_sequence = steps.clone();
                self.sequence_hash = sequence_hash.clone();
                self.sequence_version = *sequence_version;
                // La espera abandonada y el arranque del paso quedan
                // obsoletos: el bucle re-evalúa desde el cursor intacto
                // contra la secuencia nueva.
                self.pending_wait = None;
                self.started_step = None;
                self.delivery_attempts = 0;
                if *completed_by_mutation || self.current_step_index >= self.active_sequence.len() {
                    if self.status == ExecutionStatus::Running {
                        self.status = ExecutionStatus::Completed;
                    }
                }
            }
            ExecutionEventKind::MutationRejected { .. } => {}
            ExecutionEventKind::ExecutionFailed { error, .. } => {
                self.status = ExecutionStatus::Failed;
                self.last_error = Some(error.to_string());
            }
            ExecutionEventKind::ExecutionCancelled { .. } => {
                if !self.status.is_terminal() {
                    self.status = ExecutionStatus::Completed;
                }
                self.pending_wait = None;
                self.started_step = None;
            }
            ExecutionEventKind::ExecutionCompleted { .. } => {
                self.status = ExecutionStatus::Completed;
            }
        }
    }

    pub fn view(&self) -> StateView {
        StateView { current_step_index: self.current_step_index,
                    sequence_version: self.sequence_version,
                    status: self.status,
                    last_error: self.last_error.clone() }
    }

    pub fn mutation_outcome(&self, accepted: bool) -> MutationOutcome {
        MutationOutcome { accepted,
                          sequence_version: self.sequence_version,
                          status: self.status,
                          current_step_index: self.current_step_index }
    }
}

/// Planifica una mutación (§ reglas de mutación) sin aplicarla: devuelve el
/// evento a persistir. El llamador debe persistir el evento y luego
/// `apply`-arlo — en ese orden, nunca al revés.
///
/// Reglas:
/// 1. El cursor se conserva sin cambios (los pasos ya ejecutados nunca se
///    re-ejecutan).
/// 2-3. Secuencia reemplazada al completo, versión +1.
/// 4. `len(nueva) <= cursor` fuerza COMPLETED inmediato.
/// 6. Estado terminal rechaza la mutación (no-op auditado); las cadencias no
///    se reinician.
pub fn plan_mutation(state: &ExecutionState, new_steps: &StepSequence) -> ExecutionEventKind {
    let hash = sequence_hash(new_steps);
    if state.status.is_terminal() {
        return ExecutionEventKind::MutationRejected { sequence_hash: hash };
    }
    ExecutionEventKind::SequenceMutated { steps: new_steps.clone(),
                                          sequence_version: state.sequence_version + 1,
                                          sequence_hash: hash,
                                          completed_by_mutation: new_steps.len() <= state.current_step_index }
}

/// Decide la siguiente acción del bucle a partir del estado committeado.
/// Puro: no toca el estado, no tiene efectos.
pub fn next_action(state: &ExecutionState) -> NextAction {
    if state.status.is_terminal() {
        return NextAction::Terminal;
    }
    let idx = state.current_step_index;
    let step = match state.active_sequence.get(idx) {
        None => return NextAction::Finish,
        Some(step) => step,
    };
    let version = state.sequence_version;
    match step {
        Step::Wait { id, duration_seconds } => {
            // Sólo un timer agendado para ESTE (índice, versión) es
            // reutilizable; uno de una versión anterior quedó abandonado.
            let resume_at = state.pending_wait
                                 .as_ref()
                                 .filter(|w| w.step_index == idx && w.sequence_version == version)
                                 .map(|w| w.resume_at);
            NextAction::RunWait { step_index: idx,
                                  step_id: id.clone(),
                                  sequence_version: version,
                                  duration_seconds: *duration_seconds,
                                  resume_at }
        }
        Step::SendMessage { id, subject, body } => {
            let already_sent = state.sent_keys.contains(&(id.clone(), version));
            NextAction::RunSend { step_index: idx,
                                  step_id: id.clone(),
                                  sequence_version: version,
                                  subject: subject.clone(),
                                  body: body.clone(),
                                  already_sent }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::StepOutcome;

    fn seq(n: usize) -> StepSequence {
        let steps = (0..n).map(|i| Step::SendMessage { id: format!("s{i}"),
                                                       subject: format!("subject {i}"),
                                                       body: "hola".into() })
                          .collect();
        StepSequence::new(steps)
    }

    fn running_state(steps: StepSequence) -> ExecutionState {
        let hash = sequence_hash(&steps);
        ExecutionState::from_started(Uuid::new_v4(), Uuid::new_v4(), Contact::new("a@b.com").unwrap(), steps, hash)
    }

    fn complete_step(state: &mut ExecutionState, idx: usize) {
        let step_id = state.active_sequence.get(idx).unwrap().id().to_string();
        let version = state.sequence_version;
        state.apply(&ExecutionEventKind::StepCompleted { step_index: idx,
                                                         step_id: step_id.clone(),
                                                         sequence_version: version,
                                                         outcome: StepOutcome::Sent { message_id: format!("m-{step_id}"),
                                                                                      delivered_at: Utc::now() } });
    }

    #[test]
    fn mutation_preserves_cursor_and_bumps_version() {
        let mut st = running_state(seq(3));
        complete_step(&mut st, 0);
        assert_eq!(st.current_step_index, 1);

        let ev = plan_mutation(&st, &seq(5));
        st.apply(&ev);
        assert_eq!(st.current_step_index, 1);
        assert_eq!(st.sequence_version, 2);
        assert_eq!(st.status, ExecutionStatus::Running);
        assert_eq!(st.active_sequence.len(), 5);
    }

    #[test]
    fn shrink_below_cursor_completes_immediately() {
        let mut st = running_state(seq(3));
        complete_step(&mut st, 0);
        complete_step(&mut st, 1);
        assert_eq!(st.current_step_index, 2);

        let ev = plan_mutation(&st, &seq(1));
        assert!(matches!(ev, ExecutionEventKind::SequenceMutated { completed_by_mutation: true, .. }));
        st.apply(&ev);
        assert_eq!(st.status, ExecutionStatus::Completed);
        assert_eq!(st.current_step_index, 2); // cursor intacto aunque len(seq)=1
        assert_eq!(st.sequence_version, 2);
    }

    #[test]
    fn terminal_state_rejects_mutations_without_version_bump() {
        let mut st = running_state(seq(1));
        complete_step(&mut st, 0);
        assert_eq!(st.status, ExecutionStatus::Completed);

        let ev = plan_mutation(&st, &seq(4));
        assert!(matches!(ev, ExecutionEventKind::MutationRejected { .. }));
        st.apply(&ev);
        assert_eq!(st.sequence_version, 1);
        assert_eq!(st.status, ExecutionStatus::Completed);
    }

    #[test]
    fn version_counts_accepted_mutations_only() {
        let mut st = running_state(seq(3));
        for n in 0..4u32 {
            let ev = plan_mutation(&st, &seq(3 + n as usize));
            st.apply(&ev);
        }
        assert_eq!(st.sequence_version, 5); // 1 + 4 aceptadas
    }

    #[test]
    fn failed_is_terminal_for_mutations() {
        let mut st = running_state(seq(2));
        st.apply(&ExecutionEventKind::ExecutionFailed { step_index: 0,
                                                        step_id: "s0".into(),
                                                        sequence_version: 1,
                                                        error: crate::EngineError::DeliveryExhausted { attempts: 5,
                                                                                                       last_error: "smtp down".into() } });
        assert_eq!(st.status, ExecutionStatus::Failed);
        assert!(st.last_error.as_deref().unwrap().contains("smtp down"));

        let ev = plan_mutation(&st, &seq(4));
        assert!(matches!(ev, ExecutionEventKind::MutationRejected { .. }));
    }

    #[test]
    fn sent_key_suppresses_redelivery_in_next_action() {
        let mut st = running_state(seq(2));
        st.sent_keys.insert(("s0".into(), 1));
        match next_action(&st) {
            NextAction::RunSend { already_sent, step_index, .. } => {
                assert!(already_sent);
                assert_eq!(step_index, 0);
            }
            other => panic!("unexpected action: {other:?}"),
        }
        // La misma clave bajo otra versión NO suprime el envío.
        let ev = plan_mutation(&st, &seq(2));
        st.apply(&ev);
        match next_action(&st) {
            NextAction::RunSend { already_sent, .. } => assert!(!already_sent),
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn stale_pending_wait_is_ignored_after_mutation() {
        let steps = StepSequence::new(vec![Step::Wait { id: "w".into(), duration_seconds: 100 },
                                           Step::SendMessage { id: "m".into(),
                                                               subject: "s".into(),
                                                               body: "b".into() }]);
        let mut st = running_state(steps.clone());
        st.apply(&ExecutionEventKind::WaitScheduled { step_index: 0,
                                                      step_id: "w".into(),
                                                      sequence_version: 1,
                                                      resume_at: Utc::now() + chrono::Duration::seconds(100) });
        assert!(st.pending_wait.is_some());

        let ev = plan_mutation(&st, &steps);
        st.apply(&ev);
        // Tras la mutación el timer agendado quedó abandonado.
        match next_action(&st) {
            NextAction::RunWait { resume_at, sequence_version, .. } => {
                assert!(resume_at.is_none());
                assert_eq!(sequence_version, 2);
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn cancellation_forces_completed() {
        let mut st = running_state(seq(3));
        st.apply(&ExecutionEventKind::ExecutionCancelled { reason: Some("unsubscribe".into()) });
        assert_eq!(st.status, ExecutionStatus::Completed);
        assert_eq!(st.current_step_index, 0);
        assert!(matches!(next_action(&st), NextAction::Terminal));
    }

    #[test]
    fn empty_initial_sequence_completes_at_start() {
        let st = running_state(StepSequence::default());
        assert_eq!(st.status, ExecutionStatus::Completed);
    }
}
