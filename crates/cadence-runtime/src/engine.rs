//! Fachada del motor de cadencias.
//!
//! `CadenceEngine` expone las operaciones del contrato externo (`start`,
//! `mutate`, `query`, `cancel`) más la recuperación tras reinicio
//! (`recover`). No mantiene estado mutable propio más allá de los mapas de
//! instancias y snapshots: la fuente de verdad es siempre el `EventStore`
//! inyectado por el llamador.

use std::sync::Arc;

use cadence_core::hashing::sequence_hash;
use cadence_core::{EngineError, EventStore, ExecutionEventKind, ExecutionRepository, ExecutionState,
                   InMemoryExecutionRepository, MutationOutcome, StateView, DeliveryPort};
use cadence_domain::{Contact, StepSequence};
use dashmap::DashMap;
use log::{debug, warn};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::instance::{ExecutionInstance, InstanceCommand};
use crate::retry::RetryPolicy;

/// Capacidad del canal de comandos por instancia. Los comandos en exceso
/// esperan en el emisor; el orden de llegada se conserva.
const COMMAND_BUFFER: usize = 16;

pub struct CadenceEngine {
    store: Arc<dyn EventStore>,
    port: Arc<dyn DeliveryPort>,
    retry: RetryPolicy,
    /// Último estado committeado por ejecución: la superficie de consulta
    /// lee de aquí y nunca bloquea al escritor.
    snapshots: Arc<DashMap<Uuid, StateView>>,
    /// inscripción -> handle de ejecución (unicidad AlreadyStarted).
    enrollments: DashMap<Uuid, Uuid>,
    /// handle de ejecución -> canal de comandos de la instancia viva.
    instances: DashMap<Uuid, mpsc::Sender<InstanceCommand>>,
}

impl CadenceEngine {
    pub fn new(store: Arc<dyn EventStore>, port: Arc<dyn DeliveryPort>) -> Self {
        Self { store,
               port,
               retry: RetryPolicy::default(),
               snapshots: Arc::new(DashMap::new()),
               enrollments: DashMap::new(),
               instances: DashMap::new() }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Inicia una ejecución para la inscripción. Falla con `AlreadyStarted`
    /// si la inscripción ya tiene instancia. El evento `ExecutionStarted`
    /// queda durable antes de que el handle sea visible.
    pub async fn start(&self,
                       enrollment_id: Uuid,
                       contact: Contact,
                       initial_sequence: StepSequence)
                       -> Result<Uuid, EngineError> {
        use dashmap::mapref::entry::Entry;

        let execution_id = Uuid::new_v4();
        match self.enrollments.entry(enrollment_id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyStarted),
            Entry::Vacant(slot) => {
                slot.insert(execution_id);
            }
        }

        let kind = ExecutionEventKind::ExecutionStarted { enrollment_id,
                                                          contact,
                                                          steps: initial_sequence.clone(),
                                                          sequence_hash: sequence_hash(&initial_sequence),
                                                          step_count: initial_sequence.len() };
        let event = match self.store.append(execution_id, kind) {
            Ok(ev) => ev,
            Err(e) => {
                // Nada quedó durable: liberar la inscripción para que el
                // llamador pueda reintentar.
                self.enrollments.remove(&enrollment_id);
                return Err(EngineError::Persistence(e.to_string()));
            }
        };

        let state = ExecutionState::from_events(execution_id, std::slice::from_ref(&event))
            .ok_or_else(|| EngineError::Internal("fresh execution did not replay".into()))?;
        self.snapshots.insert(execution_id, state.view());
        debug!("execution started execution_id={execution_id} enrollment_id={enrollment_id} steps={}",
               initial_sequence.len());
        self.spawn_if_running(state);
        Ok(execution_id)
    }

    /// Reemplaza la secuencia activa de una ejecución. `accepted == false`
    /// únicamente si la instancia ya es terminal.
    pub async fn mutate(&self, execution_id: Uuid, steps: StepSequence) -> Result<MutationOutcome, EngineError> {
        let view = self.query(execution_id)?;
        if view.status.is_terminal() {
            return Ok(self.reject_terminal_mutation(execution_id, &steps, view));
        }
        if let Some(tx) = self.instances.get(&execution_id).map(|e| e.value().clone()) {
            let (reply_tx, reply_rx) = oneshot::channel();
            let cmd = InstanceCommand::Mutate { steps: steps.clone(), reply: reply_tx };
            if tx.send(cmd).await.is_ok() {
                if let Ok(outcome) = reply_rx.await {
                    return outcome;
                }
            }
        }
        // La instancia terminó entre la consulta y el envío del comando (o
        // quedó detenida por fallo de persistencia): decidir por snapshot.
        let view = self.query(execution_id)?;
        if view.status.is_terminal() {
            Ok(self.reject_terminal_mutation(execution_id, &steps, view))
        } else {
            Err(EngineError::Persistence("execution instance is not accepting commands".into()))
        }
    }

    /// Lee el último estado durablemente committeado. Nunca bloquea sobre el
    /// escritor; puede retrasarse a lo sumo una escritura de persistencia.
    pub fn query(&self, execution_id: Uuid) -> Result<StateView, EngineError> {
        self.snapshots
            .get(&execution_id)
            .map(|entry| entry.value().clone())
            .ok_or(EngineError::NotFound)
    }

    /// Terminación externa: transición forzada a COMPLETED. Interrumpe una
    /// espera en curso, nunca un envío en vuelo.
    pub async fn cancel(&self, execution_id: Uuid, reason: Option<String>) -> Result<StateView, EngineError> {
        let view = self.query(execution_id)?;
        if view.status.is_terminal() {
            return Ok(view);
        }
        if let Some(tx) = self.instances.get(&execution_id).map(|e| e.value().clone()) {
            let (reply_tx, reply_rx) = oneshot::channel();
            let cmd = InstanceCommand::Cancel { reason, reply: reply_tx };
            if tx.send(cmd).await.is_ok() {
                if let Ok(outcome) = reply_rx.await {
                    return outcome;
                }
            }
        }
        let view = self.query(execution_id)?;
        if view.status.is_terminal() {
            Ok(view)
        } else {
            Err(EngineError::Persistence("execution instance is not accepting commands".into()))
        }
    }

    /// Handle de ejecución de una inscripción ya iniciada.
    pub fn execution_for_enrollment(&self, enrollment_id: Uuid) -> Option<Uuid> {
        self.enrollments.get(&enrollment_id).map(|e| *e.value())
    }

    /// Recuperación tras reinicio de proceso: reconstruye cada ejecución del
    /// store por replay, vuelve a publicar snapshots y relanza instancias
    /// para las no terminales (timers durables honrados, envíos registrados
    /// suprimidos). Devuelve cuántas instancias se relanzaron.
    pub async fn recover(&self) -> Result<usize, EngineError> {
        let repo = InMemoryExecutionRepository::new();
        let mut resumed = 0;
        for execution_id in self.store.executions()? {
            if self.snapshots.contains_key(&execution_id) {
                continue; // ya gestionada en este proceso
            }
            let events = self.store.list(execution_id)?;
            let Some(state) = repo.load(execution_id, &events) else {
                warn!("skipping execution without start event execution_id={execution_id}");
                continue;
            };
            self.enrollments.insert(state.enrollment_id, execution_id);
            self.snapshots.insert(execution_id, state.view());
            if !state.status.is_terminal() {
                debug!("resuming execution execution_id={execution_id} at index={} v{}",
                       state.current_step_index,
                       state.sequence_version);
                self.spawn_if_running(state);
                resumed += 1;
            }
        }
        Ok(resumed)
    }

    fn spawn_if_running(&self, state: ExecutionState) {
        if state.status.is_terminal() {
            return;
        }
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        self.instances.insert(state.execution_id, tx);
        let instance = ExecutionInstance::new(state,
                                              Arc::clone(&self.store),
                                              Arc::clone(&self.port),
                                              self.retry.clone(),
                                              Arc::clone(&self.snapshots),
                                              rx);
        tokio::spawn(instance.run());
    }

    /// Rechazo auditado de una mutación sobre ejecución terminal.
    fn reject_terminal_mutation(&self, execution_id: Uuid, steps: &StepSequence, view: StateView) -> MutationOutcome {
        let kind = ExecutionEventKind::MutationRejected { sequence_hash: sequence_hash(steps) };
        if let Err(e) = self.store.append(execution_id, kind) {
            warn!("mutation-rejected audit append failed execution_id={execution_id}: {e}");
        }
        MutationOutcome { accepted: false,
                          sequence_version: view.sequence_version,
                          status: view.status,
                          current_step_index: view.current_step_index }
    }
}
