//! Instancia de ejecución por inscripción.
//!
//! Un task de tokio por inscripción posee el `ExecutionState` en exclusiva y
//! serializa {avance del bucle, mutación, cancelación} sobre su canal de
//! comandos. Contrato de durabilidad: todo evento se persiste ANTES de
//! aplicarse al estado y publicarse como snapshot; si el append falla, la
//! instancia se detiene en su último estado committeado.

use std::sync::Arc;

use cadence_core::{classify_error, next_action, plan_mutation, DeliveryError, EngineError, EventStore,
                   ExecutionEventKind, ExecutionState, IdempotencyKey, MessagePayload, MutationOutcome,
                   NextAction, StateView, StepOutcome, DeliveryPort};
use cadence_domain::StepSequence;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{debug, error, warn};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::retry::RetryPolicy;

/// Comandos aceptados por la instancia. La respuesta viaja por oneshot; un
/// fallo de persistencia se propaga como `EngineError::Persistence`.
pub(crate) enum InstanceCommand {
    Mutate {
        steps: StepSequence,
        reply: oneshot::Sender<Result<MutationOutcome, EngineError>>,
    },
    Cancel {
        reason: Option<String>,
        reply: oneshot::Sender<Result<StateView, EngineError>>,
    },
}

/// La instancia no puede persistir: detenerse sin avanzar en memoria.
struct Halted;

pub(crate) struct ExecutionInstance {
    state: ExecutionState,
    store: Arc<dyn EventStore>,
    port: Arc<dyn DeliveryPort>,
    retry: RetryPolicy,
    snapshots: Arc<DashMap<Uuid, StateView>>,
    rx: mpsc::Receiver<InstanceCommand>,
}

impl ExecutionInstance {
    pub(crate) fn new(state: ExecutionState,
                      store: Arc<dyn EventStore>,
                      port: Arc<dyn DeliveryPort>,
                      retry: RetryPolicy,
                      snapshots: Arc<DashMap<Uuid, StateView>>,
                      rx: mpsc::Receiver<InstanceCommand>)
                      -> Self {
        Self { state,
               store,
               port,
               retry,
               snapshots,
               rx }
    }

    pub(crate) async fn run(mut self) {
        debug!("instance start execution_id={} enrollment_id={}",
               self.state.execution_id,
               self.state.enrollment_id);
        if self.drive().await.is_err() {
            error!("instance halted at last committed state execution_id={}", self.state.execution_id);
        }
        // Comandos rezagados: responder con el estado final (y auditar los
        // rechazos de mutación) antes de morir.
        self.rx.close();
        while let Ok(cmd) = self.rx.try_recv() {
            self.reply_after_stop(cmd);
        }
        debug!("instance stop execution_id={} status={:?}",
               self.state.execution_id,
               self.state.status);
    }

    async fn drive(&mut self) -> Result<(), Halted> {
        loop {
            // Una mutación llegada entre "decidir qué paso corre" y
            // "correrlo" se observa antes de ejecutar el paso.
            while let Ok(cmd) = self.rx.try_recv() {
                self.handle_command(cmd)?;
            }
            match next_action(&self.state) {
                NextAction::Terminal => return Ok(()),
                NextAction::Finish => {
                    let steps_executed = self.state.current_step_index;
                    self.commit(ExecutionEventKind::ExecutionCompleted { steps_executed })?;
                    return Ok(());
                }
                NextAction::RunWait { step_index,
                                      step_id,
                                      sequence_version,
                                      duration_seconds,
                                      resume_at } => {
                    self.run_wait(step_index, step_id, sequence_version, duration_seconds, resume_at)
                        .await?;
                }
                NextAction::RunSend { step_index,
                                      step_id,
                                      sequence_version,
                                      subject,
                                      body,
                                      already_sent } => {
                    self.run_send(step_index, step_id, sequence_version, subject, body, already_sent)
                        .await?;
                }
            }
        }
    }

    /// Persiste el evento y, sólo si quedó durable, lo aplica y publica el
    /// snapshot. El orden es el contrato: nada es visible sin persistir.
    fn commit(&mut self, kind: ExecutionEventKind) -> Result<(), Halted> {
        match self.store.append(self.state.execution_id, kind.clone()) {
            Ok(_) => {
                self.state.apply(&kind);
                self.snapshots.insert(self.state.execution_id, self.state.view());
                Ok(())
            }
            Err(e) => {
                error!("event append failed execution_id={} kind={} err={e}",
                       self.state.execution_id,
                       kind.variant_name());
                Err(Halted)
            }
        }
    }

    fn handle_command(&mut self, cmd: InstanceCommand) -> Result<(), Halted> {
        match cmd {
            InstanceCommand::Mutate { steps, reply } => {
                let kind = plan_mutation(&self.state, &steps);
                let accepted = matches!(kind, ExecutionEventKind::SequenceMutated { .. });
                match self.commit(kind) {
                    Ok(()) => {
                        let _ = reply.send(Ok(self.state.mutation_outcome(accepted)));
                        Ok(())
                    }
                    Err(h) => {
                        let _ = reply.send(Err(EngineError::Persistence("mutation not persisted; state unchanged".into())));
                        Err(h)
                    }
                }
            }
            InstanceCommand::Cancel { reason, reply } => {
                if self.state.status.is_terminal() {
                    let _ = reply.send(Ok(self.state.view()));
                    return Ok(());
                }
                match self.commit(ExecutionEventKind::ExecutionCancelled { reason }) {
                    Ok(()) => {
                        let _ = reply.send(Ok(self.state.view()));
                        Ok(())
                    }
                    Err(h) => {
                        let _ = reply.send(Err(EngineError::Persistence("cancellation not persisted; state unchanged".into())));
                        Err(h)
                    }
                }
            }
        }
    }

    /// Respuesta post-parada: el estado ya es definitivo para esta instancia.
    fn reply_after_stop(&self, cmd: InstanceCommand) {
        match cmd {
            InstanceCommand::Mutate { steps, reply } => {
                let kind = plan_mutation(&self.state, &steps);
                if let ExecutionEventKind::MutationRejected { .. } = &kind {
                    if let Err(e) = self.store.append(self.state.execution_id, kind) {
                        warn!("mutation-rejected audit append failed: {e}");
                    }
                }
                let _ = reply.send(Ok(self.state.mutation_outcome(false)));
            }
            InstanceCommand::Cancel { reply, .. } => {
                let _ = reply.send(Ok(self.state.view()));
            }
        }
    }

    async fn run_wait(&mut self,
                      step_index: usize,
                      step_id: String,
                      sequence_version: u32,
                      duration_seconds: u64,
                      resume_at: Option<DateTime<Utc>>)
                      -> Result<(), Halted> {
        if self.state.started_step != Some((step_index, sequence_version)) {
            self.commit(ExecutionEventKind::StepStarted { step_index,
                                                          step_id: step_id.clone(),
                                                          sequence_version })?;
        }
        let resume_at = match resume_at {
            // Timer durable de una suspensión previa: dormir sólo el remanente.
            Some(at) => at,
            None => {
                let seconds = i64::try_from(duration_seconds).unwrap_or(i64::MAX);
                let at = Utc::now() + chrono::Duration::seconds(seconds);
                self.commit(ExecutionEventKind::WaitScheduled { step_index,
                                                                step_id: step_id.clone(),
                                                                sequence_version,
                                                                resume_at: at })?;
                at
            }
        };
        let remaining = (resume_at - Utc::now()).to_std().unwrap_or_default();
        let deadline = tokio::time::Instant::now() + remaining;

        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                self.commit(ExecutionEventKind::StepCompleted { step_index,
                                                                step_id,
                                                                sequence_version,
                                                                outcome: StepOutcome::Waited })?;
                Ok(())
            }
            cmd = self.rx.recv() => match cmd {
                // Mutación/cancelación durante la espera: el remanente se
                // abandona y el bucle re-evalúa desde el cursor intacto.
                Some(cmd) => {
                    self.handle_command(cmd)?;
                    Ok(())
                }
                None => {
                    // Sin más emisores de comandos: agotar el timer igual.
                    tokio::time::sleep_until(deadline).await;
                    self.commit(ExecutionEventKind::StepCompleted { step_index,
                                                                    step_id,
                                                                    sequence_version,
                                                                    outcome: StepOutcome::Waited })?;
                    Ok(())
                }
            }
        }
    }

    async fn run_send(&mut self,
                      step_index: usize,
                      step_id: String,
                      sequence_version: u32,
                      subject: String,
                      body: String,
                      already_sent: bool)
                      -> Result<(), Halted> {
        if self.state.started_step != Some((step_index, sequence_version)) {
            self.commit(ExecutionEventKind::StepStarted { step_index,
                                                          step_id: step_id.clone(),
                                                          sequence_version })?;
        }
        if already_sent {
            debug!("send suppressed by recorded idempotency key execution_id={} step_id={step_id} v{sequence_version}",
                   self.state.execution_id);
            self.commit(ExecutionEventKind::StepCompleted { step_index,
                                                            step_id,
                                                            sequence_version,
                                                            outcome: StepOutcome::SkippedDuplicate })?;
            return Ok(());
        }

        let key = IdempotencyKey { enrollment_id: self.state.enrollment_id,
                                   step_id: step_id.clone(),
                                   sequence_version };
        let message = MessagePayload { subject, body };
        loop {
            // Un envío en vuelo nunca se abandona: los comandos esperan en el
            // canal hasta que el resultado quede durable.
            let sent = self.port.send(&self.state.contact, &message, &key).await;
            match sent {
                Ok(receipt) => {
                    self.commit(ExecutionEventKind::StepCompleted { step_index,
                                                                    step_id,
                                                                    sequence_version,
                                                                    outcome: StepOutcome::Sent { message_id: receipt.message_id,
                                                                                                 delivered_at: receipt.timestamp } })?;
                    return Ok(());
                }
                Err(DeliveryError::Permanent(msg)) => {
                    let error = EngineError::DeliveryPermanent(msg);
                    warn!("delivery failure execution_id={} step_id={step_id} class={:?}: {error}",
                          self.state.execution_id,
                          classify_error(&error));
                    self.commit(ExecutionEventKind::ExecutionFailed { step_index,
                                                                      step_id,
                                                                      sequence_version,
                                                                      error })?;
                    return Ok(());
                }
                Err(DeliveryError::Transient(msg)) => {
                    // Acumulado sobre reinicios: el replay de
                    // DeliveryAttemptFailed restaura el contador.
                    let attempt = self.state.delivery_attempts + 1;
                    self.commit(ExecutionEventKind::DeliveryAttemptFailed { step_index,
                                                                            step_id: step_id.clone(),
                                                                            sequence_version,
                                                                            attempt,
                                                                            error: msg.clone() })?;
                    if self.retry.exhausted(attempt) {
                        let error = EngineError::DeliveryExhausted { attempts: attempt,
                                                                     last_error: msg };
                        warn!("delivery failure execution_id={} step_id={step_id} class={:?}: {error}",
                              self.state.execution_id,
                              classify_error(&error));
                        self.commit(ExecutionEventKind::ExecutionFailed { step_index,
                                                                          step_id,
                                                                          sequence_version,
                                                                          error })?;
                        return Ok(());
                    }
                    tokio::time::sleep(self.retry.backoff(attempt)).await;
                    // Comando llegado durante el backoff (el envío NO está en
                    // vuelo aquí): aplicarlo y re-evaluar el paso, que la
                    // mutación pudo haber eliminado.
                    if let Ok(cmd) = self.rx.try_recv() {
                        self.handle_command(cmd)?;
                        return Ok(());
                    }
                }
            }
        }
    }
}
