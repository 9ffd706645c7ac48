//! Escenarios de integración del motor: contrato externo completo contra
//! stores in-memory y puertos de entrega dobles.

use std::sync::Arc;
use std::time::Duration;

use cadence_adapters::{FlakyDeliveryPort, RecordingDeliveryPort};
use cadence_core::{DeliveryError, EngineError, EventStore, ExecutionStatus, InMemoryEventStore, StateView};
use cadence_domain::{Contact, Step, StepSequence};
use cadence_runtime::{CadenceEngine, RetryPolicy};
use uuid::Uuid;

fn contact() -> Contact {
    Contact::new("lead@example.com").unwrap()
}

fn send_step(id: &str) -> Step {
    Step::SendMessage { id: id.into(),
                        subject: format!("subject {id}"),
                        body: format!("body {id}") }
}

fn wait_step(id: &str, seconds: u64) -> Step {
    Step::Wait { id: id.into(), duration_seconds: seconds }
}

/// Sondea la superficie de consulta hasta que el predicado se cumpla. Las
/// lecturas nunca bloquean al escritor, así que el sondeo es inocuo.
async fn wait_for(engine: &CadenceEngine, execution_id: Uuid, pred: impl Fn(&StateView) -> bool) -> StateView {
    for _ in 0..400 {
        let view = engine.query(execution_id).expect("query");
        if pred(&view) {
            return view;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached, last view: {:?}", engine.query(execution_id));
}

#[tokio::test]
async fn query_right_after_start_is_initial_state() {
    let store: Arc<InMemoryEventStore> = Arc::new(InMemoryEventStore::new());
    let port = Arc::new(RecordingDeliveryPort::new());
    let engine = CadenceEngine::new(store, port);

    let steps = StepSequence::new(vec![wait_step("w", 3600), send_step("a")]);
    let execution_id = engine.start(Uuid::new_v4(), contact(), steps).await.expect("start");

    let view = engine.query(execution_id).expect("query");
    assert_eq!(view.current_step_index, 0);
    assert_eq!(view.sequence_version, 1);
    assert_eq!(view.status, ExecutionStatus::Running);
}

#[tokio::test]
async fn linear_run_completes_and_sends_once() {
    let store: Arc<InMemoryEventStore> = Arc::new(InMemoryEventStore::new());
    let port = Arc::new(RecordingDeliveryPort::new());
    let engine = CadenceEngine::new(store, Arc::clone(&port) as Arc<dyn cadence_core::DeliveryPort>);

    let steps = StepSequence::new(vec![wait_step("w", 1), send_step("a")]);
    let execution_id = engine.start(Uuid::new_v4(), contact(), steps).await.expect("start");

    let view = wait_for(&engine, execution_id, |v| v.status == ExecutionStatus::Completed).await;
    assert_eq!(view.current_step_index, 2);
    assert_eq!(view.sequence_version, 1);
    assert_eq!(port.send_count(), 1);
    assert_eq!(port.sends()[0].subject, "subject a");
}

#[tokio::test]
async fn duplicate_start_for_same_enrollment_is_rejected() {
    let store: Arc<InMemoryEventStore> = Arc::new(InMemoryEventStore::new());
    let port = Arc::new(RecordingDeliveryPort::new());
    let engine = CadenceEngine::new(store, port);

    let enrollment_id = Uuid::new_v4();
    let steps = StepSequence::new(vec![wait_step("w", 3600)]);
    let first = engine.start(enrollment_id, contact(), steps.clone()).await.expect("first start");
    let second = engine.start(enrollment_id, contact(), steps).await;
    assert!(matches!(second, Err(EngineError::AlreadyStarted)));
    assert_eq!(engine.execution_for_enrollment(enrollment_id), Some(first));
}

#[tokio::test]
async fn query_unknown_execution_is_not_found() {
    let store: Arc<InMemoryEventStore> = Arc::new(InMemoryEventStore::new());
    let port = Arc::new(RecordingDeliveryPort::new());
    let engine = CadenceEngine::new(store, port);
    assert!(matches!(engine.query(Uuid::new_v4()), Err(EngineError::NotFound)));
}

#[tokio::test]
async fn shrink_below_cursor_completes_with_cursor_intact() {
    let store: Arc<InMemoryEventStore> = Arc::new(InMemoryEventStore::new());
    let port = Arc::new(RecordingDeliveryPort::new());
    let engine = CadenceEngine::new(store, Arc::clone(&port) as Arc<dyn cadence_core::DeliveryPort>);

    let steps = StepSequence::new(vec![send_step("a"), send_step("b"), wait_step("w", 3600)]);
    let execution_id = engine.start(Uuid::new_v4(), contact(), steps).await.expect("start");

    // Dos envíos ejecutados; la instancia queda suspendida en la espera.
    wait_for(&engine, execution_id, |v| v.current_step_index == 2).await;

    let outcome = engine.mutate(execution_id, StepSequence::new(vec![send_step("a")]))
                        .await
                        .expect("mutate");
    assert!(outcome.accepted);
    assert_eq!(outcome.sequence_version, 2);
    assert_eq!(outcome.status, ExecutionStatus::Completed);
    assert_eq!(outcome.current_step_index, 2);

    let view = engine.query(execution_id).expect("query");
    assert_eq!(view.current_step_index, 2);
    assert_eq!(view.sequence_version, 2);
    assert_eq!(view.status, ExecutionStatus::Completed);
    assert_eq!(port.send_count(), 2); // nada se re-ejecuta ni se deshace
}

#[tokio::test]
async fn mutation_on_completed_execution_is_a_reported_noop() {
    let store: Arc<InMemoryEventStore> = Arc::new(InMemoryEventStore::new());
    let port = Arc::new(RecordingDeliveryPort::new());
    let engine = CadenceEngine::new(store, port);

    let execution_id = engine.start(Uuid::new_v4(), contact(), StepSequence::new(vec![send_step("a")]))
                             .await
                             .expect("start");
    wait_for(&engine, execution_id, |v| v.status == ExecutionStatus::Completed).await;

    let outcome = engine.mutate(execution_id, StepSequence::new(vec![send_step("x"), send_step("y")]))
                        .await
                        .expect("mutate");
    assert!(!outcome.accepted);
    assert_eq!(outcome.sequence_version, 1); // las rechazadas no incrementan

    let view = engine.query(execution_id).expect("query");
    assert_eq!(view.sequence_version, 1);
    assert_eq!(view.status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn mutation_during_wait_abandons_the_remainder() {
    let store: Arc<InMemoryEventStore> = Arc::new(InMemoryEventStore::new());
    let port = Arc::new(RecordingDeliveryPort::new());
    let engine = CadenceEngine::new(store, Arc::clone(&port) as Arc<dyn cadence_core::DeliveryPort>);

    // Espera larga: sin la mutación este test no terminaría.
    let steps = StepSequence::new(vec![wait_step("w", 3600), send_step("m")]);
    let execution_id = engine.start(Uuid::new_v4(), contact(), steps).await.expect("start");

    // Dar tiempo a que la instancia quede suspendida en la espera.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(engine.query(execution_id).expect("query").current_step_index, 0);

    let new_steps = StepSequence::new(vec![wait_step("w-short", 0), send_step("m")]);
    let outcome = engine.mutate(execution_id, new_steps).await.expect("mutate");
    assert!(outcome.accepted);
    assert_eq!(outcome.sequence_version, 2);
    assert_eq!(outcome.current_step_index, 0); // cursor intacto

    // El bucle re-evalúa desde el índice 0 contra la secuencia nueva: la
    // espera corta transcurre y el envío sale.
    let view = wait_for(&engine, execution_id, |v| v.status == ExecutionStatus::Completed).await;
    assert_eq!(view.current_step_index, 2);
    assert_eq!(view.sequence_version, 2);
    assert_eq!(port.send_count(), 1);
}

#[tokio::test]
async fn transient_exhaustion_parks_the_execution_in_failed() {
    let store: Arc<InMemoryEventStore> = Arc::new(InMemoryEventStore::new());
    let port = Arc::new(FlakyDeliveryPort::new());
    for _ in 0..3 {
        port.push_failure(DeliveryError::Transient("smtp 421 service unavailable".into()));
    }
    let retry = RetryPolicy { max_attempts: 3,
                              base_backoff: Duration::from_millis(10),
                              max_backoff: Duration::from_millis(40) };
    let engine = CadenceEngine::new(store, Arc::clone(&port) as Arc<dyn cadence_core::DeliveryPort>).with_retry_policy(retry);

    let execution_id = engine.start(Uuid::new_v4(), contact(), StepSequence::new(vec![send_step("a")]))
                             .await
                             .expect("start");

    let view = wait_for(&engine, execution_id, |v| v.status == ExecutionStatus::Failed).await;
    assert_eq!(view.current_step_index, 0); // el paso nunca completó
    assert!(view.last_error.as_deref().unwrap().contains("service unavailable"));
    assert_eq!(port.attempts(), 3);

    // FAILED es terminal: las mutaciones no resucitan la ejecución.
    let outcome = engine.mutate(execution_id, StepSequence::new(vec![send_step("b")]))
                        .await
                        .expect("mutate");
    assert!(!outcome.accepted);
}

#[tokio::test]
async fn permanent_delivery_failure_fails_without_retries() {
    let store: Arc<InMemoryEventStore> = Arc::new(InMemoryEventStore::new());
    let port = Arc::new(FlakyDeliveryPort::new());
    port.push_failure(DeliveryError::Permanent("mailbox does not exist".into()));
    let engine = CadenceEngine::new(store, Arc::clone(&port) as Arc<dyn cadence_core::DeliveryPort>);

    let execution_id = engine.start(Uuid::new_v4(), contact(), StepSequence::new(vec![send_step("a")]))
                             .await
                             .expect("start");

    let view = wait_for(&engine, execution_id, |v| v.status == ExecutionStatus::Failed).await;
    assert!(view.last_error.as_deref().unwrap().contains("mailbox does not exist"));
    assert_eq!(port.attempts(), 1);
}

#[tokio::test]
async fn cancel_interrupts_a_wait_and_forces_completed() {
    let store: Arc<InMemoryEventStore> = Arc::new(InMemoryEventStore::new());
    let port = Arc::new(RecordingDeliveryPort::new());
    let engine = CadenceEngine::new(store, Arc::clone(&port) as Arc<dyn cadence_core::DeliveryPort>);

    let steps = StepSequence::new(vec![wait_step("w", 3600), send_step("m")]);
    let execution_id = engine.start(Uuid::new_v4(), contact(), steps).await.expect("start");
    tokio::time::sleep(Duration::from_millis(100)).await;

    let view = engine.cancel(execution_id, Some("unsubscribed".into())).await.expect("cancel");
    assert_eq!(view.status, ExecutionStatus::Completed);
    assert_eq!(view.current_step_index, 0);
    assert_eq!(port.send_count(), 0);
}

#[tokio::test]
async fn recovery_resumes_without_repeating_recorded_sends() {
    let store: Arc<InMemoryEventStore> = Arc::new(InMemoryEventStore::new());

    // Primer proceso: envía el paso 0 y queda suspendido en la espera larga.
    let port_before = Arc::new(RecordingDeliveryPort::new());
    let engine_before = CadenceEngine::new(Arc::clone(&store) as Arc<dyn EventStore>,
                                           Arc::clone(&port_before) as Arc<dyn cadence_core::DeliveryPort>);
    let steps = StepSequence::new(vec![send_step("a"), wait_step("w", 3600), send_step("b")]);
    let enrollment_id = Uuid::new_v4();
    let execution_id = engine_before.start(enrollment_id, contact(), steps).await.expect("start");
    wait_for(&engine_before, execution_id, |v| v.current_step_index == 1).await;
    assert_eq!(port_before.send_count(), 1);
    drop(engine_before); // reinicio simulado de proceso

    // Segundo proceso sobre el mismo store: replay + relanzamiento.
    let port_after = Arc::new(RecordingDeliveryPort::new());
    let engine_after = CadenceEngine::new(Arc::clone(&store) as Arc<dyn EventStore>,
                                          Arc::clone(&port_after) as Arc<dyn cadence_core::DeliveryPort>);
    let resumed = engine_after.recover().await.expect("recover");
    assert_eq!(resumed, 1);
    assert_eq!(engine_after.execution_for_enrollment(enrollment_id), Some(execution_id));

    let view = engine_after.query(execution_id).expect("query");
    assert_eq!(view.current_step_index, 1);
    assert_eq!(view.status, ExecutionStatus::Running);

    // El envío registrado del paso 0 no se repite tras el replay.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(port_after.send_count(), 0);

    // La instancia recuperada sigue viva: una mutación la lleva al final.
    let outcome = engine_after.mutate(execution_id, StepSequence::new(vec![send_step("a")]))
                              .await
                              .expect("mutate");
    assert!(outcome.accepted);
    assert_eq!(outcome.status, ExecutionStatus::Completed);
    assert_eq!(port_after.send_count(), 0); // el cursor ya estaba más allá
}
