//! Binario de demostración del motor de cadencias.
//!
//! Reproduce el flujo de la aplicación completa sin capa HTTP: definir una
//! cadencia en el registro, inscribir un contacto, dejar correr el bucle de
//! ejecución, mutar la secuencia en vivo y consultar el progreso.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cadence_adapters::{CadenceRegistry, EnrollmentDirectory, InMemoryCadenceRegistry, InMemoryEnrollmentDirectory};
use cadence_core::{DeliveryError, DeliveryPort, DeliveryReceipt, EventStore, ExecutionStatus, IdempotencyKey,
                   InMemoryEventStore, MessagePayload};
use cadence_domain::{CadenceDefinition, Contact, Enrollment, Step, StepSequence};
use cadence_runtime::CadenceEngine;
use cadenceflow_rust::config::CONFIG;
use chrono::Utc;
use uuid::Uuid;

/// Puerto de entrega de demostración: imprime el envío y fabrica un recibo,
/// como la actividad mock del sistema original.
struct ConsoleDeliveryPort;

#[async_trait]
impl DeliveryPort for ConsoleDeliveryPort {
    async fn send(&self,
                  contact: &Contact,
                  message: &MessagePayload,
                  key: &IdempotencyKey)
                  -> Result<DeliveryReceipt, DeliveryError> {
        println!("  [MOCK_DELIVERY] to={} subject=\"{}\" body=\"{}\" key={}",
                 contact, message.subject, message.body, key);
        Ok(DeliveryReceipt { message_id: format!("mock_{}", Uuid::new_v4().simple()),
                             timestamp: Utc::now() })
    }
}

/// Inscribe un contacto en una cadencia: resuelve la secuencia en el
/// registro, arranca la ejecución y anota la inscripción en el directorio
/// (el mismo flujo del controlador original, sin HTTP).
async fn enroll(registry: &InMemoryCadenceRegistry,
                directory: &InMemoryEnrollmentDirectory,
                engine: &CadenceEngine,
                cadence_id: Uuid,
                email: &str)
                -> Enrollment {
    let cadence = registry.get(cadence_id).expect("cadence not found");
    let contact = Contact::new(email).expect("valid contact");
    let enrollment_id = Uuid::new_v4();
    let execution_id = engine.start(enrollment_id, contact.clone(), cadence.steps.clone())
                             .await
                             .expect("start execution");
    let enrollment = Enrollment::new(cadence.id, contact, execution_id);
    directory.insert(enrollment.clone());
    enrollment
}

async fn wait_for_status(engine: &CadenceEngine, execution_id: Uuid, status: ExecutionStatus) {
    for _ in 0..600 {
        let view = engine.query(execution_id).expect("query");
        if view.status == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("status {status:?} no alcanzado para {execution_id}");
}

fn print_state(label: &str, engine: &CadenceEngine, execution_id: Uuid) {
    let view = engine.query(execution_id).expect("query");
    println!("  [{label}] index={} version={} status={:?}",
             view.current_step_index, view.sequence_version, view.status);
}

/// Demo 1: recorrido lineal completo de una cadencia corta.
async fn run_linear_demo(registry: &InMemoryCadenceRegistry,
                         directory: &InMemoryEnrollmentDirectory,
                         engine: &CadenceEngine,
                         cadence_id: Uuid) {
    println!("\n--- Demo: recorrido lineal ---");
    let enrollment = enroll(registry, directory, engine, cadence_id, "ada@example.com").await;
    print_state("tras start", engine, enrollment.execution_id);

    wait_for_status(engine, enrollment.execution_id, ExecutionStatus::Completed).await;
    print_state("completada", engine, enrollment.execution_id);

    // Mutar una ejecución completada es un no-op reportado.
    let outcome = engine.mutate(enrollment.execution_id, StepSequence::new(vec![]))
                        .await
                        .expect("mutate");
    println!("  mutación post-completado aceptada={} (esperado: false)", outcome.accepted);
}

/// Demo 2: mutación en vivo durante una espera larga. El remanente de la
/// espera se abandona y el bucle continúa contra la secuencia nueva.
async fn run_live_mutation_demo(registry: &InMemoryCadenceRegistry,
                                directory: &InMemoryEnrollmentDirectory,
                                engine: &CadenceEngine) {
    println!("\n--- Demo: mutación durante la espera ---");
    let slow = CadenceDefinition::new("nurture-slow",
                                     StepSequence::new(vec![
                                         Step::SendMessage { id: "hello".into(),
                                                             subject: "Hola".into(),
                                                             body: "Primer contacto".into() },
                                         Step::Wait { id: "big-pause".into(), duration_seconds: 86_400 },
                                         Step::SendMessage { id: "followup".into(),
                                                             subject: "Seguimiento".into(),
                                                             body: "¿Lo pensaste?".into() },
                                     ])).expect("cadence");
    registry.insert(slow.clone());

    let enrollment = enroll(registry, directory, engine, slow.id, "grace@example.com").await;
    tokio::time::sleep(Duration::from_millis(200)).await; // el primer envío sale y empieza la espera de un día
    print_state("esperando", engine, enrollment.execution_id);

    let faster = StepSequence::new(vec![Step::SendMessage { id: "hello".into(),
                                                            subject: "Hola".into(),
                                                            body: "Primer contacto".into() },
                                        Step::Wait { id: "small-pause".into(), duration_seconds: 1 },
                                        Step::SendMessage { id: "followup".into(),
                                                            subject: "Seguimiento".into(),
                                                            body: "¿Lo pensaste?".into() }]);
    let outcome = engine.mutate(enrollment.execution_id, faster).await.expect("mutate");
    println!("  mutación aceptada={} nueva versión={}", outcome.accepted, outcome.sequence_version);

    wait_for_status(engine, enrollment.execution_id, ExecutionStatus::Completed).await;
    print_state("completada sin esperar el día entero", engine, enrollment.execution_id);
}

/// Demo 3: reinicio simulado. Un motor nuevo sobre el mismo store retoma la
/// ejecución por replay sin repetir los envíos registrados.
async fn run_recovery_demo() {
    println!("\n--- Demo: recuperación tras reinicio ---");
    let store: Arc<InMemoryEventStore> = Arc::new(InMemoryEventStore::new());

    let steps = StepSequence::new(vec![Step::SendMessage { id: "first".into(),
                                                           subject: "Uno".into(),
                                                           body: "primero".into() },
                                       Step::Wait { id: "pause".into(), duration_seconds: 86_400 },
                                       Step::SendMessage { id: "second".into(),
                                                           subject: "Dos".into(),
                                                           body: "segundo".into() }]);
    println!("  secuencia: {}", serde_json::to_string(&steps).expect("serialize"));

    let before = CadenceEngine::new(Arc::clone(&store) as Arc<dyn EventStore>, Arc::new(ConsoleDeliveryPort));
    let execution_id = before.start(Uuid::new_v4(), Contact::new("alan@example.com").unwrap(), steps)
                             .await
                             .expect("start");
    tokio::time::sleep(Duration::from_millis(200)).await; // "first" enviado, espera en curso
    drop(before); // el proceso "muere"

    let after = CadenceEngine::new(Arc::clone(&store) as Arc<dyn EventStore>, Arc::new(ConsoleDeliveryPort))
        .with_retry_policy(CONFIG.delivery.retry_policy());
    let resumed = after.recover().await.expect("recover");
    println!("  instancias retomadas: {resumed} (el envío \"first\" no se repite)");
    print_state("tras recover", &after, execution_id);

    let view = after.cancel(execution_id, Some("demo terminado".into())).await.expect("cancel");
    println!("  cancelada: status={:?}", view.status);
}

#[cfg(feature = "pg_demo")]
async fn run_pg_demo() {
    use cadence_persistence::{build_dev_pool_from_env, PgEventStore, PoolProvider};

    println!("\n--- Demo: persistencia Postgres ---");
    let pool = build_dev_pool_from_env().expect("pool postgres (DATABASE_URL)");
    let store = Arc::new(PgEventStore::new(PoolProvider { pool }));
    let engine = CadenceEngine::new(store, Arc::new(ConsoleDeliveryPort));

    let steps = StepSequence::new(vec![Step::SendMessage { id: "pg-hello".into(),
                                                           subject: "Hola desde Postgres".into(),
                                                           body: "evento durable".into() }]);
    let execution_id = engine.start(Uuid::new_v4(), Contact::new("pg@example.com").unwrap(), steps)
                             .await
                             .expect("start");
    wait_for_status(&engine, execution_id, ExecutionStatus::Completed).await;
    print_state("completada (event_log)", &engine, execution_id);
}

#[tokio::main]
async fn main() {
    println!("=== CadenceFlow: motor de ejecución de cadencias ===");

    let registry = InMemoryCadenceRegistry::new();
    let directory = InMemoryEnrollmentDirectory::new();
    let store: Arc<InMemoryEventStore> = Arc::new(InMemoryEventStore::new());
    let engine = CadenceEngine::new(store, Arc::new(ConsoleDeliveryPort))
        .with_retry_policy(CONFIG.delivery.retry_policy());

    let welcome = CadenceDefinition::new("welcome",
                                         StepSequence::new(vec![
                                             Step::SendMessage { id: "welcome-1".into(),
                                                                 subject: "Bienvenida".into(),
                                                                 body: "Gracias por registrarte".into() },
                                             Step::Wait { id: "w1".into(), duration_seconds: 1 },
                                             Step::SendMessage { id: "welcome-2".into(),
                                                                 subject: "Recursos".into(),
                                                                 body: "Guía de inicio".into() },
                                         ])).expect("cadence");
    registry.insert(welcome.clone());

    run_linear_demo(&registry, &directory, &engine, welcome.id).await;
    run_live_mutation_demo(&registry, &directory, &engine).await;
    run_recovery_demo().await;

    #[cfg(feature = "pg_demo")]
    run_pg_demo().await;

    println!("\n=== Fin de la demo ===");
}
