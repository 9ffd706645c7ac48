//! Implementaciones Postgres (Diesel) de los traits de durabilidad del core.
//!
//! Objetivo del módulo:
//! - Proveer una capa durable (Postgres) con paridad 1:1 respecto al backend
//!   en memoria: el replay de eventos debe reconstruir el mismo estado.
//! - EventStore append-only con orden total por `seq` (BIGSERIAL), sin
//!   updates ni deletes.
//! - El recibo de entrega de un `StepCompleted{Sent}` se inserta en la MISMA
//!   transacción que el evento: la clave de idempotencia `(execution_id,
//!   step_id, sequence_version)` tiene constraint UNIQUE, de modo que un
//!   reenvío jamás puede quedar registrado dos veces.
//! - Manejo básico de errores transitorios: reintento con backoff en
//!   `append` y `list`.
//! - `PgExecutionRepository`: delega el replay a la implementación InMemory
//!   para asegurar paridad exacta.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager};
use log::{debug, warn};
use serde_json::Value;
use uuid::Uuid;

use cadence_core::{EventStore, ExecutionEvent, ExecutionEventKind, ExecutionRepository, ExecutionState,
                   InMemoryExecutionRepository, StepOutcome, StoreError};

use crate::error::PersistenceError;
use crate::migrations::run_pending_migrations;
use crate::schema::{delivery_receipts, event_log};

/// Alias de tipo para el pool r2d2 de conexiones Postgres.
///
/// Al construirlo se corre automáticamente el set de migraciones pendientes
/// (una sola vez).
pub type PgPool = r2d2::Pool<ConnectionManager<PgConnection>>;

/// Proveedor abstracto de conexiones.
///
/// Permite inyectar un pool real (producción/tests de integración) o
/// simular en tests unitarios sin acoplar a r2d2.
pub trait ConnectionProvider: Send + Sync + 'static {
    /// Obtiene una conexión lista para ejecutar consultas Diesel.
    fn connection(&self) -> Result<r2d2::PooledConnection<ConnectionManager<PgConnection>>, PersistenceError>;
}

/// Implementación concreta de `ConnectionProvider` respaldada por un `PgPool`.
pub struct PoolProvider {
    pub pool: PgPool,
}

impl ConnectionProvider for PoolProvider {
    fn connection(&self) -> Result<r2d2::PooledConnection<ConnectionManager<PgConnection>>, PersistenceError> {
        self.pool
            .get()
            .map_err(|e| PersistenceError::TransientIo(format!("pool error: {e}")))
    }
}

/// Fila mapeada de la tabla `event_log` para lecturas.
#[derive(Queryable, Debug)]
pub struct EventRow {
    pub seq: i64,
    pub execution_id: Uuid,
    pub ts: DateTime<Utc>,
    pub event_type: String,
    pub payload: Value,
}

/// Estructura para inserción en `event_log`. Se inserta siempre dentro de
/// una transacción Diesel, devolviendo `seq` y `ts` vía `RETURNING`.
#[derive(Insertable, Debug)]
#[diesel(table_name = event_log)]
pub struct NewEventRow<'a> {
    pub execution_id: &'a Uuid,
    pub event_type: &'a str,
    pub payload: &'a Value,
}

/// Fila para insertar en `delivery_receipts`.
///
/// - La tripleta `(execution_id, step_id, sequence_version)` es la clave de
///   idempotencia (UNIQUE en el esquema).
/// - `recorded_in_seq` referencia el `seq` del evento `StepCompleted` que
///   registró el envío (FK con `ON DELETE RESTRICT`).
#[derive(Insertable, Debug)]
#[diesel(table_name = delivery_receipts)]
pub struct NewReceiptRow<'a> {
    pub execution_id: &'a Uuid,
    pub step_id: &'a str,
    pub sequence_version: i32,
    pub message_id: &'a str,
    pub recorded_in_seq: i64,
}

/// Determina si un error es transitorio (recomendado reintentar con backoff).
fn is_retryable(e: &PersistenceError) -> bool {
    match e {
        PersistenceError::SerializationConflict => true,
        PersistenceError::TransientIo(_) => true,
        // Algunos mensajes de error (según driver/pg) llegan como Unknown con
        // texto. Best-effort string match sin acoplar a SQLSTATE.
        PersistenceError::Unknown(msg) => {
            let m = msg.to_lowercase();
            m.contains("deadlock detected")
            || m.contains("could not serialize access due to concurrent update")
            || m.contains("connection closed")
            || m.contains("connection refused")
            || m.contains("timeout")
        }
        _ => false,
    }
}

/// Retry simple con backoff exponencial muy pequeño (hasta 3 intentos).
/// No altera semántica de negocio; sólo repite la unidad de trabajo `f`.
fn with_retry<F, T>(mut f: F) -> Result<T, PersistenceError>
    where F: FnMut() -> Result<T, PersistenceError>
{
    let mut attempts = 0;
    loop {
        match f() {
            Err(e) if is_retryable(&e) && attempts < 3 => {
                let delay_ms = 15 * ((attempts + 1) as u64);
                warn!("retryable error (attempt {}): {:?} -> sleeping {}ms",
                      attempts + 1,
                      e,
                      delay_ms);
                std::thread::sleep(std::time::Duration::from_millis(delay_ms));
                attempts += 1;
            }
            r => return r,
        }
    }
}

// SERIALIZACIÓN: guardamos el enum completo como JSON (payload) y además
// persistimos `event_type` (minúsculas) para cumplir el constraint y
// facilitar consultas por tipo.
fn serialize_full_enum(kind: &ExecutionEventKind) -> Result<Value, PersistenceError> {
    serde_json::to_value(kind).map_err(|e| PersistenceError::Unknown(format!("serialize event kind: {e}")))
}

/// Mapea la variante del enum a un string en minúsculas, estable en el tiempo.
fn event_type_for(kind: &ExecutionEventKind) -> &'static str {
    match kind {
        ExecutionEventKind::ExecutionStarted { .. } => "executionstarted",
        ExecutionEventKind::StepStarted { .. } => "stepstarted",
        ExecutionEventKind::WaitScheduled { .. } => "waitscheduled",
        ExecutionEventKind::DeliveryAttemptFailed { .. } => "deliveryattemptfailed",
        ExecutionEventKind::StepCompleted { .. } => "stepcompleted",
        ExecutionEventKind::SequenceMutated { .. } => "sequencemutated",
        ExecutionEventKind::MutationRejected { .. } => "mutationrejected",
        ExecutionEventKind::ExecutionFailed { .. } => "executionfailed",
        ExecutionEventKind::ExecutionCancelled { .. } => "executioncancelled",
        ExecutionEventKind::ExecutionCompleted { .. } => "executioncompleted",
    }
}

/// Deserializa una `EventRow` a `ExecutionEvent` usando el JSON completo del
/// enum almacenado en `payload`. Si el JSON no es válido, devuelve `None`.
fn deserialize_full_enum(row: EventRow) -> Option<ExecutionEvent> {
    let kind: ExecutionEventKind = serde_json::from_value(row.payload).ok()?;
    Some(ExecutionEvent { seq: row.seq as u64,
                          execution_id: row.execution_id,
                          kind,
                          ts: row.ts })
}

fn to_store_error(e: PersistenceError) -> StoreError {
    if e.is_transient() {
        StoreError::Transient(e.to_string())
    } else {
        StoreError::Permanent(e.to_string())
    }
}

/// Implementación Postgres de `EventStore` (append-only).
pub struct PgEventStore<P: ConnectionProvider> {
    pub provider: P,
}

impl<P: ConnectionProvider> PgEventStore<P> {
    /// Crea un `PgEventStore` a partir de un `ConnectionProvider`
    /// (generalmente `PoolProvider`).
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

impl<P: ConnectionProvider> EventStore for PgEventStore<P> {
    fn append(&self, execution_id: Uuid, kind: ExecutionEventKind) -> Result<ExecutionEvent, StoreError> {
        debug!("append:start execution_id={execution_id} kind={}", kind.variant_name());
        let event_type = event_type_for(&kind);
        let payload = serialize_full_enum(&kind).map_err(to_store_error)?;

        // Transacción atómica: inserción del evento y (si aplica) su recibo
        // de entrega. Si falla cualquiera de las dos, se revierte todo.
        let inserted: (i64, DateTime<Utc>) = with_retry(|| {
            let mut conn = self.provider.connection()?;
            conn.build_transaction()
                .read_write()
                .run(|tx_conn| {
                    // Paso 1: insertar el evento
                    let (seq, ts): (i64, DateTime<Utc>) = diesel::insert_into(event_log::table)
                        .values(NewEventRow { execution_id: &execution_id,
                                              event_type,
                                              payload: &payload })
                        .returning((event_log::seq, event_log::ts))
                        .get_result(tx_conn)?;

                    // Paso 2: insertar el recibo si el paso registró un envío.
                    // El UNIQUE de la clave de idempotencia + ON CONFLICT DO
                    // NOTHING hace inocuo un replay del mismo evento.
                    if let ExecutionEventKind::StepCompleted { step_id,
                                                              sequence_version,
                                                              outcome: StepOutcome::Sent { message_id, .. },
                                                              .. } = &kind
                    {
                        let row = NewReceiptRow { execution_id: &execution_id,
                                                  step_id,
                                                  sequence_version: *sequence_version as i32,
                                                  message_id,
                                                  recorded_in_seq: seq };
                        diesel::insert_into(delivery_receipts::table)
                            .values(&row)
                            .on_conflict_do_nothing()
                            .execute(tx_conn)?;
                    }

                    Ok::<(i64, DateTime<Utc>), diesel::result::Error>((seq, ts))
                })
                .map_err(PersistenceError::from)
        })
        .map_err(to_store_error)?;

        let ev = ExecutionEvent { seq: inserted.0 as u64,
                                  execution_id,
                                  kind,
                                  ts: inserted.1 };
        debug!("append:done execution_id={execution_id} seq={} kind={}",
               ev.seq,
               ev.kind.variant_name());
        Ok(ev)
    }

    fn list(&self, execution_id: Uuid) -> Result<Vec<ExecutionEvent>, StoreError> {
        debug!("list:start execution_id={execution_id}");
        let rows: Vec<EventRow> = with_retry(|| {
                                      let mut conn = self.provider.connection()?;
                                      let query = event_log::table.filter(event_log::execution_id.eq(execution_id))
                                                                  .order(event_log::seq.asc());
                                      query.load(&mut conn).map_err(PersistenceError::from)
                                  }).map_err(to_store_error)?;
        let events: Vec<ExecutionEvent> = rows.into_iter().filter_map(deserialize_full_enum).collect();
        debug!("list:done execution_id={execution_id} count={}", events.len());
        Ok(events)
    }

    fn executions(&self) -> Result<Vec<Uuid>, StoreError> {
        let ids: Vec<Uuid> = with_retry(|| {
                                 let mut conn = self.provider.connection()?;
                                 event_log::table.select(event_log::execution_id)
                                                 .distinct()
                                                 .load(&mut conn)
                                                 .map_err(PersistenceError::from)
                             }).map_err(to_store_error)?;
        Ok(ids)
    }
}

/// Fila mapeada de `delivery_receipts` para lecturas de auditoría.
#[derive(Queryable, Debug)]
pub struct ReceiptRow {
    pub id: i64,
    pub execution_id: Uuid,
    pub step_id: String,
    pub sequence_version: i32,
    pub message_id: String,
    pub recorded_in_seq: i64,
    pub ts: DateTime<Utc>,
}

impl<P: ConnectionProvider> PgEventStore<P> {
    /// Lista los recibos de entrega de una ejecución, ordenados por ts.
    pub fn list_receipts(&self, execution_id: Uuid) -> Result<Vec<ReceiptRow>, StoreError> {
        let rows: Vec<ReceiptRow> = with_retry(|| {
                                        let mut conn = self.provider.connection()?;
                                        delivery_receipts::table.filter(delivery_receipts::execution_id.eq(execution_id))
                                                                .order(delivery_receipts::ts.asc())
                                                                .load(&mut conn)
                                                                .map_err(PersistenceError::from)
                                    }).map_err(to_store_error)?;
        Ok(rows)
    }
}

/// Implementación Postgres de `ExecutionRepository` delegada a la versión
/// InMemory: paridad exacta de reglas de replay, sin duplicación.
#[derive(Default)]
pub struct PgExecutionRepository;

impl PgExecutionRepository {
    /// Constructor sin estado.
    pub fn new() -> Self {
        Self
    }
}

impl ExecutionRepository for PgExecutionRepository {
    fn load(&self, execution_id: Uuid, events: &[ExecutionEvent]) -> Option<ExecutionState> {
        InMemoryExecutionRepository::new().load(execution_id, events)
    }
}

/// Construye un pool Postgres r2d2 a partir de URL.
///
/// - Valida y ajusta tamaños (si `min_size > max_size`, usa `min_size =
///   max_size`).
/// - Ejecuta migraciones inmediatamente tras el primer `get()`.
pub fn build_pool(database_url: &str, min_size: u32, max_size: u32) -> Result<PgPool, PersistenceError> {
    let validated_min = if min_size == 0 { 1 } else { min_size };
    let validated_max = if max_size == 0 { 1 } else { max_size };
    if validated_min > validated_max {
        warn!("min_size > max_size ({validated_min} > {validated_max}), ajustando min=max");
    }
    let final_min = validated_min.min(validated_max);
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = r2d2::Pool::builder().min_idle(Some(final_min))
                                    .max_size(validated_max)
                                    .build(manager)
                                    .map_err(|e| PersistenceError::TransientIo(format!("pool build: {e}")))?;
    // Ejecutar migraciones una sola vez al construir.
    {
        let mut conn = pool.get()
                           .map_err(|e| PersistenceError::TransientIo(format!("pool get for migrations: {e}")))?;
        run_pending_migrations(&mut conn)?;
    }
    Ok(pool)
}

/// Helper de desarrollo: carga `.env`, lee configuración (DATABASE_URL,
/// tamaños) y construye un pool ya migrado.
pub fn build_dev_pool_from_env() -> Result<PgPool, PersistenceError> {
    crate::config::init_dotenv();
    let cfg = crate::config::DbConfig::from_env();
    build_pool(&cfg.url, cfg.min_connections, cfg.max_connections)
}
