//! cadence-persistence
//!
//! Implementaciones Postgres (Diesel) de los traits de durabilidad del core:
//! `EventStore` append-only sobre la tabla `event_log` y reconstrucción de
//! estado delegada al replay in-memory (paridad exacta de reglas).
//!
//! Módulos:
//! - `pg`: implementaciones sobre Postgres (event_log y delivery_receipts).
//! - `migrations`: runner embebido de migraciones Diesel.
//! - `config`: carga de configuración desde .env.
//! - `schema`: tablas Diesel declaradas para compilar queries.

pub mod config;
pub mod error;
pub mod migrations;
pub mod pg;
pub mod schema;

pub use config::init_dotenv;
pub use error::PersistenceError;
pub use pg::{build_dev_pool_from_env, build_pool, ConnectionProvider, PgEventStore, PgExecutionRepository, PgPool,
             PoolProvider};
