//! cadence-runtime: instancias de ejecución asíncronas y fachada del motor.
//!
//! Disciplina de concurrencia (single-writer, multi-reader por inscripción):
//! - Cada inscripción es un task de tokio que posee su `ExecutionState` en
//!   exclusiva; avance del bucle y mutaciones se serializan en su canal de
//!   comandos. No hay locks compartidos entre inscripciones.
//! - Las consultas leen el último snapshot committeado de un `DashMap`,
//!   nunca el estado del actor: no bloquean al escritor y su staleness está
//!   acotada por una escritura de persistencia en vuelo.
//! - Ningún lock se sostiene a través de un punto de suspensión: el actor no
//!   comparte su estado, y el snapshot se publica después de cada commit.

pub mod engine;
mod instance;
pub mod retry;

pub use engine::CadenceEngine;
pub use retry::RetryPolicy;
