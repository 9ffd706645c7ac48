//! Módulo de hashing y canonicalización JSON.
//!
//! El hash de snapshot de secuencia (`sequence_hash`) identifica de forma
//! estable el `StepSequence` activo de una ejecución; se persiste junto a
//! los eventos `ExecutionStarted` / `SequenceMutated` para trazabilidad.

pub mod canonical_json;
pub mod hash;

pub use canonical_json::to_canonical_json;
pub use hash::{hash_str, hash_value};

use cadence_domain::StepSequence;
use serde_json::json;

/// Hash canónico de un snapshot de secuencia. Incluye `ENGINE_VERSION` para
/// que un cambio incompatible de motor invalide los snapshots previos.
pub fn sequence_hash(sequence: &StepSequence) -> String {
    let payload = json!({
        "engine_version": crate::constants::ENGINE_VERSION,
        "steps": sequence,
    });
    hash_value(&payload)
}
