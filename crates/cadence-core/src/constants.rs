//! Constantes del motor core.
//!
//! `ENGINE_VERSION` participa en el hash de snapshot de secuencia: un cambio
//! incompatible de motor invalida los hashes aunque los pasos no cambien.
//! Mantener estable mientras no haya cambios incompatibles.

/// Versión lógica del motor de cadencias.
pub const ENGINE_VERSION: &str = "C1.0";
