//! Contacto destinatario de una inscripción.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::DomainError;

/// Dirección de contacto validada. La normalización (minúsculas) garantiza
/// igualdad estable entre registros.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Contact {
    email: String,
}

impl Contact {
    pub fn new(email: &str) -> Result<Self, DomainError> {
        let normalized = email.trim().to_lowercase();
        // Validación mínima: un '@' interior. La entregabilidad real la
        // decide el puerto de entrega, no el dominio.
        let at = normalized.find('@');
        match at {
            Some(pos) if pos > 0 && pos < normalized.len() - 1 => Ok(Contact { email: normalized }),
            _ => Err(DomainError::ValidationError(format!("Invalid contact email: {email}"))),
        }
    }

    pub fn email(&self) -> &str {
        &self.email
    }
}

impl fmt::Display for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.email)
    }
}
