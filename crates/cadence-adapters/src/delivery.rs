//! Puertos de entrega concretos.
//!
//! `MockDeliveryPort` replica la actividad de desarrollo original: loguea el
//! envío y fabrica un recibo. Los dobles `RecordingDeliveryPort` y
//! `FlakyDeliveryPort` existen para los tests del bucle de ejecución
//! (supresión de duplicados, reintentos, agotamiento).

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use cadence_core::{DeliveryError, DeliveryPort, DeliveryReceipt, IdempotencyKey, MessagePayload};
use cadence_domain::Contact;
use chrono::Utc;
use log::info;
use uuid::Uuid;

/// Puerto de desarrollo: siempre entrega, loguea el envío completo.
#[derive(Debug, Default)]
pub struct MockDeliveryPort;

impl MockDeliveryPort {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DeliveryPort for MockDeliveryPort {
    async fn send(&self,
                  contact: &Contact,
                  message: &MessagePayload,
                  key: &IdempotencyKey)
                  -> Result<DeliveryReceipt, DeliveryError> {
        let message_id = format!("mock_{}", Uuid::new_v4().simple());
        info!("MOCK_DELIVERY to={} subject=\"{}\" body=\"{}\" key={}",
              contact,
              message.subject,
              message.body,
              key);
        Ok(DeliveryReceipt { message_id, timestamp: Utc::now() })
    }
}

/// Envío observado por el puerto espía.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedSend {
    pub contact: String,
    pub subject: String,
    pub key: String,
}

/// Puerto espía para tests: registra cada invocación y entrega siempre.
/// La aserción central del motor es cuántas veces se invocó y con qué clave.
#[derive(Debug, Default)]
pub struct RecordingDeliveryPort {
    sends: Mutex<Vec<RecordedSend>>,
}

impl RecordingDeliveryPort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sends(&self) -> Vec<RecordedSend> {
        self.sends.lock().expect("sends lock").clone()
    }

    pub fn send_count(&self) -> usize {
        self.sends.lock().expect("sends lock").len()
    }
}

#[async_trait]
impl DeliveryPort for RecordingDeliveryPort {
    async fn send(&self,
                  contact: &Contact,
                  message: &MessagePayload,
                  key: &IdempotencyKey)
                  -> Result<DeliveryReceipt, DeliveryError> {
        self.sends
            .lock()
            .expect("sends lock")
            .push(RecordedSend { contact: contact.to_string(),
                                 subject: message.subject.clone(),
                                 key: key.to_string() });
        Ok(DeliveryReceipt { message_id: format!("rec_{}", Uuid::new_v4().simple()),
                             timestamp: Utc::now() })
    }
}

/// Puerto con guion de fallos: consume la cola de errores programados antes
/// de empezar a entregar. Una cola infinita se simula re-programando.
#[derive(Debug, Default)]
pub struct FlakyDeliveryPort {
    scripted: Mutex<VecDeque<DeliveryError>>,
    attempts: Mutex<u32>,
}

impl FlakyDeliveryPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Programa un fallo más al final de la cola.
    pub fn push_failure(&self, error: DeliveryError) {
        self.scripted.lock().expect("script lock").push_back(error);
    }

    pub fn attempts(&self) -> u32 {
        *self.attempts.lock().expect("attempts lock")
    }
}

#[async_trait]
impl DeliveryPort for FlakyDeliveryPort {
    async fn send(&self,
                  _contact: &Contact,
                  _message: &MessagePayload,
                  _key: &IdempotencyKey)
                  -> Result<DeliveryReceipt, DeliveryError> {
        *self.attempts.lock().expect("attempts lock") += 1;
        if let Some(err) = self.scripted.lock().expect("script lock").pop_front() {
            return Err(err);
        }
        Ok(DeliveryReceipt { message_id: format!("flaky_{}", Uuid::new_v4().simple()),
                             timestamp: Utc::now() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> IdempotencyKey {
        IdempotencyKey { enrollment_id: Uuid::new_v4(),
                         step_id: "s1".into(),
                         sequence_version: 1 }
    }

    #[tokio::test]
    async fn flaky_port_consumes_script_then_delivers() {
        let port = FlakyDeliveryPort::new();
        port.push_failure(DeliveryError::Transient("timeout".into()));
        let contact = Contact::new("x@y.com").unwrap();
        let msg = MessagePayload { subject: "s".into(), body: "b".into() };

        assert!(port.send(&contact, &msg, &key()).await.is_err());
        assert!(port.send(&contact, &msg, &key()).await.is_ok());
        assert_eq!(port.attempts(), 2);
    }

    #[tokio::test]
    async fn recording_port_captures_key() {
        let port = RecordingDeliveryPort::new();
        let contact = Contact::new("x@y.com").unwrap();
        let msg = MessagePayload { subject: "s".into(), body: "b".into() };
        let k = key();
        port.send(&contact, &msg, &k).await.unwrap();
        assert_eq!(port.send_count(), 1);
        assert_eq!(port.sends()[0].key, k.to_string());
    }
}
