//! Configuración central de la aplicación de demostración.
//! Carga variables de entorno (.env) y expone una estructura inmutable
//! (`CONFIG`) con los parámetros de la política de entrega.
use cadence_runtime::RetryPolicy;
use once_cell::sync::Lazy;
use std::env;
use std::time::Duration;

/// Configuración global de la aplicación (extensible para más secciones).
pub struct AppConfig {
    /// Política de reintentos del puerto de entrega.
    pub delivery: DeliveryConfig,
}

/// Parámetros de reintento de entrega.
pub struct DeliveryConfig {
    /// Invocaciones totales máximas por paso (incluida la primera).
    pub max_attempts: u32,
    /// Backoff base en milisegundos (exponencial, acotado).
    pub base_backoff_ms: u64,
}

impl DeliveryConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy { max_attempts: self.max_attempts,
                      base_backoff: Duration::from_millis(self.base_backoff_ms),
                      ..RetryPolicy::default() }
    }
}

/// Instancia global perezosa de configuración, evaluada una sola vez.
pub static CONFIG: Lazy<AppConfig> = Lazy::new(|| {
    let _ = dotenvy::dotenv(); // ignora error si no existe .env
    let max_attempts = env::var("DELIVERY_MAX_ATTEMPTS").ok()
        .and_then(|v| v.parse().ok()).unwrap_or(5);
    let base_backoff_ms = env::var("DELIVERY_BASE_BACKOFF_MS").ok()
        .and_then(|v| v.parse().ok()).unwrap_or(200);
    AppConfig {
        delivery: DeliveryConfig { max_attempts, base_backoff_ms },
    }
});
