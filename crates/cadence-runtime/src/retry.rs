//! Política de reintentos de entrega.

use std::time::Duration;

/// Reintento acotado con backoff exponencial para fallos transitorios del
/// puerto de entrega. `max_attempts` cuenta invocaciones totales (incluida
/// la primera); los intentos acumulados sobreviven reinicios vía replay de
/// `DeliveryAttemptFailed`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 5,
               base_backoff: Duration::from_millis(200),
               max_backoff: Duration::from_secs(30) }
    }
}

impl RetryPolicy {
    /// Backoff tras el intento fallido número `attempt` (1-based):
    /// base * 2^(attempt-1), acotado por `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let factor = 1u64 << shift;
        self.base_backoff
            .checked_mul(factor as u32)
            .map(|d| d.min(self.max_backoff))
            .unwrap_or(self.max_backoff)
    }

    pub fn exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy { max_attempts: 5,
                              base_backoff: Duration::from_millis(100),
                              max_backoff: Duration::from_millis(500) };
        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(2), Duration::from_millis(200));
        assert_eq!(p.backoff(3), Duration::from_millis(400));
        assert_eq!(p.backoff(4), Duration::from_millis(500)); // cap
        assert_eq!(p.backoff(60), Duration::from_millis(500));
        assert!(p.exhausted(5));
        assert!(!p.exhausted(4));
    }
}
