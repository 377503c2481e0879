use dossier_core::DossierError;
use rand::Rng;
use std::time::Duration;

/// Retry policy for transient fetch failures. Non-transient errors never
/// retry; `rate_limited` is excluded here because it defers to the
/// rate-limit controller's backoff window instead.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub factor: f64,
    pub cap: Duration,
    pub jitter_frac: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base: Duration::from_millis(500),
            factor: 2.0,
            cap: Duration::from_secs(30),
            jitter_frac: 0.2,
        }
    }
}

impl RetryPolicy {
    pub fn should_retry(&self, error: &DossierError, attempt: u32) -> bool {
        attempt < self.max_attempts && error.is_transient()
    }

    /// Delay before retry number `attempt` (1-based), with ±jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let raw = self.base.as_secs_f64() * self.factor.powi(exponent as i32);
        let capped = raw.min(self.cap.as_secs_f64());
        let jitter = 1.0 + rand::thread_rng().gen_range(-self.jitter_frac..=self.jitter_frac);
        Duration::from_secs_f64((capped * jitter).max(0.001))
    }
}
