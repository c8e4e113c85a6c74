use std::time::Duration;

use rand::Rng;

/// Capped exponential backoff between delivery attempts.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Deterministic delay before retrying after `attempt` failures
    /// (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self.initial.as_millis() as f64
            * self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let capped = exp.min(self.max.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// `delay` with +/-25% jitter, so replicas retrying the same outage
    /// don't stampede in lockstep.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.delay(attempt).as_millis() as f64;
        let factor = rand::thread_rng().gen_range(0.75..=1.25);
        Duration::from_millis((base * factor) as u64).min(self.max)
    }
}

/// Per-beam delivery budget: bounded attempts, bounded per-push wait.
#[derive(Debug, Clone)]
pub struct DeliveryPolicy {
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    pub push_timeout: Duration,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: BackoffPolicy::default(),
            push_timeout: Duration::from_secs(30),
        }
    }
}
