use rand::Rng;
use std::time::Duration;

use crate::config::RetrySettings;

/// Exponential backoff between attempts of one task
#[derive(Debug, Clone)]
pub struct Backoff {
    settings: RetrySettings,
}

impl Backoff {
    pub fn new(settings: RetrySettings) -> Self {
        Self { settings }
    }

    /// Delay before the next attempt after `attempts` unsuccessful ones
    pub fn delay_for(&self, attempts: u32) -> Duration {
        self.apply_jitter(self.base_delay(attempts))
    }

    /// Delay without jitter: `initial * multiplier^(attempts - 1)`, capped
    pub fn base_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let multiplier = self.settings.backoff_multiplier.powi(exponent);
        let secs = self.settings.initial_delay.as_secs_f64() * multiplier;

        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.settings.max_delay)
            .min(self.settings.max_delay)
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        if !self.settings.jitter || delay.is_zero() {
            return delay;
        }

        let mut rng = rand::rng();
        let jitter_range = delay.as_secs_f64() * self.settings.jitter_factor;
        let jitter = rng.random_range(-jitter_range / 2.0..=jitter_range / 2.0);
        Duration::try_from_secs_f64((delay.as_secs_f64() + jitter).max(0.0)).unwrap_or(delay)
    }
}
