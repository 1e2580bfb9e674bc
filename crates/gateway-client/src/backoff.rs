use std::time::Duration;

use crate::config::BackoffConfig;

/// Exponential reconnect delay: grows by `factor` on each consecutive
/// failure, capped at `max`, and returns to the floor only on `reset`.
#[derive(Debug, Clone)]
pub struct Backoff {
    floor: Duration,
    max: Duration,
    factor: f64,
    current: Duration,
}

impl Backoff {
    pub fn new(config: &BackoffConfig) -> Self {
        let floor = Duration::from_millis(config.initial_ms);
        let max = Duration::from_millis(config.max_ms.max(config.initial_ms));
        Self {
            floor,
            max,
            factor: config.factor.max(1.0),
            current: floor,
        }
    }

    /// Delay the next reconnect will wait.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Take the delay for this attempt and grow it for the next one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.mul_f64(self.factor).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.floor;
    }
}
