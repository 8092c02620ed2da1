//! Exponential reconnect backoff with jitter

use std::time::Duration;

use rand::Rng;

/// Doubling backoff capped at `max`. Each delay is drawn from
/// `[base / 2, base]` so reconnecting clients spread out.
#[derive(Debug, Clone)]
pub struct Backoff {
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.max(Duration::from_millis(1));
        Self {
            max: max.max(initial),
            current: initial,
        }
    }

    /// Delay before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = (self.current * 2).min(self.max);

        let base_ms = base.as_millis() as u64;
        let half = base_ms / 2;
        let jitter = rand::rng().random_range(0..=half);
        Duration::from_millis(base_ms - half + jitter)
    }
}
