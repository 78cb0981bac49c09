use std::time::Duration;

/// Exponential backoff with ±20% jitter, used between relay reconnects.
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    current: Duration,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            multiplier: 1.5,
            current: initial,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let base = self.current.as_secs_f64();
        let jitter_factor: f64 = rand::random_range(0.8..=1.2);
        let delay = Duration::from_secs_f64((base * jitter_factor).min(self.max.as_secs_f64()));
        let next = base * self.multiplier;
        self.current = Duration::from_secs_f64(next.min(self.max.as_secs_f64()));
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}
