//! Exponential backoff with jitter for stream reconnection.

use std::time::Duration;

use rand::Rng;

/// Configuration for reconnection delays.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound for the delay between attempts.
    pub max_delay: Duration,
    /// Growth factor applied after every attempt.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

/// Reconnection delay sequence; unlimited attempts.
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    current_delay: Duration,
    attempts: u32,
}

impl Backoff {
    /// Starts at `config.initial_delay`.
    pub fn new(config: BackoffConfig) -> Self {
        let current_delay = config.initial_delay;
        Self {
            config,
            current_delay,
            attempts: 0,
        }
    }

    /// Delay to wait before the next attempt; grows the following one.
    pub fn next_delay(&mut self) -> Duration {
        self.attempts += 1;
        let delay = self.apply_jitter(self.current_delay);
        let grown = self.current_delay.mul_f64(self.config.multiplier.max(1.0));
        self.current_delay = grown.min(self.config.max_delay);
        delay
    }

    /// Back to the initial delay after a successful connection.
    pub fn reset(&mut self) {
        self.current_delay = self.config.initial_delay;
        self.attempts = 0;
    }

    /// Attempts since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        let jitter = self.config.jitter_factor.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return delay;
        }
        let factor = rand::rng().random_range((1.0 - jitter)..=(1.0 + jitter));
        delay.mul_f64(factor).min(self.config.max_delay)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn without_jitter() -> BackoffConfig {
        BackoffConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }

    #[test]
    fn grows_exponentially_up_to_max() {
        let mut backoff = Backoff::new(without_jitter());
        let delays: Vec<u128> = (0..6).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000]);
        assert_eq!(backoff.attempts(), 6);
    }

    #[test]
    fn reset_starts_over() {
        let mut backoff = Backoff::new(without_jitter());
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn jitter_stays_in_band() {
        let mut config = without_jitter();
        config.jitter_factor = 0.1;
        for _ in 0..100 {
            let mut backoff = Backoff::new(config.clone());
            let delay = backoff.next_delay().as_secs_f64();
            assert!((0.09 - 1e-9..=0.11 + 1e-9).contains(&delay), "{delay}");
        }
    }
}
