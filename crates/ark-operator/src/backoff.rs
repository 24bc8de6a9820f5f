//! Bounded exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max,
            attempt: 0,
        }
    }

    /// Status-write conflicts resolve quickly; retry tightly.
    pub fn conflict() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_secs(2))
    }

    /// API rate limiting needs room to drain.
    pub fn rate_limit() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }

    /// Connection-level failures to game servers or the platform API.
    pub fn connect() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(10))
    }

    /// Next wait: `min * 2^attempt` capped at `max`, with up to 50% jitter.
    pub fn wait(&mut self) -> Duration {
        let exp = self.min.saturating_mul(1u32 << self.attempt.min(16));
        let capped = exp.min(self.max);
        self.attempt = self.attempt.saturating_add(1);

        let jitter = rand::thread_rng().gen_range(0.0..=0.5);
        capped.mul_f64(1.0 + jitter)
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(1));
        let first = backoff.wait();
        assert!(first >= Duration::from_millis(100));
        assert!(first <= Duration::from_millis(150));

        for _ in 0..10 {
            backoff.wait();
        }
        let capped = backoff.wait();
        assert!(capped <= Duration::from_millis(1500));
        assert!(capped >= Duration::from_secs(1));
    }

    #[test]
    fn test_reset() {
        let mut backoff = Backoff::conflict();
        backoff.wait();
        backoff.wait();
        assert_eq!(backoff.attempt(), 2);
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
    }
}
