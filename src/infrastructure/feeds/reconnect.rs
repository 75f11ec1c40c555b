//! Reconnect Backoff
//!
//! Exponential backoff with jitter for upstream feed reconnection. Each
//! connection loop owns one policy; a successful connect resets it so a
//! later outage starts the ladder from the initial delay again.

use std::time::Duration;

use rand::Rng;

/// Backoff parameters for one upstream connection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Jitter as a fraction of the computed delay (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Attempts before the feed is declared unavailable (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.1,
            max_attempts: 5,
        }
    }
}

/// Exponential backoff state. The delay doubles per failed attempt up to
/// `max_delay`.
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a policy from configuration.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
        }
    }

    /// Delay before the next attempt, or `None` once the attempt budget is
    /// spent.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.config.max_attempts > 0 && self.attempt_count >= self.config.max_attempts {
            return None;
        }

        let exponent = self.attempt_count.min(31);
        self.attempt_count += 1;

        let base = self
            .config
            .initial_delay
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.config.max_delay);

        Some(self.apply_jitter(base))
    }

    /// Reset after a successful connection.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Failed attempts since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let mut rng = rand::rng();
        let jitter: f64 = rng.random_range(-jitter_range..=jitter_range);
        let adjusted = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Duration::from_millis(adjusted as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(max_attempts: u32) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter_factor: 0.0,
            max_attempts,
        }
    }

    #[test]
    fn delays_double_per_attempt() {
        let mut policy = ReconnectPolicy::new(no_jitter(0));

        assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(200)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(400)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(800)));
    }

    #[test]
    fn delay_is_capped_at_max() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(2000),
            jitter_factor: 0.0,
            max_attempts: 0,
        });

        let _ = policy.next_delay();
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(2000)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(2000)));
    }

    #[test]
    fn attempt_budget_is_enforced() {
        let mut policy = ReconnectPolicy::new(no_jitter(3));

        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert_eq!(policy.attempt_count(), 3);

        assert!(policy.next_delay().is_none());
    }

    #[test]
    fn reset_restarts_the_ladder() {
        let mut policy = ReconnectPolicy::new(no_jitter(3));

        let _ = policy.next_delay();
        let _ = policy.next_delay();
        policy.reset();

        assert_eq!(policy.attempt_count(), 0);
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        for _ in 0..100 {
            let mut policy = ReconnectPolicy::new(ReconnectConfig {
                initial_delay: Duration::from_millis(1000),
                max_delay: Duration::from_secs(10),
                jitter_factor: 0.1,
                max_attempts: 0,
            });

            let millis = policy.next_delay().map_or(0, |d| d.as_millis());
            assert!(millis >= 900, "delay {millis}ms is below minimum 900ms");
            assert!(millis <= 1100, "delay {millis}ms is above maximum 1100ms");
        }
    }

    #[test]
    fn zero_max_attempts_never_exhausts() {
        let mut policy = ReconnectPolicy::new(no_jitter(0));
        for _ in 0..1000 {
            assert!(policy.next_delay().is_some());
        }
    }
}
