//! Retry policy: decides backoff delays between acquire attempts.

use std::time::Duration;

use rand::Rng;

/// Retry policy for pool calls that did not produce a lease.
///
/// Exponential backoff capped at `max_delay`, with optional jitter so that
/// many runs waiting on the same pool do not poll in lockstep.
/// Callers clip the result to whatever is left of their timeout budget.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Base delay for the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Upper bound of a single delay.
    pub max_delay: Duration,

    /// Fraction of the delay added as random jitter (0.0 disables it).
    pub jitter: f64,
}

impl RetryPolicy {
    /// Default policy for acquire polling: 1s, 2s, 4s, 8s, 10s, 10s, ...
    pub fn acquire_default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
            jitter: 0.2,
        }
    }

    /// Same schedule without jitter. Useful where timing must be exact.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = 0.0;
        self
    }

    /// Calculate delay for the next retry based on attempt number.
    ///
    /// # Arguments
    /// * `attempts` - Number of attempts already made (1-indexed).
    ///
    /// delay = min(base_delay * multiplier^(attempts - 1), max_delay) * (1 + U(0, jitter))
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let base_secs = self.base_delay.as_secs_f64();
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_secs = (base_secs * self.multiplier.powi(exponent)).min(self.max_delay.as_secs_f64());

        let factor = if self.jitter > 0.0 {
            1.0 + rand::thread_rng().gen_range(0.0..self.jitter)
        } else {
            1.0
        };
        Duration::from_secs_f64(delay_secs * factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::acquire_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_has_reasonable_values() {
        let policy = RetryPolicy::acquire_default();
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.multiplier, 2.0);
        assert_eq!(policy.max_delay, Duration::from_secs(10));
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let policy = RetryPolicy::acquire_default().without_jitter();

        assert_eq!(policy.next_delay(0), Duration::from_secs(1));
        assert_eq!(policy.next_delay(1), Duration::from_secs(1));
        assert_eq!(policy.next_delay(2), Duration::from_secs(2));
        assert_eq!(policy.next_delay(4), Duration::from_secs(8));
        assert_eq!(policy.next_delay(5), Duration::from_secs(10));
        assert_eq!(policy.next_delay(100), Duration::from_secs(10));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy::acquire_default();
        for attempt in 1..20 {
            let delay = policy.next_delay(attempt);
            let plain = policy.clone().without_jitter().next_delay(attempt);
            assert!(delay >= plain);
            assert!(delay <= plain.mul_f64(1.0 + policy.jitter));
        }
    }
}
