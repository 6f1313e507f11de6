//! Backoff schedule for page fetches.
//!
//! The policy only produces delays; the loop itself is `tokio_retry::RetryIf`,
//! which consumes the schedule and stops early on non-retryable errors.

use std::time::Duration;

use crate::config::FetcherConfig;

/// Exponential backoff with a cap: `base, 2*base, 4*base, …` never above `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Full jitter: each delay is scaled by a random factor in `[0, 1)`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            jitter: false,
        }
    }
}

impl From<&FetcherConfig> for RetryPolicy {
    fn from(cfg: &FetcherConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            base_delay: Duration::from_millis(cfg.backoff_base_ms),
            max_delay: Duration::from_millis(cfg.backoff_max_ms),
            jitter: cfg.jitter,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based: the wait after the first failure is `delay(0)`).
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// The waits between attempts; one fewer than `max_attempts`.
    pub fn schedule(&self) -> impl Iterator<Item = Duration> + use<> {
        let policy = *self;
        (0..policy.max_attempts.saturating_sub(1)).map(move |retry| {
            let d = policy.delay(retry);
            if policy.jitter { tokio_retry::strategy::jitter(d) } else { d }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_doubles_then_caps() {
        let delays: Vec<u64> = RetryPolicy::default()
            .schedule()
            .map(|d| d.as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8]);

        let long = RetryPolicy { max_attempts: 8, ..RetryPolicy::default() };
        let delays: Vec<u64> = long.schedule().map(|d| d.as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 10, 10, 10]);
    }

    #[test]
    fn single_attempt_never_waits() {
        let p = RetryPolicy { max_attempts: 1, ..RetryPolicy::default() };
        assert_eq!(p.schedule().count(), 0);
    }

    #[test]
    fn jitter_stays_under_the_unjittered_delay() {
        let p = RetryPolicy { jitter: true, ..RetryPolicy::default() };
        for (retry, d) in p.schedule().enumerate() {
            assert!(d <= p.delay(retry as u32));
        }
    }

    #[test]
    fn huge_retry_index_does_not_overflow() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay(40), p.max_delay);
    }
}
