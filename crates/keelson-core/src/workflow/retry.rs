//! Retry decisions and backoff delays for task execution.

use std::time::Duration;

use keelson_types::config::{BackoffKind, RetrySettings};

/// Stateless retry policy derived from `EngineConfig.retry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub backoff: BackoffKind,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            backoff: settings.backoff,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms.max(settings.base_delay_ms)),
        }
    }

    /// Whether another attempt is allowed after `retries_done` retries.
    pub fn should_retry(&self, retries_done: u32, max_retries: u32) -> bool {
        retries_done < max_retries
    }

    /// Delay before retry number `retry` (1-based).
    ///
    /// Exponential: `base * 2^(retry - 1)`, capped at `max_delay`.
    /// Fixed: `base` every time.
    pub fn delay_for(&self, retry: u32) -> Duration {
        match self.backoff {
            BackoffKind::Fixed => self.base_delay,
            BackoffKind::Exponential => {
                let exp = retry.saturating_sub(1).min(31);
                self.base_delay
                    .checked_mul(1u32 << exp)
                    .map_or(self.max_delay, |d| d.min(self.max_delay))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(backoff: BackoffKind) -> RetryPolicy {
        RetryPolicy::from_settings(&RetrySettings {
            backoff,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
        })
    }

    #[test]
    fn test_should_retry_counts_retries_not_attempts() {
        let p = policy(BackoffKind::Fixed);
        assert!(p.should_retry(0, 2));
        assert!(p.should_retry(1, 2));
        assert!(!p.should_retry(2, 2));
        assert!(!p.should_retry(0, 0));
    }

    #[test]
    fn test_exponential_delays_double_and_cap() {
        let p = policy(BackoffKind::Exponential);
        assert_eq!(p.delay_for(1), Duration::from_millis(100));
        assert_eq!(p.delay_for(2), Duration::from_millis(200));
        assert_eq!(p.delay_for(3), Duration::from_millis(400));
        assert_eq!(p.delay_for(5), Duration::from_millis(1_000));
        assert_eq!(p.delay_for(64), Duration::from_millis(1_000));
    }

    #[test]
    fn test_fixed_delay_is_constant() {
        let p = policy(BackoffKind::Fixed);
        assert_eq!(p.delay_for(1), p.delay_for(7));
    }
}
