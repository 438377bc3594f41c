//! Per-key exponential backoff for failed reconciliations.
//!
//! Every consecutive failure of a key doubles its requeue delay, starting
//! at [`BackoffConfig::base_delay`] and capped at [`BackoffConfig::max_delay`].
//! A success ([`ExponentialBackoff::forget`]) resets the key.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

/// Default delay after the first failure.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(5);

/// Default upper bound on the delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(1000);

/// Backoff bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay after the first failure
    pub base_delay: Duration,
    /// Upper bound on the delay
    pub max_delay: Duration,
}

impl BackoffConfig {
    /// Creates a new backoff config.
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}

/// Tracks consecutive failures per key and computes requeue delays.
#[derive(Debug)]
pub struct ExponentialBackoff<K> {
    config: BackoffConfig,
    failures: Mutex<HashMap<K, u32>>,
}

impl<K> ExponentialBackoff<K>
where
    K: Eq + Hash + Clone,
{
    /// Creates a new limiter with the given bounds.
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Records a failure of `key` and returns how long to wait before
    /// retrying it.
    pub fn when(&self, key: &K) -> Duration {
        let mut failures = self.failures.lock();
        let count = failures.entry(key.clone()).or_insert(0);
        let exponent = *count;
        *count = count.saturating_add(1);
        self.delay_for(exponent)
    }

    /// Clears the failure history of `key`.
    pub fn forget(&self, key: &K) {
        self.failures.lock().remove(key);
    }

    /// Returns the number of consecutive failures recorded for `key`.
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.failures.lock().get(key).copied().unwrap_or(0)
    }

    fn delay_for(&self, exponent: u32) -> Duration {
        let max = self.config.max_delay;
        2u32.checked_pow(exponent)
            .and_then(|factor| self.config.base_delay.checked_mul(factor))
            .map_or(max, |delay| delay.min(max))
    }
}

impl<K> Default for ExponentialBackoff<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_failure_uses_base_delay() {
        let limiter: ExponentialBackoff<String> = ExponentialBackoff::default();
        assert_eq!(limiter.when(&"k".to_string()), DEFAULT_BASE_DELAY);
        assert_eq!(limiter.num_requeues(&"k".to_string()), 1);
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let limiter = ExponentialBackoff::new(BackoffConfig::new(
            Duration::from_millis(10),
            Duration::from_millis(70),
        ));
        let key = "openebs/node-1".to_string();

        let delays: Vec<Duration> = (0..6).map(|_| limiter.when(&key)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(10),
                Duration::from_millis(20),
                Duration::from_millis(40),
                Duration::from_millis(70),
                Duration::from_millis(70),
                Duration::from_millis(70),
            ]
        );
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_forget_resets_delay() {
        let limiter: ExponentialBackoff<&str> = ExponentialBackoff::default();
        for _ in 0..5 {
            limiter.when(&"k");
        }
        assert!(limiter.when(&"k") > DEFAULT_BASE_DELAY);

        limiter.forget(&"k");
        assert_eq!(limiter.num_requeues(&"k"), 0);
        assert_eq!(limiter.when(&"k"), DEFAULT_BASE_DELAY);
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter: ExponentialBackoff<&str> = ExponentialBackoff::default();
        limiter.when(&"a");
        limiter.when(&"a");
        assert_eq!(limiter.when(&"b"), DEFAULT_BASE_DELAY);
        assert_eq!(limiter.num_requeues(&"a"), 2);
    }

    #[test]
    fn test_many_failures_never_exceed_cap() {
        let limiter: ExponentialBackoff<&str> = ExponentialBackoff::default();
        let last = (0..200).map(|_| limiter.when(&"k")).last().unwrap();
        assert_eq!(last, DEFAULT_MAX_DELAY);
    }
}
