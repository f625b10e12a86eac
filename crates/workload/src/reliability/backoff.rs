//! Exponential backoff policy

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exponential backoff with a floor and a ceiling
///
/// `get_backoff(n) = min(min_interval * base^(n - 1), max_interval)` for
/// `n >= 1`, zero otherwise.
///
/// # Example
///
/// ```
/// use workload_engine::BackoffPolicy;
/// use std::time::Duration;
///
/// let policy = BackoffPolicy::new(Duration::from_secs(10), Duration::from_secs(60));
///
/// assert_eq!(policy.get_backoff(0), Duration::ZERO);
/// assert_eq!(policy.get_backoff(1), Duration::from_secs(10));
/// assert_eq!(policy.get_backoff(2), Duration::from_secs(20));
/// assert_eq!(policy.get_backoff(3), Duration::from_secs(40));
/// assert_eq!(policy.get_backoff(4), Duration::from_secs(60));
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Backoff for the first failure
    #[serde(with = "crate::duration_millis")]
    pub min_interval: Duration,

    /// Upper bound for any backoff
    #[serde(with = "crate::duration_millis")]
    pub max_interval: Duration,

    /// Growth factor per successive failure
    pub base: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(10), Duration::from_secs(30 * 60))
    }
}

impl BackoffPolicy {
    /// Create a policy with the default base of 2
    pub fn new(min_interval: Duration, max_interval: Duration) -> Self {
        Self {
            min_interval,
            max_interval,
            base: 2,
        }
    }

    /// Set the growth factor (values below 1 are treated as 1)
    pub fn with_base(mut self, base: u32) -> Self {
        self.base = base.max(1);
        self
    }

    /// Backoff before the attempt following the `ordinal`-th successive failure
    pub fn get_backoff(&self, ordinal: i64) -> Duration {
        if ordinal < 1 {
            return Duration::ZERO;
        }

        let exponent = u32::try_from(ordinal - 1).unwrap_or(u32::MAX);
        let unclamped = self
            .base
            .max(1)
            .checked_pow(exponent)
            .and_then(|factor| self.min_interval.checked_mul(factor));

        match unclamped {
            Some(backoff) => backoff.min(self.max_interval),
            None => self.max_interval,
        }
    }
}
