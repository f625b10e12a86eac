//! Retry policy and per-orchestration retry state
//!
//! Failures are split into two classes:
//! - **complete**: nothing was accomplished before the failure
//! - **partial**: some progress was made before the failure
//!
//! Each class has its own successive and lifetime ceilings and an optional
//! [`BackoffPolicy`]. A [`RetryState`] is owned by the orchestration that
//! drives a workload across attempts and is discarded on success or give-up.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::backoff::BackoffPolicy;

/// Ceilings and backoff configuration for both failure classes
///
/// # Example
///
/// ```
/// use workload_engine::{BackoffPolicy, RetryPolicy, RetryState};
/// use std::time::Duration;
///
/// let policy = RetryPolicy::default()
///     .with_successive_complete_failure_limit(2)
///     .with_complete_failure_backoff(BackoffPolicy::new(
///         Duration::from_secs(1),
///         Duration::from_secs(8),
///     ));
///
/// let mut state = RetryState::new(policy);
/// state.increment_failure(false);
/// assert!(state.should_retry());
/// assert_eq!(state.backoff(), Duration::from_secs(1));
///
/// state.increment_failure(false);
/// assert!(!state.should_retry());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    pub successive_complete_failure_limit: u32,
    pub total_complete_failure_limit: u32,
    pub successive_partial_failure_limit: u32,
    pub total_partial_failure_limit: u32,

    /// Backoff applied while complete failures are accumulating
    #[serde(default)]
    pub complete_failure_backoff: Option<BackoffPolicy>,

    /// Backoff applied while partial failures are accumulating
    #[serde(default)]
    pub partial_failure_backoff: Option<BackoffPolicy>,
}

impl Default for RetryPolicy {
    /// - 5 successive / 10 total complete failures
    /// - 1000 successive / 20 total partial failures
    /// - complete-failure backoff 10s..30min, base 3
    /// - no partial-failure backoff
    fn default() -> Self {
        Self {
            successive_complete_failure_limit: 5,
            total_complete_failure_limit: 10,
            successive_partial_failure_limit: 1000,
            total_partial_failure_limit: 20,
            complete_failure_backoff: Some(
                BackoffPolicy::new(Duration::from_secs(10), Duration::from_secs(30 * 60))
                    .with_base(3),
            ),
            partial_failure_backoff: None,
        }
    }
}

impl RetryPolicy {
    /// A policy that gives up on the first failure of either class
    pub fn no_retry() -> Self {
        Self {
            successive_complete_failure_limit: 1,
            total_complete_failure_limit: 1,
            successive_partial_failure_limit: 1,
            total_partial_failure_limit: 1,
            complete_failure_backoff: None,
            partial_failure_backoff: None,
        }
    }

    pub fn with_successive_complete_failure_limit(mut self, limit: u32) -> Self {
        self.successive_complete_failure_limit = limit;
        self
    }

    pub fn with_total_complete_failure_limit(mut self, limit: u32) -> Self {
        self.total_complete_failure_limit = limit;
        self
    }

    pub fn with_successive_partial_failure_limit(mut self, limit: u32) -> Self {
        self.successive_partial_failure_limit = limit;
        self
    }

    pub fn with_total_partial_failure_limit(mut self, limit: u32) -> Self {
        self.total_partial_failure_limit = limit;
        self
    }

    pub fn with_complete_failure_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.complete_failure_backoff = Some(backoff);
        self
    }

    pub fn with_partial_failure_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.partial_failure_backoff = Some(backoff);
        self
    }

    /// Whether every ceiling is still unexceeded for the given counters
    pub fn within_limits(&self, counters: &FailureCounters) -> bool {
        counters.successive_complete_failures < self.successive_complete_failure_limit
            && counters.total_complete_failures < self.total_complete_failure_limit
            && counters.successive_partial_failures < self.successive_partial_failure_limit
            && counters.total_partial_failures < self.total_partial_failure_limit
    }

    /// Backoff for the failure class currently accumulating
    ///
    /// Complete failures take precedence; zero when no policy applies.
    pub fn backoff_for(&self, counters: &FailureCounters) -> Duration {
        if counters.successive_complete_failures > 0 {
            if let Some(policy) = &self.complete_failure_backoff {
                return policy.get_backoff(i64::from(counters.successive_complete_failures));
            }
        }
        if counters.successive_partial_failures > 0 {
            if let Some(policy) = &self.partial_failure_backoff {
                return policy.get_backoff(i64::from(counters.successive_partial_failures));
            }
        }
        Duration::ZERO
    }
}

/// Failure counters for one orchestration
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailureCounters {
    pub successive_complete_failures: u32,
    pub successive_partial_failures: u32,
    pub total_complete_failures: u32,
    pub total_partial_failures: u32,
}

/// Caller-owned retry state
///
/// Counters change only through [`RetryState::increment_failure`] and
/// [`RetryState::reset`]. Once any ceiling is breached the state stays
/// exhausted until reset, even if a later failure of the other class clears
/// the breached successive counter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryState {
    policy: RetryPolicy,
    counters: FailureCounters,
    exhausted: bool,
}

impl RetryState {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            counters: FailureCounters::default(),
            exhausted: false,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn counters(&self) -> FailureCounters {
        self.counters
    }

    /// Record one failure of the given class
    pub fn increment_failure(&mut self, is_partial: bool) {
        let c = &mut self.counters;
        if is_partial {
            c.successive_partial_failures = c.successive_partial_failures.saturating_add(1);
            c.total_partial_failures = c.total_partial_failures.saturating_add(1);
            c.successive_complete_failures = 0;
        } else {
            c.successive_complete_failures = c.successive_complete_failures.saturating_add(1);
            c.total_complete_failures = c.total_complete_failures.saturating_add(1);
            c.successive_partial_failures = 0;
        }

        if !self.policy.within_limits(&self.counters) {
            self.exhausted = true;
        }
    }

    /// Whether another attempt is allowed
    pub fn should_retry(&self) -> bool {
        !self.exhausted && self.policy.within_limits(&self.counters)
    }

    /// How long to wait before the next attempt
    pub fn backoff(&self) -> Duration {
        self.policy.backoff_for(&self.counters)
    }

    /// Clear all counters after a successful attempt
    pub fn reset(&mut self) {
        self.counters = FailureCounters::default();
        self.exhausted = false;
    }
}

impl fmt::Display for RetryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.counters;
        write!(
            f,
            "complete {}/{} successive, {}/{} total; partial {}/{} successive, {}/{} total; backoff {:?}",
            c.successive_complete_failures,
            self.policy.successive_complete_failure_limit,
            c.total_complete_failures,
            self.policy.total_complete_failure_limit,
            c.successive_partial_failures,
            self.policy.successive_partial_failure_limit,
            c.total_partial_failures,
            self.policy.total_partial_failure_limit,
            self.backoff(),
        )
    }
}
