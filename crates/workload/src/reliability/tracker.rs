//! Per-workload retry state for one launcher process

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use super::retry::{RetryPolicy, RetryState};

/// What to do after a retryable failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Put the workload back on its queue, eligible after the delay
    RetryAfter(Duration),
    /// A ceiling was reached; fail the workload
    GiveUp,
}

/// [`RetryState`] keyed by workload id
///
/// Entries are created on the first failure and dropped on success, give-up
/// or [`RetryTracker::forget`]. Clones share the same table.
#[derive(Clone)]
pub struct RetryTracker {
    policy: RetryPolicy,
    states: Arc<DashMap<String, RetryState>>,
}

impl RetryTracker {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            states: Arc::new(DashMap::new()),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Count a failure and decide whether the workload gets another attempt
    pub fn record_failure(&self, workload_id: &str, is_partial: bool) -> RetryDecision {
        let decision = {
            let mut state = self
                .states
                .entry(workload_id.to_string())
                .or_insert_with(|| RetryState::new(self.policy.clone()));
            state.increment_failure(is_partial);
            if state.should_retry() {
                RetryDecision::RetryAfter(state.backoff())
            } else {
                RetryDecision::GiveUp
            }
        };

        if decision == RetryDecision::GiveUp {
            self.states.remove(workload_id);
        }
        decision
    }

    /// Clear counters after a successful launch
    pub fn record_success(&self, workload_id: &str) {
        self.states.remove(workload_id);
    }

    /// Drop state for a workload that will not be retried here
    pub fn forget(&self, workload_id: &str) {
        self.states.remove(workload_id);
    }

    pub fn state(&self, workload_id: &str) -> Option<RetryState> {
        self.states.get(workload_id).map(|state| state.clone())
    }

    /// Workloads with failures on record
    pub fn tracked(&self) -> usize {
        self.states.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reliability::BackoffPolicy;

    fn policy() -> RetryPolicy {
        RetryPolicy::default()
            .with_successive_complete_failure_limit(3)
            .with_complete_failure_backoff(BackoffPolicy::new(
                Duration::from_secs(10),
                Duration::from_secs(60),
            ))
    }

    #[test]
    fn test_backs_off_then_gives_up() {
        let tracker = RetryTracker::new(policy());

        assert_eq!(
            tracker.record_failure("w-1", false),
            RetryDecision::RetryAfter(Duration::from_secs(10))
        );
        assert_eq!(
            tracker.record_failure("w-1", false),
            RetryDecision::RetryAfter(Duration::from_secs(20))
        );
        assert_eq!(tracker.record_failure("w-1", false), RetryDecision::GiveUp);
        assert_eq!(tracker.tracked(), 0);
    }

    #[test]
    fn test_workloads_are_counted_separately() {
        let tracker = RetryTracker::new(policy());
        tracker.record_failure("a", false);
        tracker.record_failure("a", false);
        tracker.record_failure("b", false);

        assert_eq!(
            tracker.state("a").unwrap().counters().successive_complete_failures,
            2
        );
        assert_eq!(
            tracker.state("b").unwrap().counters().successive_complete_failures,
            1
        );
    }

    #[test]
    fn test_success_resets() {
        let tracker = RetryTracker::new(policy());
        tracker.record_failure("w-1", false);
        tracker.record_failure("w-1", false);
        tracker.record_success("w-1");
        assert!(tracker.state("w-1").is_none());

        assert_eq!(
            tracker.record_failure("w-1", false),
            RetryDecision::RetryAfter(Duration::from_secs(10))
        );
    }

    #[test]
    fn test_no_retry_policy_gives_up_at_once() {
        let tracker = RetryTracker::new(RetryPolicy::no_retry());
        assert_eq!(tracker.record_failure("w-1", true), RetryDecision::GiveUp);
    }
}
