//! Retry and backoff policy
//!
//! This module provides:
//! - [`BackoffPolicy`] - Exponential backoff with floor and ceiling
//! - [`RetryPolicy`] - Ceilings for complete and partial failures
//! - [`RetryState`] - Failure counters consulted between attempts
//! - [`RetryTracker`] - One [`RetryState`] per workload, used by the failure handler

mod backoff;
mod retry;
mod tracker;

pub use backoff::BackoffPolicy;
pub use retry::{FailureCounters, RetryPolicy, RetryState};
pub use tracker::{RetryDecision, RetryTracker};
