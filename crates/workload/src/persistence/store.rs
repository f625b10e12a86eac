//! WorkloadQueueStore trait definition

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::workload::{NewWorkload, Workload, WorkloadPriority, WorkloadStatus};

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Workload not found
    #[error("workload not found: {0}")]
    WorkloadNotFound(String),

    /// A workload with this id already exists
    #[error("workload already exists: {0}")]
    Conflict(String),

    /// A non-acked queue item already exists for this workload
    #[error("workload {0} is already enqueued")]
    AlreadyEnqueued(String),

    /// The requested status change is not allowed from the current status
    #[error("invalid status transition for workload {id}: {from} -> {to}")]
    InvalidStatusTransition {
        id: String,
        from: WorkloadStatus,
        to: WorkloadStatus,
    },

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Durable lease record for one pending workload
#[derive(Debug, Clone, PartialEq)]
pub struct QueueItem {
    pub id: Uuid,
    pub workload_id: String,
    pub dataplane_group: String,
    pub priority: WorkloadPriority,
    pub created_at: DateTime<Utc>,
    /// Lease expiry; the item is claimable once this has passed
    pub poll_deadline: DateTime<Utc>,
    /// Non-null means delivery is complete and the item is inert
    pub acked_at: Option<DateTime<Utc>>,
}

impl QueueItem {
    /// Whether the item can be claimed at `now`
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.acked_at.is_none() && now >= self.poll_deadline
    }
}

/// Enqueued item count for one logical queue (dataplane group x priority)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub dataplane_group: String,
    pub priority: WorkloadPriority,
    pub enqueued_count: u64,
}

/// Result of asking for a mutex key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutexAcquisition {
    /// The workload holds the key, whether newly or already
    Acquired,
    /// Another live workload holds the key
    HeldBy(String),
}

/// Parameters of a single queue poll
#[derive(Debug, Clone)]
pub struct PollRequest {
    /// `None` polls across all groups
    pub dataplane_group: Option<String>,
    /// `None` polls across all priorities
    pub priority: Option<WorkloadPriority>,
    pub quantity: usize,
    /// How long a claimed item stays invisible to other pollers
    pub redelivery_window: Duration,
}

impl PollRequest {
    pub fn new(quantity: usize, redelivery_window: Duration) -> Self {
        Self {
            dataplane_group: None,
            priority: None,
            quantity,
            redelivery_window,
        }
    }

    pub fn for_group(mut self, group: impl Into<String>) -> Self {
        self.dataplane_group = Some(group.into());
        self
    }

    pub fn with_priority(mut self, priority: WorkloadPriority) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// Store for workload records and the workload queue
///
/// The queue is the only stateful component of the engine. Implementations
/// must guarantee that concurrent `poll` calls never return the same workload
/// while its lease is live (select-and-lock, skip rows locked by others,
/// advance the deadline, return, all in one atomic step).
#[async_trait]
pub trait WorkloadQueueStore: Send + Sync + 'static {
    // =========================================================================
    // Workload Operations
    // =========================================================================

    /// Create a new pending workload
    async fn create_workload(&self, workload: NewWorkload) -> Result<Workload, StoreError>;

    /// Get a workload by id
    async fn get_workload(&self, workload_id: &str) -> Result<Workload, StoreError>;

    /// Claim a workload for a dataplane
    ///
    /// A pending workload, or a claimed one whose deadline has passed, is bound
    /// to `dataplane_id` with the new deadline. Re-claiming by the owning
    /// dataplane before the deadline succeeds without refreshing it. Returns
    /// `false` when another dataplane holds a live claim or the workload has
    /// progressed past `claimed`.
    async fn claim(
        &self,
        workload_id: &str,
        dataplane_id: &str,
        deadline: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Mark a claimed workload as launched and ack its queue item
    async fn mark_launched(
        &self,
        workload_id: &str,
        deadline: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Record a heartbeat from the execution side, moving the workload to running
    async fn heartbeat(&self, workload_id: &str, deadline: DateTime<Utc>)
        -> Result<(), StoreError>;

    /// Mark a workload as succeeded
    async fn succeed(&self, workload_id: &str) -> Result<(), StoreError>;

    /// Mark a workload as failed
    async fn fail(&self, workload_id: &str, source: &str, reason: &str)
        -> Result<(), StoreError>;

    /// Mark a workload as cancelled
    async fn cancel(&self, workload_id: &str, source: &str, reason: &str)
        -> Result<(), StoreError>;

    /// Active workloads sharing a mutex key
    async fn find_active_by_mutex_key(&self, mutex_key: &str)
        -> Result<Vec<Workload>, StoreError>;

    /// Take a mutex key for a workload
    ///
    /// The key passes to `workload_id` when it is free or its holder no longer
    /// holds a live claim (see [`holds_mutex`]). Asking again for the current
    /// holder returns [`MutexAcquisition::Acquired`] without handing out a
    /// second grant. Check and take happen in one atomic step across all
    /// dataplanes sharing the store.
    async fn acquire_mutex(
        &self,
        mutex_key: &str,
        workload_id: &str,
    ) -> Result<MutexAcquisition, StoreError>;

    // =========================================================================
    // Queue Operations
    // =========================================================================

    /// Enqueue a workload, immediately eligible for polling
    ///
    /// Fails with [`StoreError::AlreadyEnqueued`] while a non-acked item for
    /// the same workload exists.
    async fn enqueue(
        &self,
        dataplane_group: &str,
        priority: WorkloadPriority,
        workload_id: &str,
    ) -> Result<QueueItem, StoreError>;

    /// Put a pending or claimed workload back on its queue for a later attempt
    ///
    /// The workload returns to `pending` without an owner, its live queue item
    /// is acked and a fresh item becomes eligible at `not_before`.
    async fn requeue(
        &self,
        workload_id: &str,
        not_before: DateTime<Utc>,
    ) -> Result<QueueItem, StoreError>;

    /// Claim up to `quantity` eligible items, oldest first, and return their workloads
    async fn poll(&self, request: PollRequest) -> Result<Vec<Workload>, StoreError>;

    /// Mark the queue item for a workload as delivered (idempotent)
    async fn ack(&self, workload_id: &str) -> Result<(), StoreError>;

    /// Count non-acked items whose lease has lapsed
    async fn count_enqueued(
        &self,
        dataplane_group: Option<&str>,
        priority: Option<WorkloadPriority>,
    ) -> Result<u64, StoreError>;

    /// Enqueued counts per dataplane group and priority
    async fn queue_stats(&self) -> Result<Vec<QueueStats>, StoreError>;

    /// Delete acked queue items acked before `cutoff`, returning how many were removed
    async fn delete_acked_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Validate a forward status transition
///
/// Re-applying the same terminal status is accepted so terminal writes are
/// idempotent under redelivery; the caller treats it as a no-op.
pub(crate) fn check_terminal_transition(
    workload: &Workload,
    to: WorkloadStatus,
) -> Result<bool, StoreError> {
    if workload.status == to {
        return Ok(false);
    }
    if workload.status.is_terminal() {
        return Err(StoreError::InvalidStatusTransition {
            id: workload.id.clone(),
            from: workload.status,
            to,
        });
    }
    Ok(true)
}

/// Whether a workload keeps its mutex key at `now`
///
/// Only claimed, launched or running workloads hold a key, and only until
/// their deadline passes.
pub fn holds_mutex(workload: &Workload, now: DateTime<Utc>) -> bool {
    matches!(
        workload.status,
        WorkloadStatus::Claimed | WorkloadStatus::Launched | WorkloadStatus::Running
    ) && workload.deadline.is_none_or(|deadline| deadline > now)
}

/// Whether a claim has lapsed and may be taken over by another dataplane
pub(crate) fn claim_expired(workload: &Workload, now: DateTime<Utc>) -> bool {
    workload.status == WorkloadStatus::Claimed
        && workload.deadline.is_some_and(|deadline| deadline <= now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::{NewWorkload, WorkloadType};

    fn workload(status: WorkloadStatus, deadline: Option<DateTime<Utc>>) -> Workload {
        let mut workload =
            NewWorkload::new("w-1", WorkloadType::Sync, "g1").into_workload(Utc::now());
        workload.status = status;
        workload.deadline = deadline;
        workload
    }

    #[test]
    fn test_holds_mutex() {
        let now = Utc::now();
        let later = Some(now + chrono::Duration::minutes(1));
        let earlier = Some(now - chrono::Duration::minutes(1));

        assert!(holds_mutex(&workload(WorkloadStatus::Claimed, later), now));
        assert!(holds_mutex(&workload(WorkloadStatus::Running, None), now));
        assert!(!holds_mutex(&workload(WorkloadStatus::Launched, earlier), now));
        assert!(!holds_mutex(&workload(WorkloadStatus::Pending, None), now));
        assert!(!holds_mutex(&workload(WorkloadStatus::Success, None), now));
    }

    #[test]
    fn test_claim_expired() {
        let now = Utc::now();
        let earlier = Some(now - chrono::Duration::seconds(1));

        assert!(claim_expired(&workload(WorkloadStatus::Claimed, earlier), now));
        assert!(!claim_expired(
            &workload(WorkloadStatus::Claimed, Some(now + chrono::Duration::seconds(1))),
            now
        ));
        assert!(!claim_expired(&workload(WorkloadStatus::Launched, earlier), now));
    }
}
