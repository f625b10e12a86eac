//! In-memory implementation of WorkloadQueueStore for testing

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use super::store::*;
use crate::clock::{Clock, SystemClock};
use crate::workload::{NewWorkload, Workload, WorkloadPriority, WorkloadStatus};

#[derive(Default)]
struct Inner {
    workloads: HashMap<String, Workload>,
    /// Queue items with an insertion sequence used to break `created_at` ties
    queue: Vec<(u64, QueueItem)>,
    next_seq: u64,
    /// Mutex key -> holding workload id
    mutexes: HashMap<String, String>,
}

impl Inner {
    fn workload_mut(&mut self, workload_id: &str) -> Result<&mut Workload, StoreError> {
        self.workloads
            .get_mut(workload_id)
            .ok_or_else(|| StoreError::WorkloadNotFound(workload_id.to_string()))
    }

    fn ack(&mut self, workload_id: &str, now: DateTime<Utc>) {
        for (_, item) in self.queue.iter_mut() {
            if item.workload_id == workload_id && item.acked_at.is_none() {
                item.acked_at = Some(now);
            }
        }
    }

    fn terminate(
        &mut self,
        workload_id: &str,
        to: WorkloadStatus,
        termination: Option<(&str, &str)>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let workload = self.workload_mut(workload_id)?;
        if !check_terminal_transition(workload, to)? {
            return Ok(());
        }

        workload.status = to;
        workload.deadline = None;
        workload.updated_at = now;
        if let Some((source, reason)) = termination {
            workload.termination_source = Some(source.to_string());
            workload.termination_reason = Some(reason.to_string());
        }
        self.ack(workload_id, now);
        Ok(())
    }

    fn push_item(&mut self, item: QueueItem) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push((seq, item));
    }
}

/// In-memory implementation of WorkloadQueueStore
///
/// Provides the same semantics as the PostgreSQL implementation. A single
/// write lock around select-and-update stands in for `FOR UPDATE SKIP LOCKED`.
///
/// # Example
///
/// ```
/// use workload_engine::InMemoryWorkloadQueueStore;
///
/// let store = InMemoryWorkloadQueueStore::new();
/// ```
pub struct InMemoryWorkloadQueueStore {
    inner: RwLock<Inner>,
    clock: Arc<dyn Clock>,
}

impl InMemoryWorkloadQueueStore {
    /// Create a new in-memory store on the wall clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a new in-memory store with an explicit clock
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            clock,
        }
    }

    /// Get the number of workloads
    pub fn workload_count(&self) -> usize {
        self.inner.read().workloads.len()
    }

    /// Snapshot of all queue items, acked or not, in insertion order
    pub fn queue_items(&self) -> Vec<QueueItem> {
        self.inner
            .read()
            .queue
            .iter()
            .map(|(_, item)| item.clone())
            .collect()
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.workloads.clear();
        inner.queue.clear();
        inner.mutexes.clear();
    }
}

impl Default for InMemoryWorkloadQueueStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkloadQueueStore for InMemoryWorkloadQueueStore {
    async fn create_workload(&self, workload: NewWorkload) -> Result<Workload, StoreError> {
        let now = self.clock.now();
        let mut inner = self.inner.write();
        if inner.workloads.contains_key(&workload.id) {
            return Err(StoreError::Conflict(workload.id));
        }

        let workload = workload.into_workload(now);
        inner
            .workloads
            .insert(workload.id.clone(), workload.clone());
        Ok(workload)
    }

    async fn get_workload(&self, workload_id: &str) -> Result<Workload, StoreError> {
        self.inner
            .read()
            .workloads
            .get(workload_id)
            .cloned()
            .ok_or_else(|| StoreError::WorkloadNotFound(workload_id.to_string()))
    }

    async fn claim(
        &self,
        workload_id: &str,
        dataplane_id: &str,
        deadline: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut inner = self.inner.write();
        let workload = inner.workload_mut(workload_id)?;

        match workload.status {
            WorkloadStatus::Pending => {}
            WorkloadStatus::Claimed if claim_expired(workload, now) => {}
            WorkloadStatus::Claimed => {
                return Ok(workload.dataplane_id.as_deref() == Some(dataplane_id))
            }
            _ => return Ok(false),
        }

        workload.status = WorkloadStatus::Claimed;
        workload.dataplane_id = Some(dataplane_id.to_string());
        workload.deadline = Some(deadline);
        workload.updated_at = now;
        Ok(true)
    }

    async fn mark_launched(
        &self,
        workload_id: &str,
        deadline: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut inner = self.inner.write();
        let workload = inner.workload_mut(workload_id)?;

        match workload.status {
            WorkloadStatus::Claimed | WorkloadStatus::Launched => {
                workload.status = WorkloadStatus::Launched;
                workload.deadline = Some(deadline);
                workload.updated_at = now;
            }
            from => {
                return Err(StoreError::InvalidStatusTransition {
                    id: workload_id.to_string(),
                    from,
                    to: WorkloadStatus::Launched,
                })
            }
        }

        inner.ack(workload_id, now);
        Ok(())
    }

    async fn heartbeat(
        &self,
        workload_id: &str,
        deadline: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut inner = self.inner.write();
        let workload = inner.workload_mut(workload_id)?;

        match workload.status {
            WorkloadStatus::Claimed | WorkloadStatus::Launched | WorkloadStatus::Running => {
                workload.status = WorkloadStatus::Running;
                workload.deadline = Some(deadline);
                workload.last_heartbeat_at = Some(now);
                workload.updated_at = now;
                Ok(())
            }
            from => Err(StoreError::InvalidStatusTransition {
                id: workload_id.to_string(),
                from,
                to: WorkloadStatus::Running,
            }),
        }
    }

    async fn succeed(&self, workload_id: &str) -> Result<(), StoreError> {
        let now = self.clock.now();
        self.inner
            .write()
            .terminate(workload_id, WorkloadStatus::Success, None, now)
    }

    async fn fail(&self, workload_id: &str, source: &str, reason: &str) -> Result<(), StoreError> {
        let now = self.clock.now();
        self.inner.write().terminate(
            workload_id,
            WorkloadStatus::Failure,
            Some((source, reason)),
            now,
        )
    }

    async fn cancel(
        &self,
        workload_id: &str,
        source: &str,
        reason: &str,
    ) -> Result<(), StoreError> {
        let now = self.clock.now();
        self.inner.write().terminate(
            workload_id,
            WorkloadStatus::Cancelled,
            Some((source, reason)),
            now,
        )
    }

    async fn find_active_by_mutex_key(
        &self,
        mutex_key: &str,
    ) -> Result<Vec<Workload>, StoreError> {
        let inner = self.inner.read();
        let mut matches: Vec<Workload> = inner
            .workloads
            .values()
            .filter(|w| w.mutex_key.as_deref() == Some(mutex_key) && !w.status.is_terminal())
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matches)
    }

    async fn acquire_mutex(
        &self,
        mutex_key: &str,
        workload_id: &str,
    ) -> Result<MutexAcquisition, StoreError> {
        let now = self.clock.now();
        let mut inner = self.inner.write();
        if !inner.workloads.contains_key(workload_id) {
            return Err(StoreError::WorkloadNotFound(workload_id.to_string()));
        }

        if let Some(holder) = inner.mutexes.get(mutex_key) {
            let live = holder != workload_id
                && inner
                    .workloads
                    .get(holder)
                    .is_some_and(|w| holds_mutex(w, now));
            if live {
                return Ok(MutexAcquisition::HeldBy(holder.clone()));
            }
        }

        inner
            .mutexes
            .insert(mutex_key.to_string(), workload_id.to_string());
        Ok(MutexAcquisition::Acquired)
    }

    async fn enqueue(
        &self,
        dataplane_group: &str,
        priority: WorkloadPriority,
        workload_id: &str,
    ) -> Result<QueueItem, StoreError> {
        let now = self.clock.now();
        let mut inner = self.inner.write();

        if !inner.workloads.contains_key(workload_id) {
            return Err(StoreError::WorkloadNotFound(workload_id.to_string()));
        }
        let already_enqueued = inner
            .queue
            .iter()
            .any(|(_, item)| item.workload_id == workload_id && item.acked_at.is_none());
        if already_enqueued {
            return Err(StoreError::AlreadyEnqueued(workload_id.to_string()));
        }

        let item = QueueItem {
            id: Uuid::now_v7(),
            workload_id: workload_id.to_string(),
            dataplane_group: dataplane_group.to_string(),
            priority,
            created_at: now,
            poll_deadline: now,
            acked_at: None,
        };
        inner.push_item(item.clone());
        Ok(item)
    }

    async fn requeue(
        &self,
        workload_id: &str,
        not_before: DateTime<Utc>,
    ) -> Result<QueueItem, StoreError> {
        let now = self.clock.now();
        let mut inner = self.inner.write();
        let workload = inner.workload_mut(workload_id)?;

        match workload.status {
            WorkloadStatus::Pending | WorkloadStatus::Claimed => {
                workload.status = WorkloadStatus::Pending;
                workload.dataplane_id = None;
                workload.deadline = None;
                workload.updated_at = now;
            }
            from => {
                return Err(StoreError::InvalidStatusTransition {
                    id: workload_id.to_string(),
                    from,
                    to: WorkloadStatus::Pending,
                })
            }
        }

        let item = QueueItem {
            id: Uuid::now_v7(),
            workload_id: workload_id.to_string(),
            dataplane_group: workload.dataplane_group.clone(),
            priority: workload.priority,
            created_at: now,
            poll_deadline: not_before,
            acked_at: None,
        };
        inner.ack(workload_id, now);
        inner.push_item(item.clone());
        Ok(item)
    }

    async fn poll(&self, request: PollRequest) -> Result<Vec<Workload>, StoreError> {
        let now = self.clock.now();
        let lease_until = now + chrono::Duration::from_std(request.redelivery_window)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let mut inner = self.inner.write();

        let mut eligible: Vec<(DateTime<Utc>, u64, usize)> = inner
            .queue
            .iter()
            .enumerate()
            .filter(|(_, (_, item))| {
                item.is_eligible(now)
                    && request
                        .dataplane_group
                        .as_deref()
                        .is_none_or(|g| item.dataplane_group == g)
                    && request.priority.is_none_or(|p| item.priority == p)
            })
            .map(|(idx, (seq, item))| (item.created_at, *seq, idx))
            .collect();
        eligible.sort();
        eligible.truncate(request.quantity);

        let mut claimed = Vec::with_capacity(eligible.len());
        for (_, _, idx) in eligible {
            let item = &mut inner.queue[idx].1;
            item.poll_deadline = lease_until;
            let workload_id = item.workload_id.clone();
            if let Some(workload) = inner.workloads.get(&workload_id) {
                claimed.push(workload.clone());
            }
        }

        Ok(claimed)
    }

    async fn ack(&self, workload_id: &str) -> Result<(), StoreError> {
        let now = self.clock.now();
        self.inner.write().ack(workload_id, now);
        Ok(())
    }

    async fn count_enqueued(
        &self,
        dataplane_group: Option<&str>,
        priority: Option<WorkloadPriority>,
    ) -> Result<u64, StoreError> {
        let now = self.clock.now();
        let inner = self.inner.read();
        let count = inner
            .queue
            .iter()
            .filter(|(_, item)| {
                item.is_eligible(now)
                    && dataplane_group.is_none_or(|g| item.dataplane_group == g)
                    && priority.is_none_or(|p| item.priority == p)
            })
            .count();
        Ok(count as u64)
    }

    async fn queue_stats(&self) -> Result<Vec<QueueStats>, StoreError> {
        let now = self.clock.now();
        let inner = self.inner.read();

        let mut counts: BTreeMap<(String, WorkloadPriority), u64> = BTreeMap::new();
        for (_, item) in inner.queue.iter().filter(|(_, item)| item.is_eligible(now)) {
            *counts
                .entry((item.dataplane_group.clone(), item.priority))
                .or_default() += 1;
        }

        Ok(counts
            .into_iter()
            .map(|((dataplane_group, priority), enqueued_count)| QueueStats {
                dataplane_group,
                priority,
                enqueued_count,
            })
            .collect())
    }

    async fn delete_acked_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut inner = self.inner.write();
        let before = inner.queue.len();
        inner
            .queue
            .retain(|(_, item)| item.acked_at.is_none_or(|acked| acked >= cutoff));
        Ok((before - inner.queue.len()) as u64)
    }
}
