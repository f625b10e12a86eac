//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use workload_engine::persistence::{MutexAcquisition, PollRequest, QueueItem, QueueStats};
use workload_engine::{
    InMemoryWorkloadQueueStore, NewWorkload, StoreError, Workload, WorkloadPriority,
    WorkloadQueueStore, WorkloadType,
};

/// Create and enqueue `count` sync workloads named `{prefix}{i}`
pub async fn seed(
    store: &dyn WorkloadQueueStore,
    group: &str,
    priority: WorkloadPriority,
    prefix: &str,
    count: usize,
) -> Vec<String> {
    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        let id = format!("{prefix}{i}");
        store
            .create_workload(NewWorkload::new(&id, WorkloadType::Sync, group).with_priority(priority))
            .await
            .unwrap();
        store.enqueue(group, priority, &id).await.unwrap();
        ids.push(id);
    }
    ids
}

/// In-memory store whose polls can be made to fail on demand
pub struct FlakyStore {
    inner: InMemoryWorkloadQueueStore,
    failing_polls: AtomicUsize,
    poll_calls: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryWorkloadQueueStore::new(),
            failing_polls: AtomicUsize::new(0),
            poll_calls: AtomicUsize::new(0),
        })
    }

    /// Make the next `n` polls fail
    pub fn fail_next_polls(&self, n: usize) {
        self.failing_polls.store(n, Ordering::SeqCst);
    }

    pub fn poll_calls(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkloadQueueStore for FlakyStore {
    async fn create_workload(&self, workload: NewWorkload) -> Result<Workload, StoreError> {
        self.inner.create_workload(workload).await
    }

    async fn get_workload(&self, workload_id: &str) -> Result<Workload, StoreError> {
        self.inner.get_workload(workload_id).await
    }

    async fn claim(
        &self,
        workload_id: &str,
        dataplane_id: &str,
        deadline: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.inner.claim(workload_id, dataplane_id, deadline).await
    }

    async fn mark_launched(
        &self,
        workload_id: &str,
        deadline: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.inner.mark_launched(workload_id, deadline).await
    }

    async fn heartbeat(
        &self,
        workload_id: &str,
        deadline: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.inner.heartbeat(workload_id, deadline).await
    }

    async fn succeed(&self, workload_id: &str) -> Result<(), StoreError> {
        self.inner.succeed(workload_id).await
    }

    async fn fail(&self, workload_id: &str, source: &str, reason: &str) -> Result<(), StoreError> {
        self.inner.fail(workload_id, source, reason).await
    }

    async fn cancel(
        &self,
        workload_id: &str,
        source: &str,
        reason: &str,
    ) -> Result<(), StoreError> {
        self.inner.cancel(workload_id, source, reason).await
    }

    async fn find_active_by_mutex_key(
        &self,
        mutex_key: &str,
    ) -> Result<Vec<Workload>, StoreError> {
        self.inner.find_active_by_mutex_key(mutex_key).await
    }

    async fn acquire_mutex(
        &self,
        mutex_key: &str,
        workload_id: &str,
    ) -> Result<MutexAcquisition, StoreError> {
        self.inner.acquire_mutex(mutex_key, workload_id).await
    }

    async fn enqueue(
        &self,
        dataplane_group: &str,
        priority: WorkloadPriority,
        workload_id: &str,
    ) -> Result<QueueItem, StoreError> {
        self.inner.enqueue(dataplane_group, priority, workload_id).await
    }

    async fn requeue(
        &self,
        workload_id: &str,
        not_before: DateTime<Utc>,
    ) -> Result<QueueItem, StoreError> {
        self.inner.requeue(workload_id, not_before).await
    }

    async fn poll(&self, request: PollRequest) -> Result<Vec<Workload>, StoreError> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_polls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Database("connection reset by peer".into()));
        }
        self.inner.poll(request).await
    }

    async fn ack(&self, workload_id: &str) -> Result<(), StoreError> {
        self.inner.ack(workload_id).await
    }

    async fn count_enqueued(
        &self,
        dataplane_group: Option<&str>,
        priority: Option<WorkloadPriority>,
    ) -> Result<u64, StoreError> {
        self.inner.count_enqueued(dataplane_group, priority).await
    }

    async fn queue_stats(&self) -> Result<Vec<QueueStats>, StoreError> {
        self.inner.queue_stats().await
    }

    async fn delete_acked_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        self.inner.delete_acked_before(cutoff).await
    }
}
