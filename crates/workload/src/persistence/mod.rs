//! Persistence layer for workloads and the workload queue
//!
//! This module provides:
//! - [`WorkloadQueueStore`] trait for workload and queue persistence
//! - [`InMemoryWorkloadQueueStore`] for testing
//! - [`PostgresWorkloadQueueStore`] for production

mod memory;
mod postgres;
mod store;

pub use memory::InMemoryWorkloadQueueStore;
pub use postgres::PostgresWorkloadQueueStore;
pub use store::{
    holds_mutex, MutexAcquisition, PollRequest, QueueItem, QueueStats, StoreError,
    WorkloadQueueStore,
};
