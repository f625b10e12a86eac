//! # Workload Launch Engine
//!
//! The control-plane core that moves workloads from "requested" to
//! "executing" on a dataplane.
//!
//! ## Features
//!
//! - **Lease-based queue**: claims are time-bounded leases; an unacked item
//!   becomes claimable again once its lease lapses
//! - **Concurrent pollers**: PostgreSQL `FOR UPDATE SKIP LOCKED` keeps a fleet
//!   of pollers from ever returning the same workload twice
//! - **Staged launcher**: CLAIM → CHECK_STATUS → BUILD → LOAD_SHED → MUTEX → LAUNCH,
//!   with stage-tagged failures
//! - **Retry policy**: failed launches are requeued with exponential backoff
//!   until complete or partial failure ceilings are reached
//! - **Operator control**: per dataplane group suspend/resume via feature flags
//!
//! ## Architecture
//!
//! ```text
//!   enqueue(group, priority, id)
//!              │
//!              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   WorkloadQueueStore                         │
//! │  (PostgreSQL: workload, workload_queue)                     │
//! └─────────────────────────────────────────────────────────────┘
//!              │ poll (lease)
//!              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │        LaunchQueue × (dataplane group, priority)             │
//! │  QueuePoller ──► LaunchPipeline ──► Success/FailureHandler  │
//! └─────────────────────────────────────────────────────────────┘
//!              │ execute                      ▲ suspend / resume
//!              ▼                              │
//!     ExecutionSubstrate            WorkerPoolController
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use workload_engine::prelude::*;
//!
//! let store: Arc<dyn WorkloadQueueStore> = Arc::new(PostgresWorkloadQueueStore::new(pool));
//! let pipeline = Arc::new(LaunchPipeline::standard(PipelineConfig::new("dp-1"), deps));
//!
//! let queue = Arc::new(LaunchQueue::new(
//!     LaunchQueueConfig::new("us-east", WorkloadPriority::Default),
//!     store.clone(),
//!     metrics.clone(),
//!     pipeline,
//! ));
//! queue.start()?;
//! ```

pub mod clock;
pub mod flags;
pub mod metrics;
pub mod persistence;
pub mod pipeline;
pub mod reliability;
pub mod substrate;
pub mod worker;
pub mod workload;

pub(crate) mod duration_millis;

/// Prelude for common imports
pub mod prelude {
    pub use crate::flags::{
        FeatureFlagClient, Flag, FlagContext, PostgresFeatureFlags, StaticFeatureFlags,
    };
    pub use crate::metrics::{InMemoryMetricClient, MetricClient, OtelMetricClient};
    pub use crate::persistence::{
        InMemoryWorkloadQueueStore, PostgresWorkloadQueueStore, StoreError, WorkloadQueueStore,
    };
    pub use crate::pipeline::{
        BuildConfig, LaunchPipeline, MutexPolicy, PipelineConfig, PipelineDeps, PipelineOutcome,
        StageName,
    };
    pub use crate::reliability::{BackoffPolicy, RetryPolicy, RetryState, RetryTracker};
    pub use crate::substrate::{ExecutionSubstrate, InMemorySubstrate};
    pub use crate::worker::{
        BackpressureConfig, BackpressureState, ControllerConfig, LaunchQueue, LaunchQueueConfig,
        PollerConfig, WorkerPoolController,
    };
    pub use crate::workload::{NewWorkload, Workload, WorkloadPriority, WorkloadStatus, WorkloadType};
}

// Re-export key types at crate root
pub use persistence::{
    InMemoryWorkloadQueueStore, PostgresWorkloadQueueStore, StoreError, WorkloadQueueStore,
};
pub use pipeline::{LaunchPipeline, PipelineConfig, PipelineOutcome, StageName};
pub use reliability::{BackoffPolicy, RetryPolicy, RetryState, RetryTracker};
pub use worker::{LaunchQueue, LaunchQueueConfig, WorkerPoolController};
pub use workload::{NewWorkload, Workload, WorkloadPriority, WorkloadStatus, WorkloadType};
