//! Queue consumption: polling, fan-out and on/off control
//!
//! This module provides:
//! - [`QueuePoller`] - timer-driven batch claims flattened into a stream
//! - [`LaunchQueue`] - one poller feeding a semaphore-limited pool of
//!   pipeline invocations, per dataplane group and priority
//! - [`BackpressureState`] - executor-wide admission taken by LOAD_SHED
//! - [`WorkerPoolController`] - flag-driven suspend/resume and status reports
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                   WorkerPoolController                        │
//! │   consumer check (10s)               status report (60s)     │
//! └──────────┬───────────────────────────────────┬───────────────┘
//!            │ suspend / resume                  │ gauges
//!            ▼                                   ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │  LaunchQueue  (launcher-queue-{group}[-high-priority])       │
//! │  ┌─────────────┐   bounded    ┌───────────────────────────┐  │
//! │  │ QueuePoller │ ──channel──► │ dispatch (Semaphore = N)  │  │
//! │  │  (interval) │              │ [run] [run] ... [run]     │  │
//! │  └──────┬──────┘              └─────────────┬─────────────┘  │
//! └─────────┼───────────────────────────────────┼────────────────┘
//!           │ poll (lease)                      │ LaunchPipeline::run
//!           ▼                                   ▼
//!   WorkloadQueueStore                 BackpressureState (shared)
//! ```

mod backpressure;
mod controller;
mod poller;
mod queue;

pub use backpressure::{
    BackpressureConfig, BackpressureError, BackpressureState, InFlightGuard, OverCapacity,
};
pub use controller::{ControllerConfig, WorkerPoolController};
pub use poller::{PollerConfig, PollerError, QueuePoller};
pub use queue::{LaunchQueue, LaunchQueueConfig, LaunchQueueError, LaunchQueueStats, LaunchQueueStatus};
