//! Staged launch pipeline
//!
//! Every workload delivered by a poller runs through a fixed, fail-fast chain
//! of stages:
//!
//! ```text
//!   CLAIM ──► CHECK_STATUS ──► BUILD ──► LOAD_SHED ──► MUTEX ──► LAUNCH
//!     │            │             │           │            │         │
//!     │          skip            └───────────┴─────┬──────┴─────────┘
//!     │            │                               │
//!     ▼            ▼                               ▼
//!  abandoned    skipped                     FailureHandler ──► store.requeue (retryable)
//!                                                          └─► store.fail
//!
//!                         all stages pass ──► SuccessHandler ──► store.mark_launched
//! ```
//!
//! A stage error is tagged with its [`StageName`] and the invocation's
//! [`StageIO`]. The [`FailureHandler`] dispatches on that tag: CLAIM failures
//! mean another owner won and are dropped silently. Later failures are put
//! back on the queue with backoff while the [`RetryPolicy`](crate::reliability::RetryPolicy)
//! allows, then written to the workload record.

mod handlers;
mod launcher;
mod stage;
mod stages;

pub use handlers::{
    FailureDisposition, FailureHandler, SuccessHandler, DEFAULT_TERMINATION_SOURCE,
};
pub use launcher::{LaunchPipeline, PipelineConfig, PipelineDeps, PipelineOutcome};
pub use stage::{LaunchError, PipelineError, Stage, StageError, StageIO, StageName, StageOutcome};
pub use stages::{
    BuildConfig, BuildStage, CheckStatusStage, ClaimStage, LaunchStage, LoadShedStage,
    MutexPolicy, MutexStage,
};
